//! The storage abstraction that `esmtpd-smtp` hands finished messages to.
//!
//! A `BackingStore` is where a session's [`esmtpd_common::context::Context`]
//! ends up once a transaction completes: given a mutable reference it
//! assigns a [`SpooledMessageId`], persists whatever it's backed by
//! (memory, disk, ...), and makes the stored context retrievable by that id.

use async_trait::async_trait;
use esmtpd_common::context::Context;

use crate::types::SpooledMessageId;

/// Persists completed SMTP transactions.
///
/// Implementations must be safe to share behind an `Arc` across sessions.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Store `context`, stamping `context.tracking_id` with the id it was
    /// stored under and returning that same id.
    ///
    /// # Errors
    /// Returns an error if the store is full, unwritable, or otherwise
    /// unable to accept the message.
    async fn write(&self, context: &mut Context) -> crate::Result<SpooledMessageId>;

    /// List every message id currently held, oldest first.
    ///
    /// # Errors
    /// Returns an error if the store cannot be enumerated.
    async fn list(&self) -> crate::Result<Vec<SpooledMessageId>>;

    /// Fetch a previously stored context by id.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no such message exists.
    async fn read(&self, id: &SpooledMessageId) -> crate::Result<Context>;

    /// Overwrite the context stored under `id`.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no such message exists.
    async fn update(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()>;

    /// Remove a message from the store.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no such message exists.
    async fn delete(&self, id: &SpooledMessageId) -> crate::Result<()>;
}
