//! The lifecycle wrapper around a [`BackingStore`](crate::r#trait::BackingStore).
//!
//! `Spool<Store>` owns a store and gives it an `init`/`serve` lifecycle so
//! the process entry point can bring a configured backend up and keep it
//! running until shutdown, independent of which store it's wrapping.

use std::sync::Arc;

use esmtpd_common::Signal;
use tokio::sync::broadcast;

use crate::{backends::file::FileBackingStore, r#trait::BackingStore};

#[derive(Debug, Clone)]
pub struct Spool<Store: BackingStore> {
    store: Arc<Store>,
}

impl<Store: BackingStore> Spool<Store> {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl Spool<FileBackingStore> {
    /// Create the spool directory if it doesn't already exist.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn init(&mut self) -> crate::Result<()> {
        self.store.init()
    }

    /// Keep the file-backed spool alive until shutdown.
    ///
    /// There's no background work to drive for a file-backed store today
    /// (writes/reads are on-demand), so this simply waits for the shutdown
    /// signal; it exists so callers can treat every [`SpoolType`](crate::config::SpoolType)
    /// variant uniformly.
    ///
    /// # Errors
    /// Never fails; the `Result` exists for symmetry with other backends.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> crate::Result<()> {
        let _ = shutdown.recv().await;
        Ok(())
    }
}

/// A memory-backed spool, typically used in tests and development.
pub type MemorySpool = Spool<crate::backends::memory::MemoryBackingStore>;

/// A file-backed spool, used in production deployments.
pub type FileSpool = Spool<FileBackingStore>;

/// A memory-backed spool instrumented for test synchronization.
pub type TestSpool = Spool<crate::backends::test::TestBackingStore>;
