pub mod address;
pub mod address_parser;
pub mod audit;
pub mod config;
pub mod context;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod policy;
pub mod status;
pub mod traits;

pub use address::{Address, AddressList};
pub use context::Context;
pub use domain::Domain;
pub use envelope::{BodyType, Envelope, MailParameters};
pub use status::Status;
pub use tracing;

/// Broadcast to every spawned session and listener task on shutdown.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
