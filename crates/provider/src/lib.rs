pub mod directory;
pub mod error;
pub mod handler;
pub mod log;
pub mod registry;

#[cfg(feature = "webhook")]
pub mod webhook;

pub use directory::{
    CommissionRecord, Directory, DirectorySeed, DirectoryUser, InMemoryDirectory,
    LicenseExpiration, PhaseProgress, PolicyRecord,
};
pub use error::HandlerError;
pub use handler::{ActionHandler, ActionInvocation, DynActionHandler};
pub use log::LogHandler;
pub use registry::HandlerRegistry;

#[cfg(feature = "webhook")]
pub use webhook::{HttpWebhookHandler, SIGNATURE_HEADER};
