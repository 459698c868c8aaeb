//! POP3 client: connection sequence, capability negotiation, the
//! authenticator chain, and the four mailbox operations built on top
//! (header sync, fetch-into-spool, sync/delete, reconnect).

pub mod auth;
pub mod capability;
pub mod driver_impl;
pub mod message;
pub mod session;
pub mod wire;

pub use auth::{AuthOutcome, Authenticator};
pub use capability::{DiscoveryMode, PopCapabilities};
pub use message::PopMessage;
pub use session::{PopSession, PopStatus};
