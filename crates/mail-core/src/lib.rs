//! Shared foundation for the mail-access core: the account/URL model,
//! the connection/socket layer, the error taxonomy, and the
//! polymorphic mailbox driver interface that `mail-pop` and
//! `mail-imap` both implement.

pub mod account;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod quad;
pub mod tristate;

pub use account::{Account, AccountField, CredentialProvider, Scheme};
pub use config::MailConfig;
pub use connection::{Connection, LogLevel, PollOutcome, Transport};
pub use driver::{
    MailboxCheckOutcome, MailboxDriver, MailboxOpenOutcome, MailboxSink, MailboxType, MessageFlags,
};
pub use error::{MailError, MailResult};
pub use quad::{AutoPrompter, Prompter, QuadOption};
pub use tristate::Capability;

#[cfg(any(test, feature = "test-util"))]
pub use connection::test_support;
