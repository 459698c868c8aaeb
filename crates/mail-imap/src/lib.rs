//! IMAP client: the tagged-command pipeline, untagged-response
//! dispatcher, MSN/UID bookkeeping, and the driver impl built on top
//! (SELECT, NOOP/CHECK polling, IDLE, LIST/LSUB, body fetch).

pub mod command;
pub mod driver_impl;
pub mod mailbox_index;
pub mod session;

pub use command::{CmdState, CommandRing, ImapCommand};
pub use mailbox_index::{ImapMessage, MailboxIndex};
pub use session::{
    CheckStatus, ExecFlags, ImapSession, ImapState, ImapStatus, ListEntry, MailboxStatus,
    ReopenFlags, StartFlags,
};
