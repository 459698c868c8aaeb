//! 4.H Mailbox Driver Interface: the polymorphic surface implemented
//! by both the POP and IMAP drivers (a local mbox/Maildir/MH driver
//! would implement it too, but that driver itself is out of scope —
//! it's referenced here only as the shape other code programs
//! against).

use std::path::{Component, Path, PathBuf};

use crate::account::Account;
use crate::error::{MailError, MailResult};

bitflags::bitflags! {
    /// Per-message flags shared by POP's and IMAP's message records.
    pub struct MessageFlags: u16 {
        const SEEN = 0b0000_0001;
        const OLD = 0b0000_0010;
        const DELETED = 0b0000_0100;
        const FLAGGED = 0b0000_1000;
        const REPLIED = 0b0001_0000;
        const TAGGED = 0b0010_0000;
    }
}

/// What kind of mailbox a path resolves to. Only `Pop`/`Imap` are
/// implemented by this workspace; the local variants are recognised
/// for routing purposes only (§1 non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxType {
    Pop,
    Imap,
    Mbox,
    Mmdf,
    Maildir,
    Mh,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxOpenOutcome {
    Ok,
    NoMail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxCheckOutcome {
    Unchanged,
    NewMail,
}

/// A generic mailbox-operations interface; `mail-mime`'s
/// `save_attachment` (receive-mode, message-type part) uses this to
/// append a reconstituted message into whatever local mailbox format
/// the caller's local driver supports, without this crate needing to
/// know which one.
pub trait MailboxSink {
    /// Append one RFC 822 message. `update_len` asks the sink to patch
    /// an `mbox`/`MMDF`-style `Content-Length` after writing (mirrors
    /// `CH_UPDATE_LEN`); `no_status` suppresses `Status:`/`X-Status:`
    /// header synthesis (mirrors `CH_NOSTATUS`, the Maildir case since
    /// flags live in the filename there instead).
    fn append_message(
        &mut self,
        raw: &[u8],
        update_len: bool,
        no_status: bool,
    ) -> MailResult<()>;
}

/// The polymorphic surface both POP and IMAP sessions implement.
///
/// Neither side threads a cache root or `MailConfig` through this
/// trait: `mbox_open`/`mbox_check`/`mbox_sync` take no such parameter,
/// and `msg_save_hcache` is a no-op on both implementations (see each
/// crate's `driver_impl.rs`). A caller driving a mailbox purely through
/// this trait therefore gets no header/body cache benefit — it always
/// talks to the live server. Callers that want the §4.C/§4.D caches
/// populated must go around this trait to the concrete session type
/// (`PopSession::fetch_headers`, `ImapSession::fetch_body`), which do
/// wire through a cache root. This trait exists so generic mailbox code
/// (open/check/sync/close a mailbox, open/close one message) can stay
/// POP/IMAP-agnostic; it is not a complete substitute for the
/// concrete, cache-aware session APIs.
pub trait MailboxDriver {
    type Message;

    fn ac_owns_path(account: &Account, path: &str) -> bool
    where
        Self: Sized;

    fn ac_add(&mut self, mailbox: &str) -> MailResult<()>;
    fn mbox_open(&mut self) -> MailResult<MailboxOpenOutcome>;
    fn mbox_check(&mut self) -> MailResult<MailboxCheckOutcome>;
    fn mbox_sync(&mut self) -> MailResult<()>;
    fn mbox_close(&mut self) -> MailResult<()>;
    fn msg_open(&mut self, msg: &Self::Message) -> MailResult<Vec<u8>>;
    fn msg_close(&mut self, msg: &Self::Message) -> MailResult<()>;
    fn msg_save_hcache(&mut self, msg: &Self::Message) -> MailResult<()>;
}

/// Classify a path by scheme/shape. Local formats are recognised only
/// well enough to route; this workspace does not implement them.
pub fn path_probe(path: &str) -> MailboxType {
    if let Ok(acct) = Account::parse_url(path) {
        return if acct.scheme.is_pop() {
            MailboxType::Pop
        } else {
            MailboxType::Imap
        };
    }
    let p = Path::new(path);
    if p.join("cur").is_dir() && p.join("new").is_dir() {
        return MailboxType::Maildir;
    }
    if p.join(".mh_sequences").exists() {
        return MailboxType::Mh;
    }
    if p.is_file() {
        return MailboxType::Mbox;
    }
    MailboxType::Unknown
}

/// Canonicalise a path: resolve `.`/`..` components lexically (no
/// filesystem access, so it still works against a mailbox path that
/// doesn't exist yet, e.g. a fresh body-cache directory).
pub fn path_canon(path: &str) -> MailResult<String> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out.to_str()
        .map(str::to_string)
        .ok_or_else(|| MailError::ProtocolError("path is not valid UTF-8".into()))
}

pub fn path_parent(path: &str) -> MailResult<String> {
    let canon = path_canon(path)?;
    Path::new(&canon)
        .parent()
        .and_then(Path::to_str)
        .map(str::to_string)
        .ok_or_else(|| MailError::ProtocolError(format!("{path} has no parent")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_probe_recognises_pop_and_imap_urls() {
        assert_eq!(path_probe("pop://alice@host/INBOX"), MailboxType::Pop);
        assert_eq!(path_probe("imaps://alice@host/INBOX"), MailboxType::Imap);
    }

    #[test]
    fn path_canon_collapses_dot_dot() {
        assert_eq!(path_canon("/a/b/../c").unwrap(), "/a/c");
    }

    #[test]
    fn path_parent_of_root_like_path() {
        assert_eq!(path_parent("/a/b").unwrap(), "/a");
    }
}
