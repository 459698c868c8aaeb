//! Wires `PopSession` into the polymorphic `MailboxDriver` surface
//! (§4.H) shared with `mail-imap`. This is a thin, cache-bypassing
//! adapter: `mbox_open`/`mbox_check` call `fetch_headers` with a
//! `MailConfig::default()` rather than a caller-supplied cache root, so
//! driving a session through this trait alone never touches the header
//! cache, and `msg_save_hcache` is a no-op (see the trait doc-comment
//! in `mail_core::driver`). Callers that want cache-backed header sync
//! must call `PopSession::fetch_headers` directly with a real
//! `MailConfig`; this impl exists only so generic mailbox code can
//! drive a POP session without knowing it is POP.

use std::collections::HashSet;

use mail_core::account::Account;
use mail_core::config::MailConfig;
use mail_core::driver::{MailboxCheckOutcome, MailboxDriver, MailboxOpenOutcome};
use mail_core::error::{MailError, MailResult};

use crate::message::PopMessage;
use crate::session::PopSession;

impl MailboxDriver for PopSession {
    type Message = PopMessage;

    fn ac_owns_path(account: &Account, path: &str) -> bool {
        match Account::parse_url(path) {
            Ok(parsed) => parsed.scheme.is_pop() && parsed.matches(account),
            Err(_) => false,
        }
    }

    fn ac_add(&mut self, _mailbox: &str) -> MailResult<()> {
        // POP exposes exactly one mailbox per account; nothing to add.
        Ok(())
    }

    fn mbox_open(&mut self) -> MailResult<MailboxOpenOutcome> {
        self.fetch_headers(None, None, &MailConfig::default())?;
        if self.messages.iter().any(|m| m.refno.is_some()) {
            Ok(MailboxOpenOutcome::Ok)
        } else {
            Ok(MailboxOpenOutcome::NoMail)
        }
    }

    fn mbox_check(&mut self) -> MailResult<MailboxCheckOutcome> {
        let before: HashSet<String> = self.messages.iter().map(|m| m.uid.clone()).collect();
        self.fetch_headers(None, None, &MailConfig::default())?;
        let after: HashSet<String> = self.messages.iter().map(|m| m.uid.clone()).collect();
        if after != before {
            Ok(MailboxCheckOutcome::NewMail)
        } else {
            Ok(MailboxCheckOutcome::Unchanged)
        }
    }

    fn mbox_sync(&mut self) -> MailResult<()> {
        self.sync(None, None)
    }

    fn mbox_close(&mut self) -> MailResult<()> {
        self.close();
        Ok(())
    }

    fn msg_open(&mut self, msg: &PopMessage) -> MailResult<Vec<u8>> {
        let refno = msg.refno.ok_or_else(|| {
            MailError::ProtocolError("message has no refno in the current session".into())
        })?;
        self.retrieve_raw(refno)
    }

    fn msg_close(&mut self, _msg: &PopMessage) -> MailResult<()> {
        Ok(())
    }

    fn msg_save_hcache(&mut self, _msg: &PopMessage) -> MailResult<()> {
        // `fetch_headers` already stores new entries as they're read;
        // nothing further to persist here.
        Ok(())
    }
}
