//! Wires `ImapSession` into the polymorphic `MailboxDriver` surface
//! (§4.H) shared with `mail-pop`. This is a thin, cache-bypassing
//! adapter: `msg_open` calls `fetch_body` directly against the live
//! session with no cache root in the picture, and `msg_save_hcache` is
//! a no-op (see the trait doc-comment in `mail_core::driver`). Driving
//! a session through this trait alone never populates the body/header
//! caches. Callers that want IMAP-specific behaviour (IDLE, LIST/LSUB,
//! ACL) or cache-backed fetches should reach past it to `ImapSession`
//! directly.

use mail_core::account::Account;
use mail_core::driver::{MailboxCheckOutcome, MailboxDriver, MailboxOpenOutcome};
use mail_core::error::{MailError, MailResult};

use crate::mailbox_index::ImapMessage;
use crate::session::{ExecFlags, ImapSession};
use std::time::Duration;



impl MailboxDriver for ImapSession {
    type Message = ImapMessage;

    fn ac_owns_path(account: &Account, path: &str) -> bool {
        match Account::parse_url(path) {
            Ok(parsed) => parsed.scheme.is_imap() && parsed.matches(account),
            Err(_) => false,
        }
    }

    fn ac_add(&mut self, mailbox: &str) -> MailResult<()> {
        self.select(mailbox)
    }

    fn mbox_open(&mut self) -> MailResult<MailboxOpenOutcome> {
        if self.mailbox.is_none() {
            return Err(MailError::ProtocolError(
                "no mailbox selected; call ac_add first".into(),
            ));
        }
        if self.index.max_msn() == 0 {
            Ok(MailboxOpenOutcome::NoMail)
        } else {
            Ok(MailboxOpenOutcome::Ok)
        }
    }

    fn mbox_check(&mut self) -> MailResult<MailboxCheckOutcome> {
        let before = self.index.max_msn();
        self.imap_exec("NOOP", ExecFlags::empty(), Duration::ZERO)?;
        if self.index.max_msn() != before || self.new_mail_count > 0 {
            Ok(MailboxCheckOutcome::NewMail)
        } else {
            Ok(MailboxCheckOutcome::Unchanged)
        }
    }

    fn mbox_sync(&mut self) -> MailResult<()> {
        let rc = self.imap_exec("CHECK", ExecFlags::empty(), Duration::ZERO)?;
        if rc != 0 {
            return Err(MailError::ServerRefused("CHECK refused".into()));
        }
        Ok(())
    }

    fn mbox_close(&mut self) -> MailResult<()> {
        self.logout()
    }

    fn msg_open(&mut self, msg: &ImapMessage) -> MailResult<Vec<u8>> {
        self.fetch_body(msg.uid)
    }

    fn msg_close(&mut self, _msg: &ImapMessage) -> MailResult<()> {
        Ok(())
    }

    fn msg_save_hcache(&mut self, _msg: &ImapMessage) -> MailResult<()> {
        Ok(())
    }
}
