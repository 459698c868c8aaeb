//! The IMAP command pipeline and untagged-response dispatcher (§4.G).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use mail_core::account::{Account, CredentialProvider};
use mail_core::connection::{Connection, PollOutcome};
use mail_core::driver::MessageFlags;
use mail_core::error::{MailError, MailResult};

use crate::command::{CmdState, CommandRing};
use crate::mailbox_index::MailboxIndex;

bitflags::bitflags! {
    /// What `cmd_finish` should do once the queue drains in the
    /// SELECTED state.
    pub struct ReopenFlags: u8 {
        const EXPUNGE_PENDING = 0b0001;
        const NEWMAIL_PENDING = 0b0010;
        const EXPUNGE_EXPECTED = 0b0100;
        const ALLOW = 0b1000;
    }
}

bitflags::bitflags! {
    pub struct StartFlags: u8 {
        const QUEUE = 0b01;
        const POLL = 0b10;
    }
}

bitflags::bitflags! {
    pub struct ExecFlags: u8 {
        const QUEUE = 0b001;
        const POLL = 0b010;
        const FAIL_OK = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapState {
    Disconnected,
    Connected,
    Authenticated,
    Selected,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapStatus {
    Ok,
    Bye,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    None,
    NewmailPending,
    ExpungePending,
    FlagsPending,
}

#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    pub delim: Option<char>,
    pub no_select: bool,
    pub no_inferiors: bool,
    pub has_no_children: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MailboxStatus {
    pub messages: Option<u32>,
    pub recent: Option<u32>,
    pub uidnext: Option<u32>,
    pub uidvalidity: Option<u32>,
    pub unseen: Option<u32>,
}

pub struct ImapSession {
    conn: Connection,
    pub state: ImapState,
    pub status: ImapStatus,
    pub capabilities: Vec<String>,
    ring: CommandRing,
    pub mailbox: Option<String>,
    pub delim: Option<char>,
    pub index: MailboxIndex,
    pub reopen: ReopenFlags,
    pub check_status: CheckStatus,
    pub new_mail_count: u32,
    pub list_entries: Vec<ListEntry>,
    pub lsub_entries: Vec<ListEntry>,
    pub mailbox_status: HashMap<String, MailboxStatus>,
    pub acl: HashSet<char>,
    pub search_matches: HashSet<u32>,
    /// Raw bytes captured from a `BODY[]`/`RFC822` literal, keyed by
    /// UID. Populated by `handle_fetch`, drained by `msg_open`.
    pub fetched_bodies: HashMap<u32, Vec<u8>>,
    pub unicode_enabled: bool,
    pub recovering: bool,
    pub err_msg: Option<String>,
    logging_out: bool,
}

impl ImapSession {
    /// Reads the greeting (`* OK ...` or `* PREAUTH ...`) over an
    /// already-open socket and builds the session around it.
    pub fn connect(mut conn: Connection, pipeline_depth: usize) -> MailResult<ImapSession> {
        let greeting = conn.readln()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailError::ProtocolError(format!(
                "bad greeting: {greeting}"
            )));
        }
        let state = if greeting.starts_with("* PREAUTH") {
            ImapState::Authenticated
        } else {
            ImapState::Connected
        };
        Ok(ImapSession {
            conn,
            state,
            status: ImapStatus::Ok,
            capabilities: Vec::new(),
            ring: CommandRing::new(pipeline_depth),
            mailbox: None,
            delim: None,
            index: MailboxIndex::default(),
            reopen: ReopenFlags::ALLOW,
            check_status: CheckStatus::None,
            new_mail_count: 0,
            list_entries: Vec::new(),
            lsub_entries: Vec::new(),
            mailbox_status: HashMap::new(),
            acl: HashSet::new(),
            search_matches: HashSet::new(),
            fetched_bodies: HashMap::new(),
            unicode_enabled: false,
            recovering: false,
            err_msg: None,
            logging_out: false,
        })
    }

    pub fn login(&mut self, account: &Account, creds: &dyn CredentialProvider) -> MailResult<()> {
        let password = creds.password(account)?;
        let cmd = format!("LOGIN {} {}", quote(&account.user), quote(&password));
        let outcome = self.imap_exec(&cmd, ExecFlags::empty(), Duration::ZERO)?;
        if outcome != 0 {
            return Err(MailError::AuthFailure("LOGIN refused".into()));
        }
        self.state = ImapState::Authenticated;
        Ok(())
    }

    pub fn select(&mut self, mailbox: &str) -> MailResult<()> {
        let cmd = format!("SELECT {}", quote(mailbox));
        let outcome = self.imap_exec(&cmd, ExecFlags::empty(), Duration::ZERO)?;
        if outcome != 0 {
            return Err(MailError::ServerRefused(format!("SELECT {mailbox} failed")));
        }
        self.state = ImapState::Selected;
        self.mailbox = Some(mailbox.to_string());
        Ok(())
    }

    /// `UID FETCH <uid> (BODY.PEEK[])`: retrieves one message's full
    /// RFC 822 source without marking it \Seen, via the literal path
    /// `handle_fetch` captures into `fetched_bodies`.
    pub fn fetch_body(&mut self, uid: u32) -> MailResult<Vec<u8>> {
        let cmd = format!("UID FETCH {uid} (BODY.PEEK[])");
        let rc = self.imap_exec(&cmd, ExecFlags::empty(), Duration::ZERO)?;
        if rc != 0 {
            return Err(MailError::ServerRefused(format!(
                "UID FETCH {uid} refused"
            )));
        }
        self.fetched_bodies
            .remove(&uid)
            .ok_or_else(|| MailError::ProtocolError(format!("server did not return a body literal for UID {uid}")))
    }

    pub fn logout(&mut self) -> MailResult<()> {
        self.logging_out = true;
        let _ = self.imap_exec("LOGOUT", ExecFlags::empty(), Duration::ZERO);
        self.conn.close();
        self.state = ImapState::Disconnected;
        Ok(())
    }

    /// `cmd_queue`: enqueue a formatted command, first draining the
    /// oldest in-flight command if the ring is full.
    pub fn cmd_queue(&mut self, line: impl Into<String>) -> MailResult<String> {
        if self.ring.is_full() {
            self.drain_one()?;
        }
        Ok(self.ring.cmd_new(line))
    }

    fn drain_one(&mut self) -> MailResult<()> {
        self.flush_outbound()?;
        loop {
            match self.cmd_step()? {
                CmdState::Continue | CmdState::Respond => continue,
                _ => return Ok(()),
            }
        }
    }

    fn flush_outbound(&mut self) -> MailResult<()> {
        for cmd in self.ring.take_unsent() {
            self.conn
                .write(format!("{} {}\r\n", cmd.tag, cmd.line).as_bytes())?;
        }
        Ok(())
    }

    /// `cmd_start(cmd?, flags)`.
    pub fn cmd_start(&mut self, cmd: Option<&str>, flags: StartFlags) -> MailResult<i32> {
        if self.status == ImapStatus::Fatal {
            self.fatal_handler();
            return Ok(-1);
        }
        if let Some(c) = cmd {
            self.cmd_queue(c)?;
        }
        if flags.contains(StartFlags::QUEUE) {
            return Ok(0);
        }
        self.flush_outbound()?;
        if self.state == ImapState::Idle {
            self.state = ImapState::Selected;
        }
        Ok(0)
    }

    /// `cmd_step`: read and classify one line. Untagged lines dispatch
    /// and report `Continue`; a `+` continuation reports `Respond`; a
    /// tagged completion updates its ring slot and, once every slot is
    /// resolved, runs `cmd_finish`.
    pub fn cmd_step(&mut self) -> MailResult<CmdState> {
        let line = self.conn.readln()?;

        if let Some(body) = line.strip_prefix("* ") {
            self.dispatch_star(body)?;
            return Ok(CmdState::Continue);
        }
        if line.starts_with('+') {
            return Ok(CmdState::Respond);
        }

        let mut parts = line.splitn(2, ' ');
        let tag = parts.next().unwrap_or_default().to_string();
        let rest = parts.next().unwrap_or_default();
        let mut rest_parts = rest.splitn(2, ' ');
        let verb = rest_parts.next().unwrap_or_default();

        let new_state = match verb {
            "OK" => CmdState::Ok,
            "NO" => CmdState::No,
            "BAD" => CmdState::Bad,
            _ => {
                return Err(MailError::ProtocolError(format!(
                    "unrecognised tagged response: {line}"
                )))
            }
        };

        match self.ring.find_by_tag_mut(&tag) {
            Some(slot) => slot.state = new_state,
            None => {
                return Err(MailError::ProtocolError(format!(
                    "tagged response for unknown tag: {tag}"
                )))
            }
        }

        if self.ring.all_resolved() {
            self.cmd_finish()?;
            Ok(new_state)
        } else {
            Ok(CmdState::Continue)
        }
    }

    /// `imap_exec(cmd, flags)`.
    pub fn imap_exec(&mut self, cmd: &str, flags: ExecFlags, poll_timeout: Duration) -> MailResult<i32> {
        let start_flags = if flags.contains(ExecFlags::QUEUE) {
            StartFlags::QUEUE
        } else {
            StartFlags::empty()
        };
        self.cmd_start(Some(cmd), start_flags)?;
        if flags.contains(ExecFlags::QUEUE) {
            return Ok(0);
        }
        if flags.contains(ExecFlags::POLL) && !poll_timeout.is_zero() {
            match self.conn.poll(poll_timeout)? {
                PollOutcome::Timeout => {
                    self.fatal_handler();
                    return Ok(-1);
                }
                PollOutcome::Ready => {}
            }
        }
        loop {
            match self.cmd_step()? {
                CmdState::Continue | CmdState::Respond | CmdState::New => continue,
                CmdState::Ok => return Ok(0),
                CmdState::No => return Ok(if flags.contains(ExecFlags::FAIL_OK) { -2 } else { -1 }),
                CmdState::Bad => return Ok(-1),
            }
        }
    }

    fn cmd_finish(&mut self) -> MailResult<()> {
        if self.state == ImapState::Selected {
            if self.reopen.contains(ReopenFlags::NEWMAIL_PENDING)
                && !self.reopen.contains(ReopenFlags::EXPUNGE_PENDING)
            {
                self.check_status = CheckStatus::NewmailPending;
            } else if self.reopen.contains(ReopenFlags::EXPUNGE_PENDING) {
                if !self.reopen.contains(ReopenFlags::EXPUNGE_EXPECTED) {
                    self.check_status = CheckStatus::ExpungePending;
                }
            }
            self.reopen
                .remove(ReopenFlags::NEWMAIL_PENDING | ReopenFlags::EXPUNGE_PENDING | ReopenFlags::EXPUNGE_EXPECTED);
        }
        self.ring.drain_resolved();
        Ok(())
    }

    pub fn idle(&mut self) -> MailResult<()> {
        self.cmd_start(Some("IDLE"), StartFlags::empty())?;
        loop {
            match self.cmd_step()? {
                CmdState::Respond => {
                    self.state = ImapState::Idle;
                    return Ok(());
                }
                CmdState::Continue => continue,
                other => {
                    return Err(MailError::ProtocolError(format!(
                        "IDLE did not receive a continuation: {other:?}"
                    )))
                }
            }
        }
    }

    pub fn idle_done(&mut self) -> MailResult<()> {
        self.conn.write(b"DONE\r\n")?;
        self.state = ImapState::Selected;
        Ok(())
    }

    pub fn fatal_handler(&mut self) {
        self.status = ImapStatus::Fatal;
        if self.state == ImapState::Selected && self.reopen.contains(ReopenFlags::ALLOW) {
            self.state = ImapState::Authenticated;
            self.mailbox = None;
        }
        self.conn.close();
        if !self.recovering {
            tracing::warn!("IMAP connection lost; caller should attempt a silent reconnect");
        }
    }

    fn dispatch_star(&mut self, body: &str) -> MailResult<()> {
        if let Some(bracket) = body.strip_prefix("OK [").and_then(|s| s.split(']').next()) {
            let mut bp = bracket.splitn(2, ' ');
            if bp.next() == Some("CAPABILITY") {
                self.capabilities = bp.next().unwrap_or("").split_whitespace().map(str::to_string).collect();
            }
            return Ok(());
        }

        let mut parts = body.splitn(2, ' ');
        let first = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();

        if let Ok(n) = first.parse::<u32>() {
            let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));
            match verb.to_ascii_uppercase().as_str() {
                "EXISTS" => self.handle_exists(n),
                "EXPUNGE" => self.handle_expunge(n),
                "FETCH" => self.handle_fetch(n, args)?,
                _ => {}
            }
            return Ok(());
        }

        match first.to_ascii_uppercase().as_str() {
            "CAPABILITY" => {
                self.capabilities = rest.split_whitespace().map(str::to_string).collect();
            }
            "LIST" => {
                if let Some(entry) = self.parse_list_entry(rest)? {
                    self.list_entries.push(entry);
                }
            }
            "LSUB" => {
                if let Some(entry) = self.parse_list_entry(rest)? {
                    self.lsub_entries.push(entry);
                }
            }
            "MYRIGHTS" => self.handle_myrights(rest),
            "SEARCH" => self.handle_search(rest),
            "STATUS" => self.handle_status(rest)?,
            "ENABLED" => {
                self.unicode_enabled = rest.split_whitespace().any(|w| w.eq_ignore_ascii_case("UTF8=ACCEPT"));
            }
            "BYE" => self.handle_bye(rest),
            _ => {}
        }
        Ok(())
    }

    fn handle_exists(&mut self, n: u32) {
        let max = self.index.max_msn();
        if n > max && !self.reopen.contains(ReopenFlags::EXPUNGE_PENDING) {
            self.new_mail_count = n;
            self.reopen.insert(ReopenFlags::NEWMAIL_PENDING);
        } else if n < max && !self.reopen.contains(ReopenFlags::EXPUNGE_PENDING) {
            tracing::warn!("EXISTS reported {n} but {max} messages are already indexed");
        }
    }

    fn handle_expunge(&mut self, n: u32) {
        self.index.expunge(n);
        self.reopen.insert(ReopenFlags::EXPUNGE_PENDING);
    }

    fn handle_fetch(&mut self, n: u32, args: &str) -> MailResult<()> {
        let mut args_owned = args.trim().to_string();
        let literal_bytes = self.take_trailing_literal(&mut args_owned)?;

        let attrs = args_owned.trim().trim_start_matches('(').trim_end_matches(')');
        let tokens = tokenize_parenthesised(attrs);

        let mut uid_in_msg: Option<u32> = None;
        let mut flags_in_msg: Option<MessageFlags> = None;

        let mut i = 0;
        while i < tokens.len() {
            match tokens[i].as_str() {
                "UID" => {
                    uid_in_msg = tokens.get(i + 1).and_then(|s| s.parse().ok());
                    i += 2;
                }
                "FLAGS" => {
                    flags_in_msg = tokens.get(i + 1).map(|s| parse_flags(s));
                    i += 2;
                }
                _ => i += 1,
            }
        }

        let Some(idx) = self.index.index_for_msn(n) else {
            return Ok(());
        };
        if let Some(uid) = uid_in_msg {
            if self.index.messages[idx].uid != uid {
                return Ok(());
            }
        }
        if let Some(flags) = flags_in_msg {
            if self.index.messages[idx].changed {
                self.reopen.insert(ReopenFlags::EXPUNGE_PENDING);
            } else {
                self.check_status = CheckStatus::FlagsPending;
            }
            self.index.messages[idx].flags = flags;
        }
        if let Some(bytes) = literal_bytes {
            let uid = uid_in_msg.unwrap_or(self.index.messages[idx].uid);
            self.fetched_bodies.insert(uid, bytes);
        }
        Ok(())
    }

    /// If `args` ends in an IMAP literal marker (`{n}`), reads the `n`
    /// raw bytes that follow on the wire, reads and discards the
    /// continuation line that closes the response, and truncates the
    /// marker off `args` so the remaining attribute-value tokens parse
    /// normally.
    fn take_trailing_literal(&mut self, args: &mut String) -> MailResult<Option<Vec<u8>>> {
        let Some(open) = args.rfind('{') else {
            return Ok(None);
        };
        if !args.ends_with('}') {
            return Ok(None);
        }
        let len: usize = args[open + 1..args.len() - 1]
            .parse()
            .map_err(|_| MailError::ProtocolError(format!("bad literal length in: {args}")))?;
        let bytes = self.conn.read_exact_bytes(len)?;
        let _ = self.conn.readln()?;
        args.truncate(open);
        Ok(Some(bytes))
    }

    fn parse_list_entry(&mut self, rest: &str) -> MailResult<Option<ListEntry>> {
        let close = rest
            .find(')')
            .ok_or_else(|| MailError::ProtocolError(format!("bad LIST/LSUB: {rest}")))?;
        let flags_str = &rest[1..close];
        let remainder = rest[close + 1..].trim_start();
        let mut it = remainder.splitn(2, ' ');
        let delim_tok = it.next().unwrap_or("NIL");
        let name_tok = it.next().unwrap_or("").trim();

        let delim = if delim_tok == "NIL" {
            None
        } else {
            unquote(delim_tok).chars().next()
        };

        let name = if let Some(stripped) = name_tok.strip_prefix('{') {
            let n: usize = stripped
                .trim_end_matches('}')
                .parse()
                .map_err(|_| MailError::ProtocolError(format!("bad literal length: {name_tok}")))?;
            self.read_literal(n)?
        } else {
            unquote(name_tok).to_string()
        };

        Ok(Some(ListEntry {
            name,
            delim,
            no_select: flags_str.contains("\\Noselect"),
            no_inferiors: flags_str.contains("\\NoInferiors"),
            has_no_children: flags_str.contains("\\HasNoChildren"),
        }))
    }

    /// `{n}` literals are signalled by the line just dispatched; the
    /// body follows on the next physical line.
    fn read_literal(&mut self, n: usize) -> MailResult<String> {
        let line = self.conn.readln()?;
        Ok(line.chars().take(n).collect())
    }

    fn handle_myrights(&mut self, rest: &str) {
        if let Some((_, rights)) = rest.split_once(' ') {
            self.acl = rights.chars().filter(|c| "aeiklprstwxcd".contains(*c)).collect();
        }
    }

    fn handle_search(&mut self, rest: &str) {
        self.search_matches = rest.split_whitespace().filter_map(|s| s.parse().ok()).collect();
    }

    fn handle_status(&mut self, rest: &str) -> MailResult<()> {
        let (name, attrs) = rest
            .split_once(' ')
            .ok_or_else(|| MailError::ProtocolError(format!("bad STATUS: {rest}")))?;
        let attrs = attrs.trim().trim_start_matches('(').trim_end_matches(')');
        let tokens: Vec<&str> = attrs.split_whitespace().collect();
        let mut status = MailboxStatus::default();
        let mut i = 0;
        while i + 1 < tokens.len() {
            let val: u32 = tokens[i + 1].parse().unwrap_or(0);
            match tokens[i] {
                "MESSAGES" => status.messages = Some(val),
                "RECENT" => status.recent = Some(val),
                "UIDNEXT" => status.uidnext = Some(val),
                "UIDVALIDITY" => status.uidvalidity = Some(val),
                "UNSEEN" => status.unseen = Some(val),
                _ => {}
            }
            i += 2;
        }
        self.mailbox_status.insert(unquote(name).to_string(), status);
        Ok(())
    }

    fn handle_bye(&mut self, rest: &str) {
        if self.logging_out {
            return;
        }
        self.err_msg = Some(rest.to_string());
        self.fatal_handler();
    }
}

fn tokenize_parenthesised(attrs: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();
    for c in attrs.chars() {
        match c {
            '(' => {
                depth += 1;
                cur.push(c);
            }
            ')' => {
                depth -= 1;
                cur.push(c);
            }
            ' ' if depth == 0 => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

fn parse_flags(raw: &str) -> MessageFlags {
    let inner = raw.trim_start_matches('(').trim_end_matches(')');
    let mut flags = MessageFlags::empty();
    for tok in inner.split_whitespace() {
        match tok.trim_start_matches('\\').to_ascii_lowercase().as_str() {
            "seen" => flags |= MessageFlags::SEEN,
            "deleted" => flags |= MessageFlags::DELETED,
            "flagged" => flags |= MessageFlags::FLAGGED,
            "answered" => flags |= MessageFlags::REPLIED,
            _ => {}
        }
    }
    flags
}

fn unquote(s: &str) -> &str {
    s.trim_matches('"')
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_core::test_support::{connection_with, MemoryTransport};

    fn connect(transport: MemoryTransport) -> ImapSession {
        transport.push_server_line("* OK IMAP4rev1 ready");
        let conn = connection_with(transport);
        ImapSession::connect(conn, 16).unwrap()
    }

    #[test]
    fn interleaved_expunge_and_exists_matches_s4() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        for uid in 1..=5u32 {
            session.index.push_new(uid);
        }

        session.dispatch_star("3 EXPUNGE").unwrap();
        assert_eq!(session.index.max_msn(), 4);
        assert!(session.reopen.contains(ReopenFlags::EXPUNGE_PENDING));

        session.dispatch_star("4 EXISTS").unwrap();
        assert_eq!(session.new_mail_count, 0);
        assert!(!session.reopen.contains(ReopenFlags::NEWMAIL_PENDING));
    }

    #[test]
    fn list_with_a_literal_name_matches_s5() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        transport.push_server_line("INBOX/Drafts");
        session
            .dispatch_star("LIST (\\HasNoChildren) \"/\" {13}")
            .unwrap();
        assert_eq!(session.list_entries.len(), 1);
        let entry = &session.list_entries[0];
        assert_eq!(entry.name, "INBOX/Drafts");
        assert_eq!(entry.delim, Some('/'));
        assert!(entry.has_no_children);
        assert!(!entry.no_select);
    }

    #[test]
    fn list_with_a_quoted_name_needs_no_extra_read() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        session
            .dispatch_star("LIST (\\HasNoChildren) \"/\" \"INBOX\"")
            .unwrap();
        assert_eq!(session.list_entries[0].name, "INBOX");
    }

    #[test]
    fn fetch_updates_flags_when_uid_matches() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        session.index.push_new(42);
        session.dispatch_star("1 FETCH (UID 42 FLAGS (\\Seen \\Flagged))").unwrap();
        let idx = session.index.index_for_uid(42).unwrap();
        assert!(session.index.messages[idx].flags.contains(MessageFlags::SEEN));
        assert!(session.index.messages[idx].flags.contains(MessageFlags::FLAGGED));
    }

    #[test]
    fn fetch_drops_the_update_when_uid_mismatches() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        session.index.push_new(42);
        session.dispatch_star("1 FETCH (UID 99 FLAGS (\\Seen))").unwrap();
        let idx = session.index.index_for_uid(42).unwrap();
        assert!(session.index.messages[idx].flags.is_empty());
    }

    #[test]
    fn status_parses_the_key_value_list() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        session
            .dispatch_star("STATUS INBOX (MESSAGES 5 RECENT 0 UIDNEXT 10 UIDVALIDITY 1 UNSEEN 2)")
            .unwrap();
        let status = session.mailbox_status.get("INBOX").unwrap();
        assert_eq!(status.messages, Some(5));
        assert_eq!(status.unseen, Some(2));
    }

    #[test]
    fn bye_after_self_initiated_logout_does_not_go_fatal() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        session.logging_out = true;
        session.dispatch_star("BYE logging out").unwrap();
        assert_eq!(session.status, ImapStatus::Ok);
    }

    #[test]
    fn unsolicited_bye_triggers_the_fatal_handler() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        session.dispatch_star("BYE server shutting down").unwrap();
        assert_eq!(session.status, ImapStatus::Fatal);
        assert_eq!(session.err_msg.as_deref(), Some("server shutting down"));
    }

    #[test]
    fn imap_exec_runs_a_tagged_command_to_completion() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        transport.push_server_line("a0000 OK NOOP completed");
        let rc = session.imap_exec("NOOP", ExecFlags::empty(), Duration::ZERO).unwrap();
        assert_eq!(rc, 0);
        assert_eq!(transport.written(), b"a0000 NOOP\r\n");
    }

    #[test]
    fn fetch_body_reads_a_literal_with_embedded_crlf() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        session.index.push_new(7);
        let body = b"From: a@b\r\nSubject: hi\r\n\r\nline one\r\nline two\r\n";
        {
            // Real IMAP wire format: the literal's declared length
            // covers exactly `body`, and the closing `)` of the FETCH
            // response follows immediately after those bytes — no
            // extra CRLF is inserted between the literal and the `)`.
            let mut buf = transport.from_server.lock().unwrap();
            buf.extend(format!("* 1 FETCH (UID 7 BODY[] {{{}}}\r\n", body.len()).as_bytes());
            buf.extend(body);
            buf.extend(b")\r\n");
            buf.extend(b"a0000 OK UID FETCH completed\r\n");
        }
        let fetched = session.fetch_body(7).unwrap();
        assert_eq!(fetched, body);
    }

    #[test]
    fn imap_exec_reports_no_with_fail_ok_as_minus_two() {
        let transport = MemoryTransport::new();
        let mut session = connect(transport.clone());
        transport.push_server_line("a0000 NO mailbox does not exist");
        let rc = session
            .imap_exec("SELECT Missing", ExecFlags::FAIL_OK, Duration::ZERO)
            .unwrap();
        assert_eq!(rc, -2);
    }
}
