//! The POP session state machine and the four operations built on it:
//! header sync (`fetch_headers`), fetch-into-spool, sync (delete +
//! quit), and reconnect.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::Path;

use mail_cache::{BodyCache, CachedHeader, HeaderCache};
use mail_core::account::{Account, CredentialProvider};
use mail_core::config::MailConfig;
use mail_core::connection::Connection;
use mail_core::driver::MailboxSink;
use mail_core::error::{MailError, MailResult};

use crate::auth;
use crate::capability::{self, DiscoveryMode, PopCapabilities};
use crate::message::PopMessage;
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopStatus {
    None,
    Connected,
    Disconnected,
}

pub struct PopSession {
    conn: Connection,
    pub status: PopStatus,
    pub caps: PopCapabilities,
    pub apop_timestamp: Option<String>,
    /// Mailbox size in octets, from `STAT`'s second field.
    pub size: Option<u64>,
    pub messages: Vec<PopMessage>,
    pub clear_cache: bool,
    pub err_msg: Option<String>,
}

impl PopSession {
    /// Runs the connection sequence (§4.F) over an already-open
    /// socket: greeting, capability discovery, optional STLS upgrade,
    /// the authenticator chain, a post-auth capability recheck, and
    /// `STAT`. `tls_upgrade` performs the in-place socket upgrade; it
    /// is `None` in tests, where STLS is simply not exercised.
    pub fn start(
        mut conn: Connection,
        account: &Account,
        creds: &dyn CredentialProvider,
        config: &MailConfig,
        tls_upgrade: Option<&dyn Fn(&mut Connection) -> MailResult<()>>,
    ) -> MailResult<PopSession> {
        let greeting = conn.readln()?;
        if !wire::is_ok(&greeting) {
            return Err(MailError::ProtocolError(format!(
                "bad greeting: {greeting}"
            )));
        }
        let apop_timestamp = extract_apop_timestamp(&greeting);

        let mut caps = PopCapabilities::default();
        capability::discover(&mut conn, &mut caps, DiscoveryMode::Initial)?;

        let wants_tls = account.wants_tls() || config.force_tls;
        if wants_tls && !conn.is_encrypted() {
            if caps.cmd_stls.is_supported() {
                wire::command(&mut conn, "STLS")?;
                conn.empty()?;
                match tls_upgrade {
                    Some(upgrade) => upgrade(&mut conn)?,
                    None => {
                        return Err(MailError::EncryptionUnavailable(
                            "no TLS upgrade hook supplied".into(),
                        ))
                    }
                }
                capability::discover(&mut conn, &mut caps, DiscoveryMode::PostStls)?;
            } else if config.force_tls {
                return Err(MailError::EncryptionUnavailable(
                    "server does not advertise STLS".into(),
                ));
            }
        }

        auth::authenticate_chain(&mut conn, account, creds, &caps, apop_timestamp.as_deref(), config)?;

        capability::discover(&mut conn, &mut caps, DiscoveryMode::PostAuth)?;
        capability::verify_post_auth(&caps)?;

        let stat = wire::command(&mut conn, "STAT")?;
        let size = stat.split_whitespace().nth(1).and_then(|s| s.parse().ok());

        Ok(PopSession {
            conn,
            status: PopStatus::Connected,
            caps,
            apop_timestamp,
            size,
            messages: Vec::new(),
            clear_cache: false,
            err_msg: None,
        })
    }

    pub fn host(&self) -> &str {
        self.conn.host()
    }

    pub fn close(&mut self) {
        self.conn.close();
        self.status = PopStatus::Disconnected;
    }

    /// `pop_fetch_headers`: reconciles the in-memory message list
    /// against a fresh `UIDL`, then fills in headers for any newly
    /// appeared messages from the header cache or, on a miss,
    /// `LIST`+`TOP 0`.
    pub fn fetch_headers(
        &mut self,
        hcache_root: Option<&Path>,
        bcache: Option<&BodyCache>,
        config: &MailConfig,
    ) -> MailResult<()> {
        for msg in &mut self.messages {
            msg.refno = None;
        }

        wire::command(&mut self.conn, "UIDL")?;
        let lines = wire::read_multiline(&mut self.conn)?;

        let old_count = self.messages.len();
        let mut expected_existing_index = 0usize;

        for line in &lines {
            let mut parts = line.split_whitespace();
            let refno: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| MailError::ProtocolError(format!("bad UIDL line: {line}")))?;
            let uid = parts
                .next()
                .ok_or_else(|| MailError::ProtocolError(format!("bad UIDL line: {line}")))?;

            if let Some(existing_idx) = self.messages.iter().position(|m| m.uid == uid) {
                if existing_idx < old_count {
                    if existing_idx != expected_existing_index {
                        self.clear_cache = true;
                    }
                    expected_existing_index += 1;
                }
                self.messages[existing_idx].refno = Some(refno);
            } else {
                self.messages.push(PopMessage::new(uid, refno));
            }
        }

        for msg in self.messages.iter_mut().take(old_count) {
            if msg.refno.is_none() {
                msg.deleted = true;
            }
        }

        let mut hcache = match hcache_root {
            Some(root) => Some(HeaderCache::open(root, self.conn.host())?),
            None => None,
        };

        let new_indices: Vec<usize> = (old_count..self.messages.len()).collect();
        for idx in new_indices {
            let uid = self.messages[idx].uid.clone();
            let refno = self.messages[idx]
                .refno
                .expect("message just appended from a UIDL line carries a refno");

            let cached = hcache.as_ref().and_then(|hc| hc.fetch(&uid).cloned());
            if cached.is_none() {
                let list_reply = wire::command(&mut self.conn, &format!("LIST {refno}"))?;
                let total_len = parse_octet_count(&list_reply)?;

                wire::command(&mut self.conn, &format!("TOP {refno} 0"))?;
                let header_lines = wire::read_multiline(&mut self.conn)?;
                let header_text = header_lines.join("\r\n");
                let header_offset = header_text.len() as u64 + 2;
                let body_len = total_len.saturating_sub(header_offset);

                let header = parse_cached_header(&header_lines, body_len);
                if let Some(hc) = hcache.as_mut() {
                    hc.store(&uid, header);
                }
            }

            let body_is_cached = bcache.map(|bc| bc.exists(&uid).is_ok()).unwrap_or(false);
            if body_is_cached {
                self.messages[idx].seen = true;
            } else if config.mark_old {
                self.messages[idx].old = true;
            }
        }

        if let Some(hc) = hcache.as_mut() {
            hc.flush()?;
        }

        if config.clean_cache {
            if let Some(bc) = bcache {
                let known: HashSet<&str> = self.messages.iter().map(|m| m.uid.as_str()).collect();
                let mut stale = Vec::new();
                bc.list(&mut |id: &str| {
                    if !known.contains(id) {
                        stale.push(id.to_string());
                    }
                    ControlFlow::Continue(())
                });
                for id in stale {
                    let _ = bc.del(&id);
                }
            }
        }

        Ok(())
    }

    /// `pop_mbox_sync`: `DELE` every message marked `deleted` with a
    /// live `refno`, then `QUIT`. A refused `DELE` aborts before
    /// `QUIT` is sent, per §8 S3 — the server only performs deletions
    /// on a graceful logout, so leaving early preserves the mailbox.
    pub fn sync(&mut self, bcache: Option<&BodyCache>, hcache_root: Option<&Path>) -> MailResult<()> {
        let mut hcache = match hcache_root {
            Some(root) => Some(HeaderCache::open(root, self.conn.host())?),
            None => None,
        };

        let to_delete: Vec<(u32, String)> = self
            .messages
            .iter()
            .filter(|m| m.deleted)
            .filter_map(|m| m.refno.map(|r| (r, m.uid.clone())))
            .collect();

        for (refno, _) in &to_delete {
            wire::command(&mut self.conn, &format!("DELE {refno}"))?;
        }

        wire::command(&mut self.conn, "QUIT")?;

        for (_, uid) in &to_delete {
            if let Some(bc) = bcache {
                let _ = bc.del(uid);
            }
            if let Some(hc) = hcache.as_mut() {
                hc.delete(uid);
            }
        }
        if let Some(hc) = hcache.as_mut() {
            hc.flush()?;
        }
        self.clear_cache = true;
        self.status = PopStatus::Disconnected;
        Ok(())
    }

    /// `STAT` → total count; if `pop_last` is enabled, `LAST` bounds
    /// the loop from below. `RETR`s each remaining message into
    /// `sink`; a write failure sends `RSET` before `QUIT` so nothing
    /// already on the server is lost.
    pub fn fetch_into_spool(
        &mut self,
        sink: &mut dyn MailboxSink,
        config: &MailConfig,
        delete_after_fetch: bool,
    ) -> MailResult<usize> {
        let stat = wire::command(&mut self.conn, "STAT")?;
        let msg_count: u32 = stat
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MailError::ProtocolError(format!("bad STAT reply: {stat}")))?;

        let last = if config.pop_last {
            match wire::command(&mut self.conn, "LAST") {
                Ok(text) => text.trim().parse::<u32>().unwrap_or(0),
                Err(_) => 0,
            }
        } else {
            0
        };

        let mut fetched = 0usize;
        for i in (last + 1)..=msg_count {
            if let Err(e) = self.retrieve_one(i, sink, delete_after_fetch) {
                let _ = wire::command(&mut self.conn, "RSET");
                let _ = wire::command(&mut self.conn, "QUIT");
                return Err(e);
            }
            fetched += 1;
        }
        wire::command(&mut self.conn, "QUIT")?;
        Ok(fetched)
    }

    fn retrieve_one(
        &mut self,
        refno: u32,
        sink: &mut dyn MailboxSink,
        delete_after_fetch: bool,
    ) -> MailResult<()> {
        let raw = self.retrieve_raw(refno)?;
        sink.append_message(&raw, true, false)?;
        if delete_after_fetch {
            wire::command(&mut self.conn, &format!("DELE {refno}"))?;
        }
        Ok(())
    }

    /// `RETR refno`, reassembled into one RFC 822 byte blob. Used both
    /// by the spool-fetch loop and by `MailboxDriver::msg_open`.
    pub fn retrieve_raw(&mut self, refno: u32) -> MailResult<Vec<u8>> {
        wire::command(&mut self.conn, &format!("RETR {refno}"))?;
        let lines = wire::read_multiline(&mut self.conn)?;
        let mut raw = lines.join("\r\n").into_bytes();
        raw.extend_from_slice(b"\r\n");
        Ok(raw)
    }

    /// Reopen the socket, re-authenticate, and rebuild the UID→refno
    /// map with a fresh `UIDL` — message content (headers, flags) is
    /// untouched. `open_conn` supplies the new transport so tests can
    /// hand back another `MemoryTransport`.
    pub fn reconnect(
        &mut self,
        open_conn: impl FnOnce() -> MailResult<Connection>,
        account: &Account,
        creds: &dyn CredentialProvider,
        config: &MailConfig,
    ) -> MailResult<()> {
        self.conn.close();
        let fresh = PopSession::start(open_conn()?, account, creds, config, None)?;
        self.conn = fresh.conn;
        self.caps = fresh.caps;
        self.apop_timestamp = fresh.apop_timestamp;
        self.size = fresh.size;
        self.status = PopStatus::Connected;

        for msg in &mut self.messages {
            msg.refno = None;
        }
        wire::command(&mut self.conn, "UIDL")?;
        for line in wire::read_multiline(&mut self.conn)? {
            let mut parts = line.split_whitespace();
            let Some(refno) = parts.next().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Some(uid) = parts.next() else { continue };
            if let Some(existing) = self.messages.iter_mut().find(|m| m.uid == uid) {
                existing.refno = Some(refno);
            }
        }
        Ok(())
    }
}

fn extract_apop_timestamp(greeting: &str) -> Option<String> {
    let start = greeting.find('<')?;
    let end = greeting[start..].find('>')? + start;
    let candidate = &greeting[start..=end];
    candidate.contains('@').then(|| candidate.to_string())
}

fn parse_octet_count(status_text: &str) -> MailResult<u64> {
    status_text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| MailError::ProtocolError(format!("bad LIST reply: {status_text}")))
}

fn parse_cached_header(lines: &[String], body_len: u64) -> CachedHeader {
    let mut joined: Vec<String> = Vec::new();
    for line in lines {
        if (line.starts_with(' ') || line.starts_with('\t')) && !joined.is_empty() {
            let last = joined.last_mut().expect("checked non-empty above");
            last.push(' ');
            last.push_str(line.trim_start());
        } else {
            joined.push(line.clone());
        }
    }

    let mut header = CachedHeader {
        body_len,
        ..CachedHeader::default()
    };
    for line in &joined {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.to_ascii_lowercase().as_str() {
            "from" => header.from = value,
            "to" => header.to = value,
            "cc" => header.cc = value,
            "subject" => header.subject = value,
            "message-id" => header.message_id = value,
            "references" => header.references = value,
            "in-reply-to" => header.in_reply_to = value,
            "date" => header.date = value,
            _ => {}
        }
    }
    header
}
