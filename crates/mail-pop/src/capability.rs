//! Capability negotiation (§4.F). Three discovery modes share the
//! same parser; they differ only in what the caller does with the
//! result afterwards.

use mail_core::error::MailResult;
use mail_core::tristate::Capability;

use crate::wire;
use mail_core::connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Initial,
    PostStls,
    PostAuth,
}

#[derive(Debug, Clone, Default)]
pub struct PopCapabilities {
    pub cmd_capa: Capability,
    pub cmd_stls: Capability,
    pub cmd_user: Capability,
    pub cmd_uidl: Capability,
    pub cmd_top: Capability,
    pub auth_list: Vec<String>,
    pub login_delay: Option<u32>,
    pub expire: Option<i32>,
}

impl PopCapabilities {
    fn reset(&mut self) {
        *self = PopCapabilities::default();
    }

    fn apply_capa_line(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else { return };
        match keyword {
            "STLS" => self.cmd_stls = Capability::Supported,
            "USER" => self.cmd_user = Capability::Supported,
            "UIDL" => self.cmd_uidl = Capability::Supported,
            "TOP" => self.cmd_top = Capability::Supported,
            "SASL" => self.auth_list = parts.map(str::to_string).collect(),
            "LOGIN-DELAY" => self.login_delay = parts.next().and_then(|v| v.parse().ok()),
            "EXPIRE" => self.expire = parts.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
}

/// Run one round of capability discovery, mutating `caps` in place.
pub fn discover(
    conn: &mut Connection,
    caps: &mut PopCapabilities,
    mode: DiscoveryMode,
) -> MailResult<()> {
    if mode == DiscoveryMode::Initial {
        caps.reset();
    }

    match wire::command(conn, "CAPA") {
        Ok(_) => {
            caps.cmd_capa = Capability::Supported;
            for line in wire::read_multiline(conn)? {
                caps.apply_capa_line(&line);
            }
        }
        Err(_) if mode == DiscoveryMode::Initial => {
            caps.cmd_capa = Capability::Unsupported;
            caps.cmd_user = Capability::Unknown;
            caps.cmd_uidl = Capability::Unknown;
            caps.cmd_top = Capability::Unknown;
            // Fall back to AUTH to collect at least the SASL mechanism
            // list; servers without CAPA still usually have this.
            if wire::command(conn, "AUTH").is_ok() {
                caps.auth_list = wire::read_multiline(conn)?;
            }
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

/// post-auth recheck: `TOP`/`UIDL` must be present when `CAPA` was the
/// source of truth, or a mandatory feature is missing.
pub fn verify_post_auth(caps: &PopCapabilities) -> MailResult<()> {
    if caps.cmd_capa.is_known() && caps.cmd_capa.is_supported() {
        if !caps.cmd_uidl.is_supported() {
            return Err(mail_core::error::MailError::ProtocolError(
                "server does not support UIDL after authentication".into(),
            ));
        }
        if !caps.cmd_top.is_supported() {
            return Err(mail_core::error::MailError::ProtocolError(
                "server does not support TOP after authentication".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_core::test_support::{connection_with, MemoryTransport};

    #[test]
    fn capa_success_sets_flags_and_sasl_list() {
        let transport = MemoryTransport::new();
        transport.push_server_line("+OK");
        transport.push_server_line("UIDL");
        transport.push_server_line("TOP");
        transport.push_server_line("USER");
        transport.push_server_line("SASL PLAIN LOGIN");
        transport.push_server_line(".");
        let mut conn = connection_with(transport);
        let mut caps = PopCapabilities::default();
        discover(&mut conn, &mut caps, DiscoveryMode::Initial).unwrap();
        assert!(caps.cmd_uidl.is_supported());
        assert!(caps.cmd_top.is_supported());
        assert!(caps.cmd_user.is_supported());
        assert_eq!(caps.auth_list, vec!["PLAIN", "LOGIN"]);
    }

    #[test]
    fn capa_unsupported_marks_probes_unknown_not_false() {
        let transport = MemoryTransport::new();
        transport.push_server_line("-ERR unknown command");
        transport.push_server_line("+OK");
        transport.push_server_line("PLAIN");
        transport.push_server_line(".");
        let mut conn = connection_with(transport);
        let mut caps = PopCapabilities::default();
        discover(&mut conn, &mut caps, DiscoveryMode::Initial).unwrap();
        assert_eq!(caps.cmd_uidl, Capability::Unknown);
        assert_eq!(caps.cmd_top, Capability::Unknown);
        assert_eq!(caps.auth_list, vec!["PLAIN"]);
    }

    #[test]
    fn verify_post_auth_rejects_missing_uidl_when_capa_is_authoritative() {
        let mut caps = PopCapabilities::default();
        caps.cmd_capa = Capability::Supported;
        caps.cmd_top = Capability::Supported;
        assert!(verify_post_auth(&caps).is_err());
    }
}
