//! The MTA handoff side of §4.I. The actual SMTP wire protocol is out
//! of scope (§1 non-goal: SMTP client) — this module hands a
//! reconstituted message to whatever `MtaTransport` the caller
//! configures. `SmtpMta` is the batteries-included implementation,
//! built on `lettre`'s synchronous transport rather than a hand-rolled
//! client.

use lettre::address::Envelope as LettreEnvelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::SmtpTransport;
use lettre::{Address, Transport};

use mail_core::error::{MailError, MailResult};

/// Implemented by whatever hands a fully-encoded message off to a
/// mail transfer agent. A test double can record calls instead of
/// opening a socket.
pub trait MtaTransport {
    fn send_raw(&self, from: &str, to: &[String], raw: &[u8]) -> MailResult<()>;
}

/// `lettre::SmtpTransport`-backed MTA: relays to a configured SMTP
/// smarthost over implicit TLS.
pub struct SmtpMta {
    transport: SmtpTransport,
}

impl SmtpMta {
    pub fn relay(host: &str) -> MailResult<SmtpMta> {
        let transport = SmtpTransport::relay(host)
            .map_err(|e| MailError::ViewerError(format!("could not configure MTA relay {host}: {e}")))?
            .build();
        Ok(SmtpMta { transport })
    }

    pub fn relay_with_auth(host: &str, username: &str, password: &str) -> MailResult<SmtpMta> {
        let transport = SmtpTransport::relay(host)
            .map_err(|e| MailError::ViewerError(format!("could not configure MTA relay {host}: {e}")))?
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        Ok(SmtpMta { transport })
    }
}

impl MtaTransport for SmtpMta {
    fn send_raw(&self, from: &str, to: &[String], raw: &[u8]) -> MailResult<()> {
        let envelope = build_envelope(from, to)?;
        self.transport
            .send_raw(&envelope, raw)
            .map_err(|e| MailError::ViewerError(format!("MTA rejected the message: {e}")))?;
        Ok(())
    }
}

fn build_envelope(from: &str, to: &[String]) -> MailResult<LettreEnvelope> {
    let from_addr: Address = from
        .parse()
        .map_err(|e| MailError::ViewerError(format!("invalid envelope sender {from}: {e}")))?;
    let to_addrs: Vec<Address> = to
        .iter()
        .map(|addr| {
            addr.parse()
                .map_err(|e| MailError::ViewerError(format!("invalid recipient {addr}: {e}")))
        })
        .collect::<MailResult<_>>()?;
    LettreEnvelope::new(Some(from_addr), to_addrs)
        .map_err(|e| MailError::ViewerError(format!("could not build envelope: {e}")))
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingMta;
    use super::*;

    #[test]
    fn recording_mta_captures_the_handoff() {
        let mta = RecordingMta::default();
        mta.send_raw("a@b.com", &["c@d.com".into()], b"raw message").unwrap();
        let calls = mta.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "a@b.com");
    }
}
