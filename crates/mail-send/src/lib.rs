//! Send/Resend orchestrator (§4.I): reconstitutes a stored message,
//! re-encodes its body where the transport needs it, and hands the
//! result to an `MtaTransport`. The SMTP wire protocol itself is out
//! of scope (§1 non-goal: SMTP client) — `SmtpMta` delegates that to
//! `lettre`.

pub mod mta;
pub mod resend;

pub use mta::{MtaTransport, SmtpMta};
pub use resend::{resend, send_reply};
