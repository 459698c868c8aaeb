//! The error taxonomy shared by every crate in the mail-access core.

use std::io;

/// Kinds of failure a mailbox operation can surface, per the taxonomy
/// in the core specification. These are kinds, not protocol-specific
/// detail: `mail-pop` and `mail-imap` both map their wire-level errors
/// down onto this enum so callers can make one set of recovery
/// decisions regardless of which driver they're talking to.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Socket or file descriptor closed/failed mid-operation.
    #[error("connection lost: {0}")]
    IoLost(String),

    /// Server response did not parse or violated the expected grammar.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Syntactically valid NO/-ERR response; recoverable at the
    /// caller's discretion.
    #[error("server refused: {0}")]
    ServerRefused(String),

    /// Credentials rejected, or no authenticator applicable.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// User aborted credential entry.
    #[error("authentication cancelled")]
    AuthCancelled,

    /// TLS required but not negotiable.
    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    /// Body/header cache I/O failure; non-fatal, caller degrades.
    #[error("cache error: {0}")]
    CacheError(String),

    /// MIME decoding produced no output or malformed structure.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// External command could not be spawned or exited nonzero.
    #[error("viewer error: {0}")]
    ViewerError(String),

    /// Quad-option answered "no" at a mandatory prompt.
    #[error("user aborted the operation")]
    UserAbort,
}

pub type MailResult<T> = Result<T, MailError>;

impl From<io::Error> for MailError {
    fn from(err: io::Error) -> Self {
        MailError::IoLost(err.to_string())
    }
}

impl From<native_tls::Error> for MailError {
    fn from(err: native_tls::Error) -> Self {
        MailError::EncryptionUnavailable(err.to_string())
    }
}

impl MailError {
    /// True for failures that should trigger a reconnect-and-retry
    /// decision at the driver boundary, per the core's propagation
    /// policy (transport losses are the only ones that get retried
    /// implicitly).
    pub fn is_transport_loss(&self) -> bool {
        matches!(self, MailError::IoLost(_))
    }
}
