//! Tri-state capability flags: `Unknown` is never conflated with
//! `Unsupported`. POP's `USER`/`UIDL`/`TOP` probes and IMAP's optional
//! extensions both use this.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Unknown,
    Supported,
    Unsupported,
}

impl Capability {
    pub fn is_supported(self) -> bool {
        matches!(self, Capability::Supported)
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Capability::Unknown)
    }
}

impl Default for Capability {
    fn default() -> Self {
        Capability::Unknown
    }
}
