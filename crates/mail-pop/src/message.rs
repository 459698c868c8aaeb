//! One entry in a POP mailbox.

/// `uid` is the server's durable identifier; `refno` is the ephemeral
/// per-session message number. `refno = None` replaces the source's
/// `-1` sentinel: "not present in the current session" (§9 redesign
/// notes — error sentinels become `Option`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopMessage {
    pub uid: String,
    pub refno: Option<u32>,
    pub deleted: bool,
    pub seen: bool,
    pub old: bool,
}

impl PopMessage {
    pub fn new(uid: impl Into<String>, refno: u32) -> PopMessage {
        PopMessage {
            uid: uid.into(),
            refno: Some(refno),
            deleted: false,
            seen: false,
            old: false,
        }
    }

    /// The server dropped this message out from under us (not seen in
    /// the most recent `UIDL`).
    pub fn mark_vacated(&mut self) {
        self.refno = None;
        self.deleted = true;
    }
}
