//! MSN↔UID bookkeeping for the currently SELECTED mailbox (§3
//! `ImapMessage`, §9 redesign notes). `msn_index[msn-1] = None` is the
//! replacement for the source's `INT_MAX` "gone" sentinel.

use std::collections::HashMap;

use mail_core::driver::MessageFlags;

#[derive(Debug, Clone)]
pub struct ImapMessage {
    pub uid: u32,
    pub msn: u32,
    pub active: bool,
    pub changed: bool,
    pub flags: MessageFlags,
}

#[derive(Debug, Default)]
pub struct MailboxIndex {
    pub messages: Vec<ImapMessage>,
    pub msn_index: Vec<Option<usize>>,
    pub uid_hash: HashMap<u32, usize>,
}

impl MailboxIndex {
    pub fn max_msn(&self) -> u32 {
        self.msn_index.len() as u32
    }

    pub fn index_for_msn(&self, msn: u32) -> Option<usize> {
        self.msn_index
            .get(msn.checked_sub(1)? as usize)
            .copied()
            .flatten()
    }

    pub fn index_for_uid(&self, uid: u32) -> Option<usize> {
        self.uid_hash.get(&uid).copied()
    }

    pub fn push_new(&mut self, uid: u32) -> usize {
        let idx = self.messages.len();
        let msn = self.msn_index.len() as u32 + 1;
        self.messages.push(ImapMessage {
            uid,
            msn,
            active: true,
            changed: false,
            flags: MessageFlags::empty(),
        });
        self.msn_index.push(Some(idx));
        self.uid_hash.insert(uid, idx);
        idx
    }

    /// Marks the message at MSN `msn` gone, shifts every following MSN
    /// down by one, and returns the expunged message's UID.
    pub fn expunge(&mut self, msn: u32) -> Option<u32> {
        let idx0 = msn.checked_sub(1)? as usize;
        if idx0 >= self.msn_index.len() {
            return None;
        }
        let removed = self.msn_index.remove(idx0);
        let uid = removed.map(|i| {
            self.messages[i].active = false;
            self.uid_hash.remove(&self.messages[i].uid);
            self.messages[i].uid
        });
        for slot in self.msn_index.iter().skip(idx0) {
            if let Some(i) = slot {
                self.messages[*i].msn -= 1;
            }
        }
        uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expunge_of_msn_k_shifts_every_later_msn_down_by_one() {
        // S4-adjacent: mailbox of 5, EXPUNGE MSN 3.
        let mut index = MailboxIndex::default();
        for uid in 1..=5u32 {
            index.push_new(uid);
        }
        let expunged_uid = index.expunge(3).unwrap();
        assert_eq!(expunged_uid, 3);
        assert_eq!(index.max_msn(), 4);
        assert_eq!(index.messages[index.index_for_uid(4).unwrap()].msn, 3);
        assert_eq!(index.messages[index.index_for_uid(5).unwrap()].msn, 4);
        assert!(!index.uid_hash.contains_key(&3));
    }
}
