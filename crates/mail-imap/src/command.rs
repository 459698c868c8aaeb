//! The tagged-command ring (§3 `cmds[ring of N slots]`, §4.G). A
//! `VecDeque` stands in for the source's fixed-size array-plus-modulo
//! indices; "full" and "drain the head" become plain deque
//! operations instead of manual wraparound arithmetic.

use std::collections::VecDeque;

/// Tags wrap at this value, per §6's `a%04u` format and §4.G.
pub const TAG_WRAP: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdState {
    New,
    Ok,
    No,
    Bad,
    Respond,
    Continue,
}

#[derive(Debug, Clone)]
pub struct ImapCommand {
    pub tag: String,
    pub state: CmdState,
    pub line: String,
    sent: bool,
}

pub struct CommandRing {
    slots: VecDeque<ImapCommand>,
    capacity: usize,
    next_tag: u32,
}

impl CommandRing {
    pub fn new(capacity: usize) -> CommandRing {
        CommandRing {
            slots: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_tag: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Allocates the next tag, queues the command line (unsent), and
    /// returns the tag.
    pub fn cmd_new(&mut self, line: impl Into<String>) -> String {
        let tag = format!("a{:04}", self.next_tag);
        self.next_tag = (self.next_tag + 1) % TAG_WRAP;
        self.slots.push_back(ImapCommand {
            tag: tag.clone(),
            state: CmdState::New,
            line: line.into(),
            sent: false,
        });
        tag
    }

    /// Returns every not-yet-sent command, in submission order, and
    /// marks them sent.
    pub fn take_unsent(&mut self) -> Vec<ImapCommand> {
        let mut out = Vec::new();
        for cmd in self.slots.iter_mut() {
            if !cmd.sent {
                cmd.sent = true;
                out.push(cmd.clone());
            }
        }
        out
    }

    pub fn find_by_tag_mut(&mut self, tag: &str) -> Option<&mut ImapCommand> {
        self.slots.iter_mut().find(|c| c.tag == tag)
    }

    pub fn all_resolved(&self) -> bool {
        self.slots.iter().all(|c| c.state != CmdState::New)
    }

    /// Pops every resolved command from the head, stopping at the
    /// first still-`New` slot.
    pub fn drain_resolved(&mut self) -> Vec<ImapCommand> {
        let mut drained = Vec::new();
        while let Some(front) = self.slots.front() {
            if front.state == CmdState::New {
                break;
            }
            drained.push(self.slots.pop_front().expect("front() just confirmed Some"));
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_new_assigns_sequential_tags() {
        let mut ring = CommandRing::new(4);
        assert_eq!(ring.cmd_new("NOOP"), "a0000");
        assert_eq!(ring.cmd_new("NOOP"), "a0001");
    }

    #[test]
    fn take_unsent_only_returns_each_command_once() {
        let mut ring = CommandRing::new(4);
        ring.cmd_new("NOOP");
        let first = ring.take_unsent();
        assert_eq!(first.len(), 1);
        let second = ring.take_unsent();
        assert!(second.is_empty());
    }

    #[test]
    fn is_full_respects_capacity() {
        let mut ring = CommandRing::new(2);
        ring.cmd_new("A");
        assert!(!ring.is_full());
        ring.cmd_new("B");
        assert!(ring.is_full());
    }

    #[test]
    fn drain_resolved_stops_at_the_first_new_slot() {
        let mut ring = CommandRing::new(4);
        let tag_a = ring.cmd_new("A");
        ring.cmd_new("B");
        ring.find_by_tag_mut(&tag_a).unwrap().state = CmdState::Ok;
        let drained = ring.drain_resolved();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].tag, tag_a);
        assert_eq!(ring.len(), 1);
    }
}
