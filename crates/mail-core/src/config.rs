//! The narrow configuration surface the core actually needs. Loading
//! this from a config file, expanding hooks/aliases, etc. is a
//! non-goal (§1) left to the caller; this struct is what the caller
//! hands in once it has resolved all of that.

use std::time::Duration;

use crate::quad::QuadOption;

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Force TLS even if the scheme didn't request it; fail hard if
    /// it can't be negotiated (§4.F connection sequence, step 4).
    pub force_tls: bool,
    /// POP: try `LAST` and only fetch messages after it.
    pub pop_last: bool,
    /// POP: treat a header-only cached message as `old` rather than
    /// unread.
    pub mark_old: bool,
    /// POP: after loading, delete cache entries with no matching
    /// mailbox id.
    pub clean_cache: bool,
    /// Whether an authenticator may fall back to the next method
    /// after an outright `Failure` (vs. stopping there).
    pub auth_try_all: bool,
    /// Socket connect and read timeouts.
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// IMAP: poll timeout before a command-in-flight is treated as
    /// stalled (0 disables the check, per §4.G `imap_exec`).
    pub imap_poll_timeout: Duration,
    /// IMAP: depth of the tagged-command ring (§3 `cmds[ring of N
    /// slots]`).
    pub imap_pipeline_depth: usize,
    /// Answer for "reconnect after the connection was lost?".
    pub reconnect: QuadOption,
    /// Answer for "quit without confirming pending deletions?" and
    /// similar mandatory prompts outside the reconnect path.
    pub confirm_quit: QuadOption,
    /// mailcap search path; `None` means use the RFC 1524 default
    /// chain (§4.E.x).
    pub mailcap_path: Option<Vec<String>>,
    /// Ask before running a mailcap entry lacking `copiousoutput`.
    pub wait_key: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        MailConfig {
            force_tls: false,
            pop_last: false,
            mark_old: true,
            clean_cache: false,
            auth_try_all: true,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            imap_poll_timeout: Duration::from_secs(0),
            imap_pipeline_depth: 16,
            reconnect: QuadOption::AskYes,
            confirm_quit: QuadOption::Yes,
            mailcap_path: None,
            wait_key: true,
        }
    }
}
