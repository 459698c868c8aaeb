//! Line-level POP3 conventions: `+OK`/`-ERR` status lines, and the
//! dot-terminated multi-line response used by `CAPA`, `LIST`, `UIDL`,
//! `TOP`, `RETR`.

use mail_core::connection::Connection;
use mail_core::error::{MailError, MailResult};

pub fn is_ok(line: &str) -> bool {
    line.starts_with("+OK")
}

pub fn is_err(line: &str) -> bool {
    line.starts_with("-ERR")
}

/// Send a command line (CRLF-terminated) and read the single status
/// line back. Returns the text following `+OK `/`-ERR ` (possibly
/// empty).
pub fn command(conn: &mut Connection, line: &str) -> MailResult<String> {
    conn.write(format!("{line}\r\n").as_bytes())?;
    let reply = conn.readln()?;
    status_text(&reply)
}

/// Same as `command` but returns the raw status line instead of
/// erroring on `-ERR`, for callers that need to branch on refusal
/// (e.g. `DELE` during sync, where one failure changes the whole
/// session's outcome).
pub fn command_raw(conn: &mut Connection, line: &str) -> MailResult<String> {
    conn.write(format!("{line}\r\n").as_bytes())?;
    conn.readln()
}

pub fn status_text(line: &str) -> MailResult<String> {
    if is_ok(line) {
        Ok(line.trim_start_matches("+OK").trim_start().to_string())
    } else if is_err(line) {
        Err(MailError::ServerRefused(
            line.trim_start_matches("-ERR").trim_start().to_string(),
        ))
    } else {
        Err(MailError::ProtocolError(format!(
            "expected +OK/-ERR, got: {line}"
        )))
    }
}

/// Reads lines until a lone `.` terminator, un-stuffing any
/// leading-dot-doubled line. Used after a `+OK` that introduces a
/// multi-line body (CAPA, LIST, UIDL, TOP, RETR).
pub fn read_multiline(conn: &mut Connection) -> MailResult<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let line = conn.readln()?;
        if line == "." {
            return Ok(lines);
        }
        if let Some(rest) = line.strip_prefix('.') {
            lines.push(rest.to_string());
        } else {
            lines.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_core::test_support::{connection_with, MemoryTransport};

    #[test]
    fn command_parses_ok_status_text() {
        let transport = MemoryTransport::new();
        transport.push_server_line("+OK 5 12345");
        let mut conn = connection_with(transport);
        let text = command(&mut conn, "STAT").unwrap();
        assert_eq!(text, "5 12345");
    }

    #[test]
    fn command_turns_err_into_server_refused() {
        let transport = MemoryTransport::new();
        transport.push_server_line("-ERR cannot");
        let mut conn = connection_with(transport);
        let err = command(&mut conn, "DELE 2").unwrap_err();
        assert!(matches!(err, MailError::ServerRefused(msg) if msg == "cannot"));
    }

    #[test]
    fn read_multiline_unstuffs_leading_dots_and_stops_at_terminator() {
        let transport = MemoryTransport::new();
        transport.push_server_line("UIDL");
        transport.push_server_line("TOP");
        transport.push_server_line("..leading dot preserved");
        transport.push_server_line(".");
        let mut conn = connection_with(transport);
        let lines = read_multiline(&mut conn).unwrap();
        assert_eq!(lines, vec!["UIDL", "TOP", ".leading dot preserved"]);
    }
}
