//! Save / Pipe / Print / Decode-and-save (§4.E). All four share the
//! same shape: stage or stream `part.raw` — already transfer-decoded
//! by the MIME parser — to a destination, then wait on whatever
//! child process (if any) consumed it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use mail_core::driver::MailboxSink;
use mail_core::error::{MailError, MailResult};

use crate::part::{Encoding, MimePart};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOption {
    /// Create the file; fail if it already exists.
    Write,
    Append,
    /// Truncate and replace an existing file.
    Overwrite,
}

/// `save_attachment(body, path, opt, sink?)`. `sink` is required (and
/// used) only for the message-type, non-base64/non-QP branch, which
/// appends the reconstituted message into an arbitrary local mailbox
/// through the generic driver interface rather than this crate
/// knowing the mailbox format.
pub fn save_attachment(
    part: &MimePart,
    path: &Path,
    opt: SaveOption,
    sink: Option<&mut dyn MailboxSink>,
) -> MailResult<()> {
    if part.is_message() && !matches!(part.encoding, Encoding::Base64 | Encoding::QuotedPrintable) {
        let sink = sink.ok_or_else(|| {
            MailError::ViewerError("saving a message part requires a mailbox sink".into())
        })?;
        return sink.append_message(&part.raw, true, false);
    }
    decode_and_save(part, path, opt)
}

/// The non-message save path: write `part.raw` to `path` under the
/// given open discipline, fsync, close.
pub fn decode_and_save(part: &MimePart, path: &Path, opt: SaveOption) -> MailResult<()> {
    let mut options = OpenOptions::new();
    options.write(true);
    match opt {
        SaveOption::Write => {
            options.create_new(true);
        }
        SaveOption::Append => {
            options.create(true).append(true);
        }
        SaveOption::Overwrite => {
            options.create(true).truncate(true);
        }
    }
    let mut file = options
        .open(path)
        .map_err(|e| MailError::ViewerError(format!("could not open {}: {e}", path.display())))?;
    file.write_all(&part.raw)
        .map_err(|e| MailError::ViewerError(format!("could not write {}: {e}", path.display())))?;
    file.sync_all()
        .map_err(|e| MailError::ViewerError(format!("could not sync {}: {e}", path.display())))?;
    Ok(())
}

/// Pipes `part.raw` through an arbitrary shell command's stdin,
/// optionally un-stuffing RFC 3676 `format=flowed` space-stuffing
/// first, and waits for the child to exit.
pub fn pipe_attachment(part: &MimePart, command: &str, unstuff_flowed: bool) -> MailResult<()> {
    let words = crate::mailcap::tokenize(command)?;
    let (prog, args) = words
        .split_first()
        .ok_or_else(|| MailError::ViewerError("empty pipe command".into()))?;

    let mut child = Command::new(prog)
        .args(args)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| MailError::ViewerError(format!("could not spawn pipe command: {e}")))?;

    let payload = if unstuff_flowed {
        unstuff_format_flowed(&part.raw)
    } else {
        part.raw.clone()
    };

    {
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| MailError::ViewerError("child stdin unavailable".into()))?;
        stdin
            .write_all(&payload)
            .map_err(|e| MailError::ViewerError(format!("could not write to pipe: {e}")))?;
    }

    let status = child
        .wait()
        .map_err(|e| MailError::ViewerError(format!("pipe command wait failed: {e}")))?;
    if !status.success() {
        return Err(MailError::ViewerError(format!(
            "pipe command exited with {status}"
        )));
    }
    Ok(())
}

/// Prints via the mailcap entry's `print=` command if present,
/// otherwise falls back to the system `lpr`.
pub fn print_attachment(part: &MimePart, mailcap_print_command: Option<&str>) -> MailResult<()> {
    let command = mailcap_print_command.unwrap_or("lpr");
    pipe_attachment(part, command, false)
}

/// Removes a single leading space from each line that RFC 3676
/// `format=flowed` stuffing added to protect a line starting with
/// `From ` or a leading space from mbox/flowing ambiguity.
fn unstuff_format_flowed(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for line in raw.split(|&b| b == b'\n') {
        let line = if line.first() == Some(&b' ') { &line[1..] } else { line };
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    if out.last() == Some(&b'\n') && raw.last() != Some(&b'\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::Disposition;
    use std::collections::HashMap;

    fn plain_part(raw: &[u8]) -> MimePart {
        MimePart {
            type_: "text".into(),
            subtype: "plain".into(),
            parameters: HashMap::new(),
            description: None,
            filename: None,
            encoding: Encoding::SevenBit,
            disposition: Disposition::Inline,
            content_id: None,
            raw: raw.to_vec(),
            parts: Vec::new(),
            envelope: None,
            unlink: false,
        }
    }

    #[test]
    fn write_fails_if_the_file_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"existing").unwrap();
        let part = plain_part(b"new content");
        let err = decode_and_save(&part, &path, SaveOption::Write);
        assert!(err.is_err());
    }

    #[test]
    fn overwrite_truncates_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"stale content here").unwrap();
        let part = plain_part(b"new");
        decode_and_save(&part, &path, SaveOption::Overwrite).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn append_adds_after_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"first").unwrap();
        let part = plain_part(b"second");
        decode_and_save(&part, &path, SaveOption::Append).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"firstsecond");
    }

    #[test]
    fn unstuff_format_flowed_removes_one_leading_space_per_line() {
        let raw = b" From the start\n regular line\nunindented\n";
        let out = unstuff_format_flowed(raw);
        assert_eq!(out, b"From the start\nregular line\nunindented\n");
    }

    #[test]
    fn pipe_attachment_propagates_a_nonzero_exit() {
        let part = plain_part(b"x");
        let err = pipe_attachment(&part, "false", false);
        assert!(err.is_err());
    }

    #[test]
    fn pipe_attachment_succeeds_through_cat() {
        let part = plain_part(b"x");
        pipe_attachment(&part, "cat", false).unwrap();
    }
}
