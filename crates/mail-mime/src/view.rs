//! `view_attachment` (§4.E, steps 1-11). Crypto/passphrase handling
//! (step 1) is out of scope (§1 non-goal: crypto signing/encryption);
//! every other step is implemented.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use mail_core::error::{MailError, MailResult};

use crate::mailcap::{self, MailcapEntry};
use crate::part::MimePart;
use crate::tempreg::TempAttachments;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Regular,
    Pager,
    Mailcap,
}

#[derive(Debug)]
pub struct ViewOutcome {
    pub staged_path: PathBuf,
    pub pager_file: Option<PathBuf>,
    pub use_pager: bool,
}

/// `src_fp` in spec.md's signature becomes implicit: receive mode
/// always decodes from `part.raw` (already transfer-decoded by the
/// MIME parser); there is no send-mode path here since composing a
/// new message is this crate's sibling concern in `mail-send`.
pub fn view_attachment(
    part: &MimePart,
    mode: ViewMode,
    mailcap_path: &[String],
    staging_dir: &Path,
    registry: &mut TempAttachments,
    columns: u16,
) -> MailResult<ViewOutcome> {
    let type_subtype = part.type_subtype();
    let can_decode_internally = part.type_ == "text" || type_subtype == "message/rfc822";
    let use_mailcap = mode == ViewMode::Mailcap
        || mode == ViewMode::Pager
        || (mode == ViewMode::Regular && !can_decode_internally);

    let entry = if use_mailcap {
        mailcap::lookup(mailcap_path, &type_subtype, mode == ViewMode::Pager)
    } else {
        None
    };

    match (use_mailcap, &entry) {
        (true, None) if mode != ViewMode::Mailcap => {
            return view_as_text(part, staging_dir, registry);
        }
        (true, None) => {
            return Err(MailError::ViewerError(format!(
                "no mailcap entry for {type_subtype}"
            )));
        }
        _ => {}
    }

    let Some(entry) = entry else {
        return view_as_text(part, staging_dir, registry);
    };
    if entry.command.trim().is_empty() {
        return Err(MailError::ViewerError(format!(
            "mailcap entry for {type_subtype} has no command"
        )));
    }

    let staged_name = stage_name(part, entry.nametemplate.as_deref());
    let staged_path = staging_dir.join(sanitize_filename(&staged_name));
    std::fs::write(&staged_path, &part.raw)
        .map_err(|e| MailError::ViewerError(format!("could not stage attachment: {e}")))?;
    registry.register(&staged_path);

    let staged_str = staged_path
        .to_str()
        .ok_or_else(|| MailError::ViewerError("staged path is not valid UTF-8".into()))?;
    let expanded = mailcap::substitute(&entry.command, Some(staged_str), &type_subtype);
    let piped = mailcap::is_piped(&entry.command);
    let use_pager = entry.copiousoutput;

    std::env::set_var("COLUMNS", columns.to_string());
    let result = spawn_viewer(&entry, &expanded, piped, use_pager, &staged_path);
    std::env::remove_var("COLUMNS");
    let pager_file = result?;

    Ok(ViewOutcome {
        staged_path,
        pager_file,
        use_pager,
    })
}

fn spawn_viewer(
    entry: &MailcapEntry,
    expanded_command: &str,
    piped: bool,
    use_pager: bool,
    staged_path: &Path,
) -> MailResult<Option<PathBuf>> {
    let words = mailcap::tokenize(expanded_command)?;
    let (prog, args) = words
        .split_first()
        .ok_or_else(|| MailError::ViewerError("empty mailcap command".into()))?;

    if piped {
        let stdin = File::open(staged_path)
            .map_err(|e| MailError::ViewerError(format!("could not open staged file: {e}")))?;
        let mut cmd = Command::new(prog);
        cmd.args(args).stdin(Stdio::from(stdin));

        if use_pager {
            let pager_path = staged_path.with_extension("pager");
            let stdout = File::create(&pager_path)
                .map_err(|e| MailError::ViewerError(format!("could not create pager file: {e}")))?;
            cmd.stdout(Stdio::from(stdout));
            run(cmd)?;
            Ok(Some(pager_path))
        } else {
            run(cmd)?;
            Ok(None)
        }
    } else {
        let mut cmd = Command::new(prog);
        cmd.args(args);
        if entry.needsterminal {
            cmd.stdin(Stdio::inherit());
        }
        run(cmd)?;
        Ok(None)
    }
}

fn run(mut cmd: Command) -> MailResult<()> {
    let status = cmd
        .status()
        .map_err(|e| MailError::ViewerError(format!("could not launch viewer: {e}")))?;
    if !status.success() {
        tracing::warn!(?status, "mailcap viewer exited nonzero");
    }
    Ok(())
}

fn view_as_text(
    part: &MimePart,
    staging_dir: &Path,
    registry: &mut TempAttachments,
) -> MailResult<ViewOutcome> {
    let staged_path = staging_dir.join(sanitize_filename(&stage_name(part, None)));
    std::fs::write(&staged_path, &part.raw)
        .map_err(|e| MailError::ViewerError(format!("could not stage attachment: {e}")))?;
    registry.register(&staged_path);
    Ok(ViewOutcome {
        staged_path,
        pager_file: None,
        use_pager: false,
    })
}

fn stage_name(part: &MimePart, nametemplate: Option<&str>) -> String {
    let base = part.filename.clone().unwrap_or_else(|| {
        let ext = mime_guess::get_mime_extensions_str(&part.type_subtype())
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or(part.subtype.as_str());
        format!("part.{ext}")
    });
    match nametemplate {
        Some(tmpl) if tmpl.contains("%s") => tmpl.replace("%s", &base),
        _ => base,
    }
}

/// Strips path separators so a hostile `filename=` parameter cannot
/// escape the staging directory. Preserving `/` is only done in
/// send-mode paths, which this crate does not construct.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::{Disposition, Encoding};
    use std::collections::HashMap;
    use std::io::Write;

    fn text_part(raw: &[u8]) -> MimePart {
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
    fn text_part_in_regular_mode_decodes_internally_without_mailcap() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = TempAttachments::new();
        let part = text_part(b"hello world");
        let outcome =
            view_attachment(&part, ViewMode::Regular, &[], dir.path(), &mut registry, 80).unwrap();
        assert_eq!(std::fs::read(&outcome.staged_path).unwrap(), b"hello world");
        assert!(!outcome.use_pager);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mailcap_mode_without_a_matching_entry_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = TempAttachments::new();
        let part = MimePart {
            type_: "application".into(),
            ..text_part(b"bytes")
        };
        let err = view_attachment(&part, ViewMode::Mailcap, &[], dir.path(), &mut registry, 80);
        assert!(err.is_err());
    }

    #[test]
    fn piped_copiousoutput_entry_writes_a_pager_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut mailcap_file = tempfile::NamedTempFile::new().unwrap();
        mailcap_file
            .write_all(b"text/plain; cat; copiousoutput\n")
            .unwrap();
        let path = mailcap_file.path().to_str().unwrap().to_string();

        let mut registry = TempAttachments::new();
        let part = text_part(b"piped through cat");
        let outcome = view_attachment(
            &part,
            ViewMode::Mailcap,
            &[path],
            dir.path(),
            &mut registry,
            80,
        )
        .unwrap();
        assert!(outcome.use_pager);
        let pager_file = outcome.pager_file.unwrap();
        assert_eq!(std::fs::read(pager_file).unwrap(), b"piped through cat");
    }

    #[test]
    fn sanitize_filename_strips_path_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
    }
}
