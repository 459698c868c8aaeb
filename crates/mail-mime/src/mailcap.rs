//! RFC 1524 mailcap lookup (§4.E.x). Search path, entry parsing, and
//! the tiered `type/subtype` → `type/*` → `*/*` match order.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use mail_core::error::{MailError, MailResult};

#[derive(Debug, Clone, Default)]
pub struct MailcapEntry {
    pub type_subtype: String,
    pub command: String,
    pub test: Option<String>,
    pub needsterminal: bool,
    pub copiousoutput: bool,
    pub nametemplate: Option<String>,
    pub description: Option<String>,
    pub composecommand: Option<String>,
    pub composetypecommand: Option<String>,
    pub print: Option<String>,
    pub edit: Option<String>,
}

/// Default RFC 1524 chain, used when `MailConfig::mailcap_path` is
/// `None`.
pub fn default_search_path() -> Vec<String> {
    let home = std::env::var("HOME").unwrap_or_default();
    vec![
        format!("{home}/.mailcap"),
        "/etc/mailcap".to_string(),
        "/usr/etc/mailcap".to_string(),
        "/usr/local/etc/mailcap".to_string(),
    ]
}

pub fn search_path_from_env() -> Option<Vec<String>> {
    std::env::var("MAILCAPS")
        .ok()
        .map(|raw| raw.split(':').map(str::to_string).collect())
}

/// Looks up the best mailcap entry for `type_subtype`, in tier order
/// (exact, `type/*`, `*/*`), across every file in `search_path` in
/// order, running each candidate's `test=` field (if present) and
/// skipping it on nonzero exit. `autoview` additionally requires the
/// candidate to declare `copiousoutput` (the `x-mailcap-autoview`
/// convention used in `pager` mode).
pub fn lookup(search_path: &[String], type_subtype: &str, autoview: bool) -> Option<MailcapEntry> {
    let (type_, subtype) = type_subtype.split_once('/').unwrap_or((type_subtype, ""));
    let tiers = [
        type_subtype.to_string(),
        format!("{type_}/*"),
        "*/*".to_string(),
    ];

    for tier in &tiers {
        for path in search_path {
            let Ok(contents) = fs::read_to_string(path) else {
                continue;
            };
            for mut entry in parse_mailcap(&contents) {
                if !matches_tier(&entry.type_subtype, tier) {
                    continue;
                }
                if let Some(test_cmd) = entry.test.clone() {
                    if !run_test(&test_cmd, type_subtype) {
                        continue;
                    }
                }
                if autoview && !entry.copiousoutput {
                    continue;
                }
                entry.type_subtype = type_subtype.to_string();
                return Some(entry);
            }
        }
    }
    let _ = subtype;
    None
}

fn matches_tier(entry_type: &str, tier: &str) -> bool {
    entry_type.eq_ignore_ascii_case(tier)
}

fn run_test(test_cmd: &str, type_subtype: &str) -> bool {
    let expanded = substitute(test_cmd, None, type_subtype);
    let Ok(words) = shell_words::split(&expanded) else {
        return false;
    };
    let Some((prog, args)) = words.split_first() else {
        return false;
    };
    Command::new(prog)
        .args(args)
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Parses mailcap file text into its entries, honouring `\`-line
/// continuations and skipping `#`-comments and blank lines.
fn parse_mailcap(contents: &str) -> Vec<MailcapEntry> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();
    for line in contents.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped);
            continue;
        }
        current.push_str(line);
        logical_lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        logical_lines.push(current);
    }

    logical_lines
        .into_iter()
        .filter_map(|line| parse_mailcap_line(line.trim()))
        .collect()
}

fn parse_mailcap_line(line: &str) -> Option<MailcapEntry> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields = split_unescaped_semicolons(line);
    let mut iter = fields.into_iter();
    let type_subtype = iter.next()?.trim().to_string();
    let command = iter.next()?.trim().to_string();

    let mut entry = MailcapEntry {
        type_subtype,
        command,
        ..Default::default()
    };

    for field in iter {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (key, value) = field.split_once('=').unwrap_or((field, ""));
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().trim_matches('"').to_string();
        match key.as_str() {
            "needsterminal" => entry.needsterminal = true,
            "copiousoutput" => entry.copiousoutput = true,
            "test" => entry.test = Some(value),
            "nametemplate" => entry.nametemplate = Some(value),
            "description" => entry.description = Some(value),
            "composecommand" => entry.composecommand = Some(value),
            "composetypecommand" => entry.composetypecommand = Some(value),
            "print" => entry.print = Some(value),
            "edit" => entry.edit = Some(value),
            _ => {}
        }
    }
    Some(entry)
}

fn split_unescaped_semicolons(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                cur.push(next);
                chars.next();
                continue;
            }
        }
        if c == ';' {
            out.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    out.push(cur);
    out
}

/// `%s` → staged filename, `%t` → `type/subtype`.
pub fn substitute(template: &str, staged_path: Option<&str>, type_subtype: &str) -> String {
    let mut out = template.replace("%t", type_subtype);
    if let Some(path) = staged_path {
        out = out.replace("%s", path);
    }
    out
}

pub fn is_piped(command_template: &str) -> bool {
    !command_template.contains("%s")
}

/// Tokenizes an already-substituted mailcap command via shell-style
/// word splitting (quote/escape rules, not a full shell).
pub fn tokenize(command: &str) -> MailResult<Vec<String>> {
    shell_words::split(command)
        .map_err(|e| MailError::ViewerError(format!("could not parse mailcap command: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_mailcap(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn exact_match_wins_over_wildcard_tiers() {
        let file = write_mailcap(concat!(
            "text/*; cat %s\n",
            "text/plain; less %s; nametemplate=%s.txt\n",
        ));
        let path = file.path().to_str().unwrap().to_string();
        let entry = lookup(&[path], "text/plain", false).unwrap();
        assert_eq!(entry.command, "less %s");
        assert_eq!(entry.nametemplate.as_deref(), Some("%s.txt"));
    }

    #[test]
    fn autoview_requires_copiousoutput() {
        let file = write_mailcap("text/html; lynx -dump %s; copiousoutput\n");
        let path = file.path().to_str().unwrap().to_string();
        assert!(lookup(&[path.clone()], "text/html", true).is_some());

        let file2 = write_mailcap("text/html; firefox %s; needsterminal\n");
        let path2 = file2.path().to_str().unwrap().to_string();
        assert!(lookup(&[path2], "text/html", true).is_none());
    }

    #[test]
    fn continuation_lines_are_joined() {
        let file = write_mailcap("text/plain; cat %s; \\\n  description=Plain text\n");
        let path = file.path().to_str().unwrap().to_string();
        let entry = lookup(&[path], "text/plain", false).unwrap();
        assert_eq!(entry.description.as_deref(), Some("Plain text"));
    }

    #[test]
    fn is_piped_detects_absence_of_percent_s() {
        assert!(is_piped("lynx -dump"));
        assert!(!is_piped("lynx -dump %s"));
    }

    #[test]
    fn substitute_replaces_both_placeholders() {
        let out = substitute("view %s as %t", Some("/tmp/x.png"), "image/png");
        assert_eq!(out, "view /tmp/x.png as image/png");
    }
}
