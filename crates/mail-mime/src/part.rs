//! The MIME part tree (§3 `MimePart (Body)`) and the message envelope
//! carried on its root.

use std::collections::HashMap;

use mailparse::{MailHeaderMap, ParsedMail};

use mail_core::error::{MailError, MailResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
    UuEncoded,
}

impl Encoding {
    fn from_header(value: Option<&str>) -> Encoding {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("quoted-printable") => Encoding::QuotedPrintable,
            Some("base64") => Encoding::Base64,
            Some("x-uuencode") | Some("uuencode") => Encoding::UuEncoded,
            Some("8bit") => Encoding::EightBit,
            Some("binary") => Encoding::Binary,
            _ => Encoding::SevenBit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
    FormData,
}

impl Disposition {
    fn from_mailparse(d: mailparse::DispositionType) -> Disposition {
        match d {
            mailparse::DispositionType::Attachment => Disposition::Attachment,
            mailparse::DispositionType::FormData => Disposition::FormData,
            _ => Disposition::Inline,
        }
    }
}

/// From/To/Cc/Subject/Message-Id/References/In-Reply-To, carried on a
/// message's root `MimePart` only.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub references: Vec<String>,
    pub in_reply_to: Vec<String>,
}

/// A node in the recursive MIME tree. The root of a message carries
/// `envelope`; every other node's is `None`.
///
/// `raw` holds this part's own decoded-transport-encoding-stripped
/// content if it is a leaf; `parts` holds children if it is a
/// container (`multipart/*`, `message/rfc822`). Rather than the
/// `offset`-into-shared-buffer spec.md describes, each node owns its
/// slice of the message directly — see DESIGN.md for why.
#[derive(Debug, Clone)]
pub struct MimePart {
    pub type_: String,
    pub subtype: String,
    pub parameters: HashMap<String, String>,
    pub description: Option<String>,
    pub filename: Option<String>,
    pub encoding: Encoding,
    pub disposition: Disposition,
    pub content_id: Option<String>,
    pub raw: Vec<u8>,
    pub parts: Vec<MimePart>,
    pub envelope: Option<Envelope>,
    /// Set once a caller unlinks the scratch file this part was
    /// staged to; mirrors `unlink` in spec.md's field list.
    pub unlink: bool,
}

impl MimePart {
    pub fn type_subtype(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    pub fn is_message(&self) -> bool {
        self.type_.eq_ignore_ascii_case("message")
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self.disposition, Disposition::Attachment) || self.filename.is_some()
    }

    /// Depth-first walk including `self`.
    pub fn walk(&self) -> Vec<&MimePart> {
        let mut out = vec![self];
        for child in &self.parts {
            out.extend(child.walk());
        }
        out
    }

    pub fn find_by_content_id(&self, cid: &str) -> Option<&MimePart> {
        self.walk()
            .into_iter()
            .find(|p| p.content_id.as_deref() == Some(cid))
    }
}

/// Parses a full RFC 822 message into its `MimePart` tree, with the
/// envelope attached to the root.
pub fn parse_message(raw: &[u8]) -> MailResult<MimePart> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| MailError::DecodeError(format!("could not parse message: {e}")))?;
    let mut root = build_part(&parsed)?;
    root.envelope = Some(build_envelope(&parsed));
    Ok(root)
}

fn build_envelope(parsed: &ParsedMail) -> Envelope {
    let header = |name: &str| parsed.headers.get_first_value(name);
    let list_header = |name: &str| -> Vec<String> {
        header(name)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    };
    Envelope {
        from: header("From"),
        to: header("To"),
        cc: header("Cc"),
        subject: header("Subject"),
        message_id: header("Message-Id"),
        references: list_header("References"),
        in_reply_to: list_header("In-Reply-To"),
    }
}

fn build_part(parsed: &ParsedMail) -> MailResult<MimePart> {
    let ctype = parsed.ctype.mimetype.to_lowercase();
    let (type_, subtype) = ctype
        .split_once('/')
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .unwrap_or_else(|| ("text".to_string(), "plain".to_string()));

    let disposition_info = parsed.get_content_disposition();
    let filename = disposition_info
        .params
        .get("filename")
        .cloned()
        .or_else(|| parsed.ctype.params.get("name").cloned());

    let content_id = parsed.headers.get_first_value("Content-ID").map(|v| {
        v.trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()
    });

    let encoding = Encoding::from_header(
        parsed
            .headers
            .get_first_value("Content-Transfer-Encoding")
            .as_deref(),
    );

    let mut parts = Vec::with_capacity(parsed.subparts.len());
    for sub in &parsed.subparts {
        parts.push(build_part(sub)?);
    }

    let raw = if parts.is_empty() {
        parsed
            .get_body_raw()
            .map_err(|e| MailError::DecodeError(format!("could not decode body: {e}")))?
    } else {
        Vec::new()
    };

    Ok(MimePart {
        type_,
        subtype,
        parameters: parsed.ctype.params.clone(),
        description: parsed.headers.get_first_value("Content-Description"),
        filename,
        encoding,
        disposition: Disposition::from_mailparse(disposition_info.disposition),
        content_id,
        raw,
        parts,
        envelope: None,
        unlink: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART_WITH_ATTACHMENT: &str = concat!(
        "From: a@example.com\r\n",
        "To: b@example.com\r\n",
        "Subject: hello\r\n",
        "Content-Type: multipart/mixed; boundary=XYZ\r\n",
        "\r\n",
        "--XYZ\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "body text\r\n",
        "--XYZ\r\n",
        "Content-Type: application/octet-stream\r\n",
        "Content-Disposition: attachment; filename=report.bin\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "aGVsbG8=\r\n",
        "--XYZ--\r\n",
    );

    #[test]
    fn parses_envelope_and_children() {
        let root = parse_message(MULTIPART_WITH_ATTACHMENT.as_bytes()).unwrap();
        let envelope = root.envelope.as_ref().unwrap();
        assert_eq!(envelope.subject.as_deref(), Some("hello"));
        assert_eq!(root.parts.len(), 2);
        assert_eq!(root.parts[0].type_subtype(), "text/plain");
        assert_eq!(root.parts[1].filename.as_deref(), Some("report.bin"));
        assert!(root.parts[1].is_attachment());
        assert_eq!(root.parts[1].encoding, Encoding::Base64);
    }

    #[test]
    fn find_by_content_id_locates_a_related_part() {
        let msg = concat!(
            "Content-Type: multipart/related; boundary=Y\r\n",
            "\r\n",
            "--Y\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<img src=cid:img1>\r\n",
            "--Y\r\n",
            "Content-Type: image/png\r\n",
            "Content-ID: <img1>\r\n",
            "\r\n",
            "binarydata\r\n",
            "--Y--\r\n",
        );
        let root = parse_message(msg.as_bytes()).unwrap();
        let found = root.find_by_content_id("img1").unwrap();
        assert_eq!(found.type_subtype(), "image/png");
    }
}
