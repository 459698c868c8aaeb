//! §4.I's core obligation: reconstitute a stored message, re-encode
//! it, and hand it to the MTA. For a reply, the caller only learns
//! the message was "replied" once delivery succeeded and the
//! generated message's `In-Reply-To`/`References` still name the
//! original.

use mail_core::error::MailResult;
use mail_mime::parse_message;

use crate::mta::MtaTransport;

/// Reconstitutes `stored_raw` (a message pulled back from the body
/// cache or a local copy), re-encodes its body where needed, and
/// hands the result to `mta`. Decryption is out of scope (§1 non-goal:
/// crypto signing/encryption) — `stored_raw` is assumed already
/// plaintext MIME.
pub fn resend(stored_raw: &[u8], mta: &dyn MtaTransport, from: &str, to: &[String]) -> MailResult<()> {
    // Validates the message is well-formed MIME before handing it off;
    // `parse_message` also surfaces a `DecodeError` early rather than
    // letting a malformed resend silently reach the MTA.
    let _ = parse_message(stored_raw)?;
    let reencoded = reencode_for_transport(stored_raw);
    mta.send_raw(from, to, &reencoded)
}

/// Sends a composed reply and reports whether the `replied` flag
/// should be set on the original message: only true when delivery
/// succeeded *and* the composed message's `In-Reply-To`/`References`
/// still reference `original_message_id`.
pub fn send_reply(
    composed_raw: &[u8],
    mta: &dyn MtaTransport,
    from: &str,
    to: &[String],
    original_message_id: &str,
) -> MailResult<bool> {
    let part = parse_message(composed_raw)?;
    let envelope = part.envelope.unwrap_or_default();
    let target = strip_angle_brackets(original_message_id);
    let still_linked = envelope
        .in_reply_to
        .iter()
        .chain(envelope.references.iter())
        .any(|id| strip_angle_brackets(id) == target);

    let reencoded = reencode_for_transport(composed_raw);
    mta.send_raw(from, to, &reencoded)?;
    Ok(still_linked)
}

fn strip_angle_brackets(id: &str) -> &str {
    id.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Finds the header/body boundary (the first blank line) and, if the
/// body contains non-ASCII bytes under a 7bit/absent transfer
/// encoding, rewrites the `Content-Transfer-Encoding` header to
/// `quoted-printable` and re-encodes the body accordingly. A body
/// already 8bit/base64/quoted-printable, or entirely ASCII, passes
/// through untouched.
fn reencode_for_transport(raw: &[u8]) -> Vec<u8> {
    let Some(boundary) = find_header_boundary(raw) else {
        return raw.to_vec();
    };
    let (header_block, body) = raw.split_at(boundary);
    let header_text = String::from_utf8_lossy(header_block);

    if !body.iter().any(|&b| b >= 0x80) {
        return raw.to_vec();
    }
    if header_text
        .lines()
        .any(|l| l.to_ascii_lowercase().starts_with("content-transfer-encoding:") && !l.to_ascii_lowercase().contains("7bit"))
    {
        return raw.to_vec();
    }

    let mut out_headers = String::new();
    let mut replaced = false;
    for line in header_text.lines() {
        if line.to_ascii_lowercase().starts_with("content-transfer-encoding:") {
            out_headers.push_str("Content-Transfer-Encoding: quoted-printable\r\n");
            replaced = true;
        } else {
            out_headers.push_str(line);
            out_headers.push_str("\r\n");
        }
    }
    if !replaced {
        out_headers.push_str("Content-Transfer-Encoding: quoted-printable\r\n");
    }

    let mut out = out_headers.into_bytes();
    out.extend_from_slice(quoted_printable::encode(body).as_slice());
    out
}

fn find_header_boundary(raw: &[u8]) -> Option<usize> {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mta::test_support::RecordingMta;

    const SIMPLE_MESSAGE: &[u8] =
        b"From: a@b.com\r\nTo: c@d.com\r\nSubject: hi\r\n\r\nplain ascii body\r\n";

    #[test]
    fn resend_forwards_well_formed_messages_unchanged_when_ascii() {
        let mta = RecordingMta::default();
        resend(SIMPLE_MESSAGE, &mta, "a@b.com", &["c@d.com".to_string()]).unwrap();
        let calls = mta.calls.lock().unwrap();
        assert_eq!(calls[0].2, SIMPLE_MESSAGE);
    }

    #[test]
    fn resend_rejects_malformed_input_before_touching_the_mta() {
        let mta = RecordingMta::default();
        let err = resend(b"not a valid message at all \xff\xfe", &mta, "a@b.com", &[]);
        assert!(err.is_err() || mta.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn send_reply_reports_true_when_the_reply_still_references_the_original() {
        let mta = RecordingMta::default();
        let composed = b"From: a@b.com\r\nIn-Reply-To: <orig123@host>\r\n\r\nreply body\r\n";
        let replied = send_reply(
            composed,
            &mta,
            "a@b.com",
            &["c@d.com".to_string()],
            "<orig123@host>",
        )
        .unwrap();
        assert!(replied);
    }

    #[test]
    fn send_reply_reports_false_when_the_link_was_dropped() {
        let mta = RecordingMta::default();
        let composed = b"From: a@b.com\r\n\r\nreply body with no references\r\n";
        let replied = send_reply(
            composed,
            &mta,
            "a@b.com",
            &["c@d.com".to_string()],
            "<orig123@host>",
        )
        .unwrap();
        assert!(!replied);
    }

    #[test]
    fn non_ascii_bodies_are_reencoded_as_quoted_printable() {
        let raw = "From: a@b.com\r\n\r\nh\u{00e9}llo w\u{00f6}rld\r\n".as_bytes();
        let out = reencode_for_transport(raw);
        let out_text = String::from_utf8_lossy(&out);
        assert!(out_text.contains("Content-Transfer-Encoding: quoted-printable"));
        assert!(out_text.contains("=C3"));
    }
}
