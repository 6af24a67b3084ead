//! MIME message parsing: body selection and attachment extraction.

use base64::Engine;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, warn};

use super::header::{decode_encoded_words, parse_from, LENIENT_BASE64};
use super::pattern::FilenamePattern;
use crate::error::{RelayError, Result};
use crate::model::attachment::Attachment;
use crate::model::mail::ParsedMessage;

/// Everything the forwarder needs from one raw message, parsed once.
#[derive(Debug, Clone, Default)]
pub struct ExtractedMessage {
    pub parsed: ParsedMessage,
    pub attachments: Vec<Attachment>,
}

/// Parse a raw message and extract subject, body, sender and the attachments
/// accepted by `pattern`.
///
/// Malformed input never fails: whatever cannot be parsed yields an empty body
/// and no attachments.
pub fn extract(raw_message: &[u8], pattern: Option<&FilenamePattern>) -> ExtractedMessage {
    let from = parse_from(raw_message);

    let msg = match parse_message(raw_message) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Treating message as empty");
            return ExtractedMessage {
                parsed: ParsedMessage {
                    from,
                    ..ParsedMessage::default()
                },
                attachments: Vec::new(),
            };
        }
    };

    let subject = msg
        .subject()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    ExtractedMessage {
        parsed: ParsedMessage {
            subject,
            body: body_from_parsed(&msg),
            from,
        },
        attachments: attachments_from_parsed(&msg, pattern),
    }
}

/// Parse `raw_message` into a MIME tree.
pub fn parse_message(raw_message: &[u8]) -> Result<Message<'_>> {
    MessageParser::default().parse(raw_message).ok_or_else(|| {
        RelayError::Parse(format!(
            "{} bytes not recognised as a message",
            raw_message.len()
        ))
    })
}

/// Body text of a raw message. See [`body_from_parsed`] for the selection rule.
pub fn extract_body(raw_message: &[u8]) -> String {
    parse_message(raw_message)
        .map(|msg| body_from_parsed(&msg))
        .unwrap_or_default()
}

/// Attachments of a raw message whose decoded filename matches `pattern`
/// (every attachment when `pattern` is `None`).
pub fn extract_attachments(
    raw_message: &[u8],
    pattern: Option<&FilenamePattern>,
) -> Vec<Attachment> {
    parse_message(raw_message)
        .map(|msg| attachments_from_parsed(&msg, pattern))
        .unwrap_or_default()
}

/// Every part in depth-first order, descending into attached
/// `message/rfc822` parts, each paired with the message whose raw bytes its
/// offsets refer to.
fn walk<'a, 'x>(msg: &'a Message<'x>) -> Vec<(&'a Message<'x>, &'a MessagePart<'x>)> {
    let mut parts = Vec::with_capacity(msg.parts.len());
    for part in &msg.parts {
        parts.push((msg, part));
        if let PartType::Message(inner) = &part.body {
            parts.extend(walk(inner));
        }
    }
    parts
}

/// Walk the parts depth-first. The first `text/plain` part wins outright;
/// the first `text/html` part is only used when no plain part exists anywhere,
/// even if the HTML part comes earlier. A single-part message is its own body.
fn body_from_parsed(msg: &Message<'_>) -> String {
    let Some(root) = msg.parts.first() else {
        return String::new();
    };

    if !is_multipart(root) {
        return root.text_contents().unwrap_or_default().to_string();
    }

    let mut html_fallback: Option<&str> = None;
    for (_, part) in walk(msg) {
        let (ctype, subtype) = mime_type(part);
        match (ctype.as_str(), subtype.as_str()) {
            ("text", "plain") => {
                return part.text_contents().unwrap_or_default().to_string();
            }
            ("text", "html") => {
                if html_fallback.is_none_or(str::is_empty) {
                    html_fallback = part.text_contents();
                }
            }
            _ => {}
        }
    }

    html_fallback.unwrap_or_default().to_string()
}

/// Collect parts explicitly marked `Content-Disposition: attachment` that
/// carry a filename, filtered by `pattern`. Attachments of attached messages
/// are included; the attached message itself is not.
fn attachments_from_parsed(
    msg: &Message<'_>,
    pattern: Option<&FilenamePattern>,
) -> Vec<Attachment> {
    let mut result = Vec::new();

    for (owner, part) in walk(msg) {
        let container = matches!(part.body, PartType::Multipart(_) | PartType::Message(_));
        if container || !is_attachment(part) {
            continue;
        }

        let Some(raw_name) = part.attachment_name().filter(|n| !n.trim().is_empty()) else {
            debug!("Skipping attachment part without a filename");
            continue;
        };
        let filename = decode_encoded_words(raw_name);

        if let Some(pattern) = pattern {
            if !pattern.matches(&filename) {
                debug!(%filename, %pattern, "Attachment does not match pattern");
                continue;
            }
        }

        result.push(Attachment::new(filename, payload(owner, part)));
    }

    result
}

/// Attachment bytes with only the transfer encoding removed.
///
/// `mail-parser` re-encodes `text/*` parts to UTF-8 from their declared
/// charset, so those are decoded here from the raw body instead.
fn payload(owner: &Message<'_>, part: &MessagePart<'_>) -> Vec<u8> {
    if !matches!(part.body, PartType::Text(_) | PartType::Html(_)) {
        return part.contents().to_vec();
    }

    let Some(raw) = owner
        .raw_message
        .get(part.raw_body_offset()..part.raw_end_offset())
    else {
        warn!("Text attachment offsets out of range, using decoded text");
        return part.contents().to_vec();
    };

    let encoding = part
        .content_transfer_encoding()
        .map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        Some("base64") => {
            let compact: Vec<u8> = raw
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            LENIENT_BASE64.decode(compact).unwrap_or_else(|e| {
                warn!(error = %e, "Invalid base64 in text attachment, using decoded text");
                part.contents().to_vec()
            })
        }
        Some("quoted-printable") => decode_quoted_printable(raw),
        _ => raw.to_vec(),
    }
}

/// Quoted-printable (RFC 2045 §6.7): `=XX` is a hex byte, `=` at end of line
/// is a soft break, everything else is literal.
fn decode_quoted_printable(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'=' {
            out.push(raw[i]);
            i += 1;
            continue;
        }

        let rest = &raw[i + 1..];
        if rest.starts_with(b"\r\n") {
            i += 3;
        } else if rest.starts_with(b"\n") {
            i += 2;
        } else if let Some(byte) = rest
            .get(..2)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok())
        {
            out.push(byte);
            i += 3;
        } else {
            out.push(b'=');
            i += 1;
        }
    }
    out
}

fn is_multipart(part: &MessagePart<'_>) -> bool {
    matches!(part.body, PartType::Multipart(_))
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

/// Lowercased `(type, subtype)`; parts without `Content-Type` are `text/plain`.
fn mime_type(part: &MessagePart<'_>) -> (String, String) {
    match part.content_type() {
        Some(ct) => (
            ct.ctype().to_lowercase(),
            ct.subtype().unwrap_or_default().to_lowercase(),
        ),
        None => ("text".to_string(), "plain".to_string()),
    }
}
