//! Header-block helpers: locating the header block, looking up one folded
//! header, RFC 2047 encoded-words and the `From:` mailbox.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::warn;

use crate::model::address::EmailAddress;

/// Base64 engine for encoded-words and part bodies: some mailers drop the
/// trailing `=` padding.
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// First address of the `From:` header of a raw message (or of a bare header
/// block). The body is never looked at.
pub fn parse_from(raw_message: &[u8]) -> Option<EmailAddress> {
    let end = find_header_end(raw_message).unwrap_or(raw_message.len());
    let headers = header_text(&raw_message[..end]);
    let from = header_value(&headers, "From")?;
    EmailAddress::first_of_list(&decode_encoded_words(&from))
}

/// Offset of the blank line that ends the header block (`\n\n` or `\r\n\r\n`).
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(2).enumerate().find_map(|(i, pair)| match pair {
        b"\n\n" => Some(i),
        b"\r\n" if data[i + 2..].starts_with(b"\r\n") => Some(i),
        _ => None,
    })
}

/// Header bytes as text: UTF-8 when valid, otherwise Windows-1252, which maps
/// every byte.
fn header_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Value of the first header called `name` (case-insensitive), with
/// continuation lines joined by a single space.
fn header_value(headers: &str, name: &str) -> Option<String> {
    let mut lines = headers.lines();

    let mut value = lines.by_ref().find_map(|line| {
        let (key, rest) = line.split_once(':')?;
        (!line.starts_with([' ', '\t']) && key.trim().eq_ignore_ascii_case(name))
            .then(|| rest.trim().to_string())
    })?;

    for continuation in lines.take_while(|l| l.starts_with([' ', '\t'])) {
        value.push(' ');
        value.push_str(continuation.trim());
    }
    Some(value)
}

/// Decode RFC 2047 encoded-words in a header value or attachment filename.
///
/// `"=?UTF-8?B?0L7RgtGH0ZHRgi56aXA=?="` becomes `"отчёт.zip"`. Whitespace
/// between two adjacent encoded-words is dropped. Text without encoded-words,
/// and any token that does not decode, is kept as written.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(open) = rest.find("=?") {
        let gap = &rest[..open];
        if !(after_word && gap.trim().is_empty()) {
            out.push_str(gap);
        }

        match decode_word(&rest[open + 2..]) {
            Some((text, used)) => {
                out.push_str(&text);
                rest = &rest[open + 2 + used..];
                after_word = true;
            }
            None => {
                out.push_str("=?");
                rest = &rest[open + 2..];
                after_word = false;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Decode `charset?enc?text?=` (the part after `=?`). Returns the text and the
/// number of bytes consumed.
fn decode_word(word: &str) -> Option<(String, usize)> {
    let (charset, rest) = word.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let payload_len = rest.find("?=")?;
    let payload = &rest[..payload_len];
    let used = word.len() - rest.len() + payload_len + 2;

    let bytes = if encoding.eq_ignore_ascii_case("b") {
        let compact: String = payload.split_whitespace().collect();
        LENIENT_BASE64.decode(compact).ok()?
    } else if encoding.eq_ignore_ascii_case("q") {
        decode_q(payload)
    } else {
        return None;
    };

    // RFC 2231 language tag, e.g. "UTF-8*ru"
    let charset = charset.split('*').next().unwrap_or(charset);
    Some((decode_charset(charset, &bytes), used))
}

/// Q-encoding: `_` is a space, `=XX` is a hex byte, anything else is literal.
fn decode_q(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let hex = bytes
            .get(i + 1..i + 3)
            .filter(|_| bytes[i] == b'=')
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());

        match (bytes[i], hex) {
            (_, Some(byte)) => {
                out.push(byte);
                i += 3;
            }
            (b'_', None) => {
                out.push(b' ');
                i += 1;
            }
            (b, None) => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset, "Unknown charset, decoding as UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
