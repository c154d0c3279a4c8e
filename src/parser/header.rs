//! RFC 5322 header block parsing: unfolding, case-insensitive lookup and
//! RFC 2047 encoded-word decoding.

use tracing::warn;

/// Unfolded, decoded headers of one message in their original order.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Parse the header block at the start of a raw message.
    ///
    /// A leading mbox `From ` separator line is ignored, and parsing stops at
    /// the first blank line.
    pub fn from_message(raw_message: &[u8]) -> Self {
        let text = decode_header_bytes(header_block(raw_message));
        Self {
            entries: unfold_headers(&text),
        }
    }

    /// First value of a header (case-insensitive), with encoded words decoded.
    ///
    /// Blank values are reported as absent.
    pub fn get(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| decode_encoded_words(v))
            .filter(|v| !v.trim().is_empty())
    }
}

/// Slice out the header block: after the `From ` line, up to the first blank line.
fn header_block(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEFu8, 0xBB, 0xBF][..]).unwrap_or(data);
    let data = if data.starts_with(b"From ") {
        match data.iter().position(|&b| b == b'\n') {
            Some(pos) => &data[pos + 1..],
            None => &data[data.len()..],
        }
    } else {
        data
    };

    let mut line_start = 0;
    while line_start < data.len() {
        let line_end = data[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| line_start + p + 1)
            .unwrap_or(data.len());
        let line = &data[line_start..line_end];
        if line.iter().all(|&b| b == b'\r' || b == b'\n') {
            return &data[..line_start];
        }
        line_start = line_end;
    }
    data
}

/// Decode raw header bytes to a string: UTF-8 first, Windows-1252 otherwise.
fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Join continuation lines and split into `(lowercase_name, raw_value)` pairs.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            if name.is_empty() || name.contains(' ') {
                continue;
            }
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
    }

    result
}

/// Decode RFC 2047 encoded words (`=?charset?B|Q?text?=`) in a header value.
///
/// Whitespace between two adjacent encoded words is dropped. Tokens that do
/// not decode are kept verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut prev_encoded = false;
    let mut rest = input;

    while let Some(start) = rest.find("=?") {
        let gap = &rest[..start];
        match parse_encoded_word(&rest[start..]) {
            Some((decoded, consumed)) => {
                if !(prev_encoded && gap.trim().is_empty()) {
                    out.push_str(gap);
                }
                out.push_str(&decoded);
                rest = &rest[start + consumed..];
                prev_encoded = true;
            }
            None => {
                out.push_str(gap);
                out.push_str("=?");
                rest = &rest[start + 2..];
                prev_encoded = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse one encoded word at the start of `s`; returns the text and bytes consumed.
fn parse_encoded_word(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix("=?")?;
    let mut fields = body.splitn(3, '?');
    let charset = fields.next()?;
    let encoding = fields.next()?;
    let tail = fields.next()?;
    let end = tail.find("?=")?;
    let text = &tail[..end];
    if charset.is_empty() || text.contains(' ') {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => base64_decode(text)?,
        "Q" | "q" => q_decode(text),
        _ => return None,
    };

    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((decode_charset(charset, &bytes), consumed))
}

/// Standard-alphabet base64 with optional padding.
fn base64_decode(text: &str) -> Option<Vec<u8>> {
    fn sextet(c: u8) -> Option<u32> {
        match c {
            b'A'..=b'Z' => Some((c - b'A') as u32),
            b'a'..=b'z' => Some((c - b'a' + 26) as u32),
            b'0'..=b'9' => Some((c - b'0' + 52) as u32),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(text.len() * 3 / 4);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &c in text.as_bytes().iter().filter(|&&c| c != b'=') {
        acc = (acc << 6) | sextet(c)?;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    Some(out)
}

/// Q encoding: `_` is a space, `=XX` a hex byte.
fn q_decode(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'='),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

/// Decode bytes in the named charset, falling back to lossy UTF-8.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    // RFC 2231 language suffix: "utf-8*en"
    let label = charset.split('*').next().unwrap_or(charset);
    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset = label, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_adjacent_encoded_words_join() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
    }

    #[test]
    fn test_undecodable_token_is_kept() {
        assert_eq!(decode_encoded_words("price =?x"), "price =?x");
    }

    #[test]
    fn test_windows1252_word() {
        assert_eq!(decode_encoded_words("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_header_map_skips_from_line_and_body() {
        let raw: &[u8] = b"From someone@example.com Mon Jan  2 10:00:00 2023\nSubject: Status\n report\nFROM: Ann <ann@example.com>\n\nTo: not-a-header@example.com\n";
        let headers = HeaderMap::from_message(raw);
        assert_eq!(headers.entries.len(), 2);
        assert_eq!(headers.get("subject").as_deref(), Some("Status report"));
        assert_eq!(headers.get("From").as_deref(), Some("Ann <ann@example.com>"));
        assert_eq!(headers.get("to"), None);
    }

    #[test]
    fn test_blank_header_is_absent() {
        let headers = HeaderMap::from_message(b"Subject:   \r\nTo: b@example.com\r\n\r\nbody");
        assert_eq!(headers.get("subject"), None);
        assert_eq!(headers.get("to").as_deref(), Some("b@example.com"));
    }
}
