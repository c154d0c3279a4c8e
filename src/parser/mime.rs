//! Message and MIME part capabilities consumed by the extractor.
//!
//! The extractor never touches `mail-parser` types directly; it sees a
//! message as a header lookup plus a depth-first list of parts. This keeps
//! the extraction rules testable with [`SimpleMessage`] values.

use std::borrow::Cow;

use mail_parser::{MessageParser, MimeHeaders, PartType};
use tracing::debug;

use super::header::HeaderMap;

/// One MIME part of a message.
pub trait MailPart {
    /// `true` for `multipart/*` and `message/rfc822` containers, which carry
    /// no payload of their own.
    fn is_multipart(&self) -> bool;

    /// Lowercase `type/subtype`; `text/plain` when the part declares none.
    fn mime_type(&self) -> String;

    /// Disposition type (`attachment`, `inline`, ...) if the part declares one.
    fn disposition(&self) -> Option<String>;

    /// Filename from the disposition, falling back to the content-type `name`.
    fn filename(&self) -> Option<String>;

    /// Payload with the transfer encoding removed.
    fn payload(&self) -> Cow<'_, [u8]>;
}

/// A parsed message: header lookup plus its parts in depth-first order.
pub trait MailMessage {
    /// First value of the named header, decoded; `None` when absent or blank.
    fn header(&self, name: &str) -> Option<String>;

    /// All parts, containers included, in depth-first order.
    fn parts(&self) -> Vec<&dyn MailPart>;
}

/// A raw mbox message decoded with `mail-parser`.
pub struct ParsedMessage<'x> {
    headers: HeaderMap,
    message: Option<mail_parser::Message<'x>>,
}

impl<'x> ParsedMessage<'x> {
    /// Parse raw message bytes; a leading `From ` separator line is skipped.
    ///
    /// When `mail-parser` cannot make sense of the body the headers are still
    /// available and the message simply has no parts.
    pub fn parse(raw_message: &'x [u8]) -> Self {
        let bytes = skip_from_line(raw_message);
        let headers = HeaderMap::from_message(bytes);
        let message = MessageParser::default().parse(bytes);
        if message.is_none() {
            debug!(len = bytes.len(), "mail-parser could not parse message body");
        }
        Self { headers, message }
    }
}

impl MailMessage for ParsedMessage<'_> {
    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }

    fn parts(&self) -> Vec<&dyn MailPart> {
        let mut parts = Vec::new();
        if let Some(msg) = &self.message {
            collect_parts(msg, &mut parts);
        }
        parts
    }
}

/// Flatten `message.parts`, descending into attached `message/rfc822` parts
/// right after the part that holds them.
fn collect_parts<'a, 'x: 'a>(
    message: &'a mail_parser::Message<'x>,
    out: &mut Vec<&'a dyn MailPart>,
) {
    for part in &message.parts {
        out.push(part);
        if let PartType::Message(inner) = &part.body {
            collect_parts(inner, out);
        }
    }
}

impl MailPart for mail_parser::MessagePart<'_> {
    fn is_multipart(&self) -> bool {
        matches!(self.body, PartType::Multipart(_) | PartType::Message(_))
    }

    fn mime_type(&self) -> String {
        MimeHeaders::content_type(self)
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| "text/plain".to_string())
    }

    fn disposition(&self) -> Option<String> {
        self.content_disposition()
            .map(|d| d.ctype().to_ascii_lowercase())
    }

    fn filename(&self) -> Option<String> {
        self.attachment_name()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn payload(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.contents())
    }
}

/// An in-memory message, for callers that already hold decoded parts.
#[derive(Debug, Clone, Default)]
pub struct SimpleMessage {
    pub headers: Vec<(String, String)>,
    pub parts: Vec<SimplePart>,
}

impl SimpleMessage {
    /// Add a header; names are matched case-insensitively.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Append a part.
    pub fn part(mut self, part: SimplePart) -> Self {
        self.parts.push(part);
        self
    }
}

impl MailMessage for SimpleMessage {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .filter(|v| !v.trim().is_empty())
    }

    fn parts(&self) -> Vec<&dyn MailPart> {
        self.parts.iter().map(|p| p as &dyn MailPart).collect()
    }
}

/// An in-memory MIME part.
#[derive(Debug, Clone, Default)]
pub struct SimplePart {
    pub mime_type: String,
    pub disposition: Option<String>,
    pub filename: Option<String>,
    pub payload: Vec<u8>,
    pub multipart: bool,
}

impl SimplePart {
    /// A `multipart/*` container.
    pub fn container(subtype: &str) -> Self {
        Self {
            mime_type: format!("multipart/{subtype}"),
            multipart: true,
            ..Self::default()
        }
    }

    /// A body part with no disposition.
    pub fn body(mime_type: &str, payload: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            payload: payload.to_vec(),
            ..Self::default()
        }
    }

    /// A part with `Content-Disposition: attachment; filename=...`.
    pub fn attachment(filename: &str, mime_type: &str, payload: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            disposition: Some("attachment".to_string()),
            filename: Some(filename.to_string()),
            payload: payload.to_vec(),
            multipart: false,
        }
    }
}

impl MailPart for SimplePart {
    fn is_multipart(&self) -> bool {
        self.multipart
    }

    fn mime_type(&self) -> String {
        if self.mime_type.is_empty() {
            "text/plain".to_string()
        } else {
            self.mime_type.to_ascii_lowercase()
        }
    }

    fn disposition(&self) -> Option<String> {
        self.disposition.clone()
    }

    fn filename(&self) -> Option<String> {
        self.filename.clone().filter(|f| !f.trim().is_empty())
    }

    fn payload(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.payload)
    }
}

/// Skip the `From ` separator line at the start of mbox messages.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEFu8, 0xBB, 0xBF][..]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
