//! Content screening: executable attachments and sensitive subjects.

use std::sync::LazyLock;

use regex::Regex;

/// Content types that always denote executable content.
const BLOCKED_TYPES: &[&str] = &[
    "application/x-msdownload",
    "application/x-msdos-program",
    "application/x-dosexec",
    "application/x-executable",
    "application/x-elf",
    "application/x-sh",
    "application/x-bat",
    "application/vnd.microsoft.portable-executable",
];

/// Leading bytes of PE, ELF and script payloads.
const BLOCKED_SIGNATURES: &[&[u8]] = &[b"MZ", b"\x7fELF", b"#!"];

static SENSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|passwd|confidential|secret)\b|\b\d{3}-\d{2}-\d{4}\b")
        .expect("valid sensitive-content pattern")
});

/// `false` when an attachment looks executable by type or by signature.
pub fn is_attachment_allowed(content_type: &str, payload: &[u8]) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    if BLOCKED_TYPES.contains(&content_type.as_str()) {
        return false;
    }
    !BLOCKED_SIGNATURES.iter().any(|sig| payload.starts_with(sig))
}

/// Whether text mentions credentials, confidentiality markers or an SSN.
pub fn looks_sensitive(text: &str) -> bool {
    !text.is_empty() && SENSITIVE.is_match(text)
}
