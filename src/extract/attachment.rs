//! Attachment persistence and filename sanitization.

use std::path::Path;

use tracing::debug;

use crate::error::{MboxError, Result};

/// Name of the attachment directory inside an output directory.
pub const ATTACHMENT_DIR_NAME: &str = "attachments";

/// Default cap on sanitized filename length, in characters.
pub const DEFAULT_MAX_FILENAME_LEN: usize = 150;

/// Longest suffix still treated as an extension when truncating.
const MAX_EXTENSION_LEN: usize = 16;

/// Characters rejected by at least one common filesystem.
const DISALLOWED: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Create the attachment directory, parents included, when it is missing.
pub fn prepare_attachment_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| MboxError::io(dir, e))
}

/// Write `bytes` to `destination`, replacing any existing file.
///
/// Returns `false` on any I/O error; the error itself is only logged at
/// debug level, reporting the failure is up to the caller.
pub fn persist(bytes: &[u8], destination: &Path) -> bool {
    match std::fs::write(destination, bytes) {
        Ok(()) => true,
        Err(e) => {
            debug!(path = %destination.display(), error = %e, "Attachment write failed");
            false
        }
    }
}

/// Turn an attachment name from a message into a safe bare filename.
///
/// - directory components are dropped (`../../etc/passwd` → `passwd`)
/// - `\ : * ? " < > |` and control characters become `_`
/// - surrounding whitespace and trailing dots are trimmed
/// - an empty, `.` or `..` result becomes `attachment`
/// - the name is cut to `max_len` characters, keeping its extension
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let last = name.rsplit('/').next().unwrap_or(name);

    let replaced: String = last
        .chars()
        .map(|c| {
            if c.is_control() || DISALLOWED.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let cleaned = replaced.trim().trim_end_matches(['.', ' ']);
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return "attachment".to_string();
    }

    truncate_keeping_extension(cleaned, max_len.max(1))
}

fn truncate_keeping_extension(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }

    if let Some(dot) = name.rfind('.') {
        let (stem, ext) = name.split_at(dot);
        let ext_len = ext.chars().count();
        if dot > 0 && ext_len <= MAX_EXTENSION_LEN && ext_len < max_len {
            let stem: String = stem.chars().take(max_len - ext_len).collect();
            return format!("{stem}{ext}");
        }
    }

    name.chars().take(max_len).collect()
}
