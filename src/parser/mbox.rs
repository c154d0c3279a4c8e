//! Streaming MBOX framing.
//!
//! Splits a mailbox file into raw messages at `From ` separator lines,
//! reading through a 1 MB buffer. The whole file is never held in memory.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{MboxError, Result};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Streaming MBOX parser.
///
/// Tolerates mixed `\n`/`\r\n` line endings, a UTF-8 BOM, `From ` lines not
/// preceded by a blank line (logged), and a truncated last message. A
/// non-empty file whose first non-blank line is not a `From ` separator is
/// rejected as [`MboxError::InvalidMbox`].
pub struct MboxParser {
    path: PathBuf,
    file_size: u64,
    max_message_size: usize,
}

impl MboxParser {
    /// Create a parser for the given MBOX file.
    ///
    /// Verifies that the file exists and is a regular file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MboxError::FileNotFound(path.clone())
            } else {
                MboxError::io(&path, e)
            }
        })?;
        if !metadata.is_file() {
            return Err(MboxError::InvalidMbox(path));
        }
        Ok(Self {
            path,
            file_size: metadata.len(),
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Override the per-message size cap; larger messages are truncated.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max.max(1024);
        self
    }

    /// Walk the mailbox, calling `message_callback(offset, raw_bytes)` for
    /// each message. The raw bytes include the `From ` line.
    ///
    /// The callback returns `true` to continue or `false` to stop early.
    /// Returns the number of messages delivered.
    pub fn parse(&self, message_callback: &mut dyn FnMut(u64, &[u8]) -> bool) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| MboxError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut offset: u64 = 0;
        let mut message_start: u64 = 0;
        let mut message_buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);
        let mut prev_line_was_empty = true;
        let mut seen_separator = false;
        let mut truncated = false;

        loop {
            line_buf.clear();
            let line_len = reader
                .read_until(b'\n', &mut line_buf)
                .map_err(|e| MboxError::io(&self.path, e))?;
            if line_len == 0 {
                break;
            }

            if !seen_separator {
                if is_blank_line(&line_buf) {
                    offset += line_len as u64;
                    continue;
                }
                if !is_mbox_separator(&line_buf) {
                    return Err(MboxError::InvalidMbox(self.path.clone()));
                }
            }

            if is_mbox_separator(&line_buf) {
                if seen_separator && !prev_line_was_empty {
                    warn!(offset, "Found 'From ' separator without preceding blank line");
                }
                if !message_buf.is_empty() {
                    if !message_callback(message_start, &message_buf) {
                        return Ok(count);
                    }
                    count += 1;
                }
                seen_separator = true;
                truncated = false;
                message_start = offset;
                message_buf.clear();
                message_buf.extend_from_slice(&line_buf);
            } else if truncated {
                // Drop everything up to the next separator.
            } else if message_buf.len() + line_buf.len() <= self.max_message_size {
                message_buf.extend_from_slice(&line_buf);
            } else {
                warn!(
                    offset = message_start,
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating body"
                );
                truncated = true;
            }

            prev_line_was_empty = is_blank_line(&line_buf);
            offset += line_len as u64;
        }

        if !message_buf.is_empty() && message_callback(message_start, &message_buf) {
            count += 1;
        }

        Ok(count)
    }
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    let line = line.strip_prefix(&[0xEFu8, 0xBB, 0xBF][..]).unwrap_or(line);
    line.starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_mbox(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn collect(parser: &MboxParser) -> Vec<(u64, Vec<u8>)> {
        let mut messages = Vec::new();
        parser
            .parse(&mut |offset, bytes| {
                messages.push((offset, bytes.to_vec()));
                true
            })
            .unwrap();
        messages
    }

    #[test]
    fn test_is_mbox_separator() {
        assert!(is_mbox_separator(b"From user@example.com Thu Jan 01 00:00:00 2024\n"));
        assert!(!is_mbox_separator(b"from user@example.com\n"));
        assert!(!is_mbox_separator(b">From user@example.com\n"));
        assert!(!is_mbox_separator(b"Subject: From here\n"));
    }

    #[test]
    fn test_is_mbox_separator_with_bom() {
        let mut line = vec![0xEF, 0xBB, 0xBF];
        line.extend_from_slice(b"From user@example.com Thu Jan 01 00:00:00 2024\n");
        assert!(is_mbox_separator(&line));
    }

    #[test]
    fn test_is_blank_line() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(!is_blank_line(b"hello\n"));
    }

    #[test]
    fn test_splits_messages_with_offsets() {
        let file = write_mbox(
            b"From a@x Mon Jan  2 10:00:00 2023\nSubject: one\n\nbody\n\nFrom b@x Mon Jan  2 11:00:00 2023\r\nSubject: two\r\n\r\nbody\r\n",
        );
        let parser = MboxParser::new(file.path()).unwrap();
        let messages = collect(&parser);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, 0);
        assert!(messages[1].1.starts_with(b"From b@x"));
        assert_eq!(messages[1].0, 54);
    }

    #[test]
    fn test_escaped_from_is_not_a_separator() {
        let file = write_mbox(b"From a@x Mon Jan  2 10:00:00 2023\nSubject: one\n\n>From the start\n");
        let parser = MboxParser::new(file.path()).unwrap();
        assert_eq!(collect(&parser).len(), 1);
    }

    #[test]
    fn test_leading_blank_lines_are_skipped() {
        let file = write_mbox(b"\n\nFrom a@x Mon Jan  2 10:00:00 2023\nSubject: one\n\nbody\n");
        let parser = MboxParser::new(file.path()).unwrap();
        let messages = collect(&parser);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, 2);
    }

    #[test]
    fn test_truncated_message_drops_remaining_lines() {
        let mut data = b"From a@x Mon Jan  2 10:00:00 2023\nSubject: big\n\n".to_vec();
        data.extend(std::iter::repeat(b'A').take(2000));
        data.extend_from_slice(b"\ntail\n\nFrom b@x Mon Jan  2 11:00:00 2023\nSubject: two\n\nbody\n");
        let file = write_mbox(&data);

        let parser = MboxParser::new(file.path()).unwrap().with_max_message_size(1024);
        let messages = collect(&parser);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].1.len() <= 1024);
        assert!(messages[0].1.ends_with(b"Subject: big\n\n"));
        assert!(messages[1].1.starts_with(b"From b@x"));
    }

    #[test]
    fn test_rejects_non_mbox() {
        let file = write_mbox(b"%PDF-1.4\nnot a mailbox\n");
        let parser = MboxParser::new(file.path()).unwrap();
        let err = parser.parse(&mut |_, _| true).unwrap_err();
        assert!(matches!(err, MboxError::InvalidMbox(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = MboxParser::new("/nonexistent/file.mbox").err().unwrap();
        assert!(matches!(err, MboxError::FileNotFound(_)));
    }

    #[test]
    fn test_stop_early() {
        let file = write_mbox(
            b"From a@x Mon Jan  2 10:00:00 2023\n\nFrom b@x Mon Jan  2 10:00:00 2023\n\n",
        );
        let parser = MboxParser::new(file.path()).unwrap();
        let count = parser.parse(&mut |_, _| false).unwrap();
        assert_eq!(count, 0);
    }
}
