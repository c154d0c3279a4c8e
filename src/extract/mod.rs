//! Message extraction: turns mailbox files into [`EmailRecord`] values.
//!
//! The [`Extractor`] owns nothing but an attachment directory and a few
//! limits. Records are handed to a caller callback as soon as each message
//! has been processed, so a mailbox is never materialized in memory.

pub mod attachment;
pub mod screen;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::address::EmailAddress;
use crate::model::record::EmailRecord;
use crate::parser::mbox::{MboxParser, MAX_MESSAGE_SIZE};
use crate::parser::mime::{MailMessage, ParsedMessage};

/// Tunables for extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Refuse executable attachments (see [`screen::is_attachment_allowed`]).
    pub screen_attachments: bool,
    /// Cap on sanitized attachment filenames, in characters.
    pub max_filename_len: usize,
    /// Messages larger than this are truncated by the framer.
    pub max_message_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            screen_attachments: false,
            max_filename_len: attachment::DEFAULT_MAX_FILENAME_LEN,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Counters accumulated while extracting one or more mailbox files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub messages_seen: u64,
    pub messages_skipped: u64,
    pub records_emitted: u64,
    pub attachments_saved: u64,
    pub attachments_failed: u64,
    pub attachments_blocked: u64,
    pub bytes_saved: u64,
    pub sensitive_messages: u64,
    /// The record callback asked to stop before the end of the mailbox.
    pub aborted: bool,
}

impl ExtractSummary {
    /// Fold another summary into this one.
    pub fn merge(&mut self, other: &ExtractSummary) {
        self.messages_seen += other.messages_seen;
        self.messages_skipped += other.messages_skipped;
        self.records_emitted += other.records_emitted;
        self.attachments_saved += other.attachments_saved;
        self.attachments_failed += other.attachments_failed;
        self.attachments_blocked += other.attachments_blocked;
        self.bytes_saved += other.bytes_saved;
        self.sensitive_messages += other.sensitive_messages;
        self.aborted |= other.aborted;
    }
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Records emitted for the message (zero when every attachment failed).
    Emitted(usize),
    /// A required header was missing or unusable.
    Skipped(&'static str),
    /// The record callback returned `false`.
    Aborted,
}

/// Extracts records from mailbox files, persisting attachments as it goes.
pub struct Extractor {
    attachment_dir: PathBuf,
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(attachment_dir: impl Into<PathBuf>, options: ExtractOptions) -> Self {
        Self {
            attachment_dir: attachment_dir.into(),
            options,
        }
    }

    /// Extract every message of `mbox_path`, calling `emit` once per record.
    ///
    /// `emit` returns `false` to stop; the summary then has `aborted` set.
    /// Fails only when the mailbox itself cannot be read or is not an MBOX;
    /// bad messages and failed attachments are counted and logged instead.
    pub fn extract_mailbox(
        &self,
        mbox_path: &Path,
        source_container: &str,
        emit: &mut dyn FnMut(EmailRecord) -> bool,
    ) -> Result<ExtractSummary> {
        attachment::prepare_attachment_dir(&self.attachment_dir)?;

        let parser =
            MboxParser::new(mbox_path)?.with_max_message_size(self.options.max_message_size);
        let mut summary = ExtractSummary::default();

        parser.parse(&mut |offset, raw| {
            summary.messages_seen += 1;
            let message = ParsedMessage::parse(raw);
            match self.extract_message(&message, source_container, &mut summary, &mut *emit) {
                MessageOutcome::Emitted(_) => true,
                MessageOutcome::Skipped(header) => {
                    warn!(
                        mailbox = %mbox_path.display(),
                        offset,
                        header,
                        "Skipping message without required header"
                    );
                    true
                }
                MessageOutcome::Aborted => false,
            }
        })?;

        info!(
            mailbox = %mbox_path.display(),
            messages = summary.messages_seen,
            records = summary.records_emitted,
            skipped = summary.messages_skipped,
            attachments = summary.attachments_saved,
            "Mailbox extracted"
        );
        Ok(summary)
    }

    /// Turn one message into records.
    ///
    /// Each non-multipart part with a disposition and a filename is an
    /// attachment; a record is emitted for each one that is persisted. A
    /// message with no such part yields one record with empty attachment
    /// fields. A message whose attachments all fail yields nothing.
    pub fn extract_message(
        &self,
        message: &dyn MailMessage,
        source_container: &str,
        summary: &mut ExtractSummary,
        emit: &mut dyn FnMut(EmailRecord) -> bool,
    ) -> MessageOutcome {
        let outcome = self.extract_inner(message, source_container, summary, emit);
        match outcome {
            MessageOutcome::Emitted(n) => summary.records_emitted += n as u64,
            MessageOutcome::Skipped(_) => summary.messages_skipped += 1,
            MessageOutcome::Aborted => summary.aborted = true,
        }
        outcome
    }

    fn extract_inner(
        &self,
        message: &dyn MailMessage,
        source_container: &str,
        summary: &mut ExtractSummary,
        emit: &mut dyn FnMut(EmailRecord) -> bool,
    ) -> MessageOutcome {
        let Some(subject) = message.header("subject") else {
            return MessageOutcome::Skipped("subject");
        };
        let Some(from) = message.header("from") else {
            return MessageOutcome::Skipped("from");
        };
        let Some(to) = message.header("to") else {
            return MessageOutcome::Skipped("to");
        };

        let sender = EmailAddress::first_of(&from);
        if sender.address.is_empty() {
            return MessageOutcome::Skipped("from");
        }
        let recipient = EmailAddress::first_of(&to);
        if recipient.address.is_empty() {
            return MessageOutcome::Skipped("to");
        }
        let date = message.header("date").unwrap_or_default();

        if screen::looks_sensitive(&subject) {
            summary.sensitive_messages += 1;
            warn!(sender = %sender.address, "Message subject looks sensitive");
        }

        let base = EmailRecord::for_message(&subject, &sender, &recipient, &date, source_container);

        let mut qualifying = 0usize;
        let mut emitted = 0usize;
        for part in message.parts() {
            if part.is_multipart() || part.disposition().is_none() {
                continue;
            }
            let Some(original_name) = part.filename() else {
                continue;
            };
            qualifying += 1;

            let content_type = part.mime_type();
            let payload = part.payload();

            if self.options.screen_attachments
                && !screen::is_attachment_allowed(&content_type, &payload)
            {
                summary.attachments_blocked += 1;
                warn!(
                    filename = %original_name,
                    content_type = %content_type,
                    "Attachment blocked by screening"
                );
                continue;
            }

            let stored_name =
                attachment::sanitize_filename(&original_name, self.options.max_filename_len);
            let destination = self.attachment_dir.join(&stored_name);
            if !attachment::persist(&payload, &destination) {
                summary.attachments_failed += 1;
                warn!(
                    filename = %stored_name,
                    path = %destination.display(),
                    "Failed to save attachment, dropping its record"
                );
                continue;
            }
            summary.attachments_saved += 1;
            summary.bytes_saved += payload.len() as u64;
            debug!(filename = %stored_name, size = payload.len(), "Attachment saved");

            if !emit(base.with_attachment(&stored_name, &content_type)) {
                return MessageOutcome::Aborted;
            }
            emitted += 1;
        }

        if qualifying == 0 {
            if !emit(base) {
                return MessageOutcome::Aborted;
            }
            emitted = 1;
        }

        MessageOutcome::Emitted(emitted)
    }
}
