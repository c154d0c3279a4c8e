//! The normalized row produced by extraction and held by the record store.

use serde::{Deserialize, Serialize};

use super::address::EmailAddress;

/// One row per (message, attachment) pair, or one row per message without
/// attachments (empty `attachment_filename` and `attachment_type`).
///
/// `email_date` is kept as the raw header text; it is never parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub subject: String,
    pub sender_name: String,
    pub sender_email: String,
    pub recipient_name: String,
    pub recipient_email: String,
    /// Name of the persisted attachment file, empty when there is none.
    pub attachment_filename: String,
    /// MIME type of the attachment, empty when there is none.
    pub attachment_type: String,
    pub email_date: String,
    /// Originating container identifier (e.g. `archive.pst`), empty if unknown.
    pub source_container: String,
}

impl EmailRecord {
    /// Build the attachment-less record for a message.
    pub fn for_message(
        subject: &str,
        sender: &EmailAddress,
        recipient: &EmailAddress,
        email_date: &str,
        source_container: &str,
    ) -> Self {
        Self {
            subject: subject.to_string(),
            sender_name: sender.display_name.clone(),
            sender_email: sender.address.clone(),
            recipient_name: recipient.display_name.clone(),
            recipient_email: recipient.address.clone(),
            attachment_filename: String::new(),
            attachment_type: String::new(),
            email_date: email_date.to_string(),
            source_container: source_container.to_string(),
        }
    }

    /// Copy of this record carrying one attachment reference.
    pub fn with_attachment(&self, filename: &str, content_type: &str) -> Self {
        Self {
            attachment_filename: filename.to_string(),
            attachment_type: content_type.to_string(),
            ..self.clone()
        }
    }

    /// Whether the record references an attachment.
    pub fn has_attachment(&self) -> bool {
        !self.attachment_filename.is_empty()
    }

    /// Name of the first required field that is empty, if any.
    pub fn missing_required(&self) -> Option<&'static str> {
        if self.subject.trim().is_empty() {
            Some("subject")
        } else if self.sender_email.trim().is_empty() {
            Some("sender_email")
        } else if self.recipient_email.trim().is_empty() {
            Some("recipient_email")
        } else {
            None
        }
    }
}

/// A record read back from the store with its generated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: EmailRecord,
}
