//! Record filters and their translation to SQL.

use rusqlite::types::Value;
use rusqlite::Row;

use crate::model::record::{EmailRecord, StoredRecord};

/// Columns read back for a [`StoredRecord`], in `row_to_stored` order.
const SELECT_COLUMNS: &str = "id, subject, sender_name, sender_email, recipient_name, \
     recipient_email, attachment_filename, attachment_type, email_date, source_pst";

/// Criteria for [`RecordStore::query`](super::RecordStore::query).
///
/// Unset fields do not constrain the result. Sender and recipient match as
/// substrings, the source container matches exactly, and the date bounds are
/// inclusive string comparisons on the raw header text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub source_container: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub has_attachment: Option<bool>,
}

impl RecordFilter {
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn source_container(mut self, source: impl Into<String>) -> Self {
        self.source_container = Some(source.into());
        self
    }

    pub fn date_range(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn has_attachment(mut self, value: bool) -> Self {
        self.has_attachment = Some(value);
        self
    }

    /// Build the `SELECT` and its positional parameters.
    pub(crate) fn select_sql(&self, limit: usize, offset: usize) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut push = |clause: &str, value: Value, values: &mut Vec<Value>| {
            values.push(value);
            clauses.push(clause.replace('?', &format!("?{}", values.len())));
        };

        if let Some(sender) = &self.sender {
            push("sender_email LIKE ? ESCAPE '\\'", like_pattern(sender), &mut values);
        }
        if let Some(recipient) = &self.recipient {
            push("recipient_email LIKE ? ESCAPE '\\'", like_pattern(recipient), &mut values);
        }
        if let Some(source) = &self.source_container {
            push("source_pst = ?", Value::Text(source.clone()), &mut values);
        }
        if let Some(from) = &self.date_from {
            push("email_date >= ?", Value::Text(from.clone()), &mut values);
        }
        if let Some(to) = &self.date_to {
            push("email_date <= ?", Value::Text(to.clone()), &mut values);
        }
        match self.has_attachment {
            Some(true) => clauses.push("COALESCE(attachment_filename, '') != ''".to_string()),
            Some(false) => clauses.push("COALESCE(attachment_filename, '') = ''".to_string()),
            None => {}
        }

        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM emails");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY email_date DESC, id DESC");

        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{}", values.len()));
        values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" OFFSET ?{}", values.len()));

        (sql, values)
    }
}

/// `%text%` with LIKE wildcards in `text` escaped.
fn like_pattern(text: &str) -> Value {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    Value::Text(escaped)
}

/// Map a row selected with `SELECT_COLUMNS`. NULLs from legacy stores read as empty.
pub(crate) fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };
    Ok(StoredRecord {
        id: row.get(0)?,
        record: EmailRecord {
            subject: text(1)?,
            sender_name: text(2)?,
            sender_email: text(3)?,
            recipient_name: text(4)?,
            recipient_email: text(5)?,
            attachment_filename: text(6)?,
            attachment_type: text(7)?,
            email_date: text(8)?,
            source_container: text(9)?,
        },
    })
}
