//! Aggregate statistics over a record store.

use rusqlite::Connection;
use serde::Serialize;

/// Number of rows carrying one attachment type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    pub content_type: String,
    pub count: u64,
}

/// Aggregate view of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub with_attachments: u64,
    pub distinct_senders: u64,
    pub distinct_recipients: u64,
    /// Distinct non-empty source containers, sorted.
    pub source_containers: Vec<String>,
    /// Attachment types by descending count, ties by name.
    pub attachment_types: Vec<TypeCount>,
}

pub(crate) fn collect(conn: &Connection) -> rusqlite::Result<StoreStats> {
    let scalar = |sql: &str| -> rusqlite::Result<u64> {
        conn.query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
    };

    let total_records = scalar("SELECT COUNT(*) FROM emails")?;
    let with_attachments =
        scalar("SELECT COUNT(*) FROM emails WHERE COALESCE(attachment_filename, '') != ''")?;
    let distinct_senders = scalar("SELECT COUNT(DISTINCT sender_email) FROM emails")?;
    let distinct_recipients = scalar("SELECT COUNT(DISTINCT recipient_email) FROM emails")?;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT source_pst FROM emails \
         WHERE COALESCE(source_pst, '') != '' ORDER BY source_pst",
    )?;
    let source_containers = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT attachment_type, COUNT(*) AS n FROM emails \
         WHERE COALESCE(attachment_type, '') != '' \
         GROUP BY attachment_type ORDER BY n DESC, attachment_type ASC",
    )?;
    let attachment_types = stmt
        .query_map([], |row| {
            Ok(TypeCount {
                content_type: row.get(0)?,
                count: row.get::<_, i64>(1)?.max(0) as u64,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(StoreStats {
        total_records,
        with_attachments,
        distinct_senders,
        distinct_recipients,
        source_containers,
        attachment_types,
    })
}
