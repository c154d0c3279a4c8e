//! Table layout, pragmas and migration-on-open for the record store.

use rusqlite::Connection;
use tracing::info;

/// Recorded in `PRAGMA user_version` once the schema is current.
pub const SCHEMA_VERSION: i32 = 2;

/// Name of the record table.
pub const TABLE: &str = "emails";

/// `attachment_filename` and `attachment_type` are empty together or set together.
const CREATE_EMAILS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS emails (
    id INTEGER PRIMARY KEY,
    subject TEXT NOT NULL,
    sender_name TEXT NOT NULL DEFAULT '',
    sender_email TEXT NOT NULL,
    recipient_name TEXT NOT NULL DEFAULT '',
    recipient_email TEXT NOT NULL,
    attachment_filename TEXT NOT NULL DEFAULT '',
    attachment_type TEXT NOT NULL DEFAULT '',
    email_date TEXT NOT NULL DEFAULT '',
    source_pst TEXT NOT NULL DEFAULT '',
    CHECK ((attachment_filename = '') = (attachment_type = ''))
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_emails_sender ON emails(sender_email)",
    "CREATE INDEX IF NOT EXISTS idx_emails_recipient ON emails(recipient_email)",
    "CREATE INDEX IF NOT EXISTS idx_emails_date ON emails(email_date)",
    "CREATE INDEX IF NOT EXISTS idx_emails_source ON emails(source_pst)",
];

/// Applied on every open.
const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
"#;

pub const INSERT_SQL: &str = "INSERT INTO emails (subject, sender_name, sender_email, \
     recipient_name, recipient_email, attachment_filename, attachment_type, email_date, source_pst) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(PRAGMAS)
}

/// Create the table if needed, bring older layouts up to date, then index.
///
/// Indexes come last because a legacy table only gains `source_pst` during
/// the migration step.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(CREATE_EMAILS_TABLE, [])?;
    migrate(conn)?;
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }
    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    Ok(())
}

/// Add columns missing from stores written by older versions.
fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let columns = column_names(conn)?;
    if !columns.iter().any(|c| c == "source_pst") {
        conn.execute(
            "ALTER TABLE emails ADD COLUMN source_pst TEXT NOT NULL DEFAULT ''",
            [],
        )?;
        info!(from_version = user_version(conn)?, "Added source_pst column to legacy store");
    }
    Ok(())
}

pub fn column_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(emails)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Whether the record table is present.
pub fn table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [TABLE],
        |row| row.get(0),
    )?;
    Ok(count == 1)
}

pub fn user_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}
