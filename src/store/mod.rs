//! Embedded SQLite record store.
//!
//! One `emails` table per store file. Writes are grouped into transactions:
//! a chunk of a batch insert, a single insert, or one mailbox file through
//! [`MailboxTx`]. A write that fails rolls its transaction back; nothing is
//! retried.

pub mod query;
pub mod schema;
pub mod stats;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::record::{EmailRecord, StoredRecord};

pub use query::RecordFilter;
pub use stats::{StoreStats, TypeCount};

/// Default lock wait before a write reports [`StoreError::Busy`].
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// How a failing row affects the rest of its chunk in a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchGranularity {
    /// The whole chunk commits or none of it does.
    #[default]
    Chunk,
    /// Each row gets a savepoint; only offending rows are lost.
    Record,
}

/// Connection settings for [`RecordStore::open_with`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
    pub granularity: BatchGranularity,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            granularity: BatchGranularity::Chunk,
        }
    }
}

/// An open store. Dropping it closes the connection.
pub struct RecordStore {
    conn: Connection,
    path: PathBuf,
    options: StoreOptions,
}

impl RecordStore {
    /// Open (creating if necessary) the store at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open the store, apply pragmas, create or migrate the schema, and
    /// verify the record table exists.
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateFailed {
                path: path.clone(),
                reason: format!("cannot create '{}': {e}", parent.display()),
            })?;
        }

        let connection_error = |source| StoreError::Connection {
            path: path.clone(),
            source,
        };
        let conn = Connection::open(&path).map_err(connection_error)?;
        conn.busy_timeout(options.busy_timeout)
            .map_err(connection_error)?;
        schema::apply_pragmas(&conn).map_err(connection_error)?;

        let create_error = |reason: String| StoreError::CreateFailed {
            path: path.clone(),
            reason,
        };
        schema::initialize(&conn).map_err(|e| create_error(e.to_string()))?;
        match schema::table_exists(&conn) {
            Ok(true) => {}
            Ok(false) => return Err(create_error("emails table missing after creation".into())),
            Err(e) => return Err(create_error(e.to_string())),
        }

        debug!(path = %path.display(), "Record store opened");
        Ok(Self {
            conn,
            path,
            options,
        })
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert one record in its own transaction.
    ///
    /// Returns `false` for a record missing a required field and for any
    /// write failure; the failure is logged.
    pub fn insert_one(&self, record: &EmailRecord) -> bool {
        if let Some(field) = record.missing_required() {
            warn!(field, "Rejected record with missing required field");
            return false;
        }
        let result = (|| -> StoreResult<()> {
            let tx = self.begin()?;
            insert_row(&tx, record).map_err(StoreError::from_write)?;
            tx.commit().map_err(StoreError::from_write)
        })();
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Insert failed");
                false
            }
        }
    }

    /// Insert `records` in chunks of `batch_size`, using the store's
    /// configured granularity. Returns `(successful, failed)`.
    pub fn insert_batch(&self, records: &[EmailRecord], batch_size: usize) -> (usize, usize) {
        self.insert_batch_with(records, batch_size, self.options.granularity)
    }

    /// Insert `records` in chunks of `batch_size` (0 is treated as 1).
    ///
    /// Invalid records are counted failed up front and never occupy a chunk
    /// slot. Each chunk is one transaction.
    pub fn insert_batch_with(
        &self,
        records: &[EmailRecord],
        batch_size: usize,
        granularity: BatchGranularity,
    ) -> (usize, usize) {
        let (valid, invalid): (Vec<&EmailRecord>, Vec<&EmailRecord>) = records
            .iter()
            .partition(|r| r.missing_required().is_none());

        let mut successful = 0;
        let mut failed = invalid.len();
        if !invalid.is_empty() {
            warn!(count = invalid.len(), "Rejected records with missing required fields");
        }

        for (index, chunk) in valid.chunks(batch_size.max(1)).enumerate() {
            match self.write_chunk(chunk, granularity) {
                Ok(written) => {
                    successful += written;
                    failed += chunk.len() - written;
                }
                Err(e) => {
                    warn!(chunk = index, size = chunk.len(), error = %e, "Batch chunk rolled back");
                    failed += chunk.len();
                }
            }
        }

        debug!(successful, failed, "Batch insert finished");
        (successful, failed)
    }

    fn write_chunk(
        &self,
        chunk: &[&EmailRecord],
        granularity: BatchGranularity,
    ) -> StoreResult<usize> {
        let mut tx = self.begin()?;
        let mut written = 0;

        match granularity {
            BatchGranularity::Chunk => {
                for record in chunk {
                    insert_row(&tx, record).map_err(StoreError::from_write)?;
                    written += 1;
                }
            }
            BatchGranularity::Record => {
                for record in chunk {
                    let savepoint = tx.savepoint().map_err(StoreError::from_write)?;
                    match insert_row(&savepoint, record) {
                        Ok(()) => {
                            savepoint.commit().map_err(StoreError::from_write)?;
                            written += 1;
                        }
                        // The savepoint rolls back when dropped.
                        Err(e) => debug!(error = %e, "Row rejected inside chunk"),
                    }
                }
            }
        }

        tx.commit().map_err(StoreError::from_write)?;
        Ok(written)
    }

    /// Start the transaction that holds one mailbox file's rows.
    pub fn begin_mailbox(&self) -> StoreResult<MailboxTx<'_>> {
        Ok(MailboxTx {
            tx: self.begin()?,
            inserted: 0,
            rejected: 0,
        })
    }

    /// Records matching `filter`, newest `email_date` first.
    pub fn query(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<StoredRecord>> {
        let (sql, values) = filter.select_sql(limit, offset);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), query::row_to_stored)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        Ok(stats::collect(&self.conn)?)
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> StoreResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Close the connection, reporting any error SQLite raises on close.
    pub fn close(self) -> StoreResult<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn begin(&self) -> StoreResult<Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .map_err(StoreError::from_write)
    }
}

/// Rows for one mailbox file, committed together.
///
/// Dropping the value without calling [`MailboxTx::commit`] rolls back.
pub struct MailboxTx<'a> {
    tx: Transaction<'a>,
    inserted: usize,
    rejected: usize,
}

impl MailboxTx<'_> {
    /// Insert one record.
    ///
    /// A record missing a required field is counted and reported as
    /// [`StoreError::Validation`] without touching the transaction; any
    /// other error means the transaction should be abandoned.
    pub fn insert(&mut self, record: &EmailRecord) -> StoreResult<()> {
        if let Some(field) = record.missing_required() {
            self.rejected += 1;
            return Err(StoreError::Validation { field });
        }
        insert_row(&self.tx, record).map_err(StoreError::from_write)?;
        self.inserted += 1;
        Ok(())
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Commit and return the number of rows written.
    pub fn commit(self) -> StoreResult<usize> {
        let inserted = self.inserted;
        self.tx.commit().map_err(StoreError::from_write)?;
        Ok(inserted)
    }

    pub fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().map_err(StoreError::from_write)
    }
}

fn insert_row(conn: &Connection, record: &EmailRecord) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(schema::INSERT_SQL)?;
    stmt.execute(params![
        record.subject,
        record.sender_name,
        record.sender_email,
        record.recipient_name,
        record.recipient_email,
        record.attachment_filename,
        record.attachment_type,
        record.email_date,
        record.source_container,
    ])?;
    Ok(())
}

/// Row count of the store at `path`, or 0 when it cannot be read.
///
/// The file is opened without `SQLITE_OPEN_CREATE`, so a missing store is
/// not created.
pub fn count(path: impl AsRef<Path>) -> u64 {
    let path = path.as_ref();
    let result = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
        .and_then(|conn| {
            conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get::<_, i64>(0))
        });
    match result {
        Ok(n) => n.max(0) as u64,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot count store rows");
            0
        }
    }
}
