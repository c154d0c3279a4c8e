//! Ingestion coordinator: mailbox files into record stores.
//!
//! Each mailbox file is written inside one store transaction. Any failure
//! while a mailbox is being ingested (unreadable file, write error, aborted
//! extraction) rolls back that mailbox only; the coordinator logs it and
//! moves on to the next file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::convert::ConvertedContainer;
use crate::error::{PipelineError, StoreError, StoreResult};
use crate::extract::{attachment, ExtractOptions, ExtractSummary, Extractor};
use crate::model::record::EmailRecord;
use crate::store::{MailboxTx, RecordStore, StoreOptions};

/// File name of the store in shared mode when the output path is a directory.
pub const SHARED_STORE_NAME: &str = "emaildb.sqlite3";

/// Extension of per-container store files.
pub const STORE_EXTENSION: &str = "sqlite3";

/// Default number of records buffered before they are written.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Store boundaries for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionMode {
    /// One store per source container.
    #[default]
    PerContainer,
    /// One store for every container of the run.
    Shared,
}

/// Settings shared by every partition of a run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Records buffered before being written into the mailbox transaction.
    pub batch_size: usize,
    pub store: StoreOptions,
    pub extract: ExtractOptions,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            store: StoreOptions::default(),
            extract: ExtractOptions::default(),
        }
    }
}

/// Result of ingesting one mailbox file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MailboxReport {
    pub path: PathBuf,
    pub label: String,
    pub stored: usize,
    pub rejected: usize,
    pub extraction: ExtractSummary,
    /// Set when the mailbox was rolled back.
    pub error: Option<String>,
}

impl MailboxReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one store partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionReport {
    pub store_path: PathBuf,
    /// Container identifier in per-container mode.
    pub label: Option<String>,
    pub mailboxes: Vec<MailboxReport>,
    /// Set when the store could not be opened; nothing was ingested.
    pub error: Option<String>,
}

impl PartitionReport {
    fn failed(store_path: &Path, label: Option<&str>, error: String) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            label: label.map(str::to_string),
            mailboxes: Vec::new(),
            error: Some(error),
        }
    }

    pub fn mailboxes_ok(&self) -> usize {
        self.mailboxes.iter().filter(|m| m.succeeded()).count()
    }

    pub fn mailboxes_failed(&self) -> usize {
        self.mailboxes.len() - self.mailboxes_ok()
    }

    pub fn records_stored(&self) -> usize {
        self.mailboxes.iter().map(|m| m.stored).sum()
    }

    pub fn records_rejected(&self) -> usize {
        self.mailboxes.iter().map(|m| m.rejected).sum()
    }

    /// Extraction counters of the mailboxes that were committed.
    pub fn extraction(&self) -> ExtractSummary {
        let mut total = ExtractSummary::default();
        for m in self.mailboxes.iter().filter(|m| m.succeeded()) {
            total.merge(&m.extraction);
        }
        total
    }
}

/// Result of a whole ingestion phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub partitions: Vec<PartitionReport>,
}

impl IngestReport {
    pub fn records_stored(&self) -> usize {
        self.partitions.iter().map(|p| p.records_stored()).sum()
    }

    pub fn mailboxes_failed(&self) -> usize {
        self.partitions.iter().map(|p| p.mailboxes_failed()).sum()
    }

    pub fn partitions_failed(&self) -> usize {
        self.partitions.iter().filter(|p| p.error.is_some()).count()
    }
}

/// Regular files named `mbox` or ending in `.mbox` under `dir`, sorted.
///
/// Unreadable entries are logged and skipped; a missing directory yields
/// an empty list.
pub fn find_mailbox_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_file() && is_mailbox_file(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry"),
        }
    }
    files.sort();
    files
}

fn is_mailbox_file(path: &Path) -> bool {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mbox"));
    by_extension || path.file_name().is_some_and(|n| n == "mbox")
}

/// Container label for a mailbox found by walking `root` without a
/// container list: the parent directory name plus `.pst`, or empty for a
/// mailbox directly under `root`.
pub fn infer_source_label(mailbox: &Path, root: &Path) -> String {
    match mailbox.parent() {
        Some(parent) if parent != root => parent
            .file_name()
            .map(|n| format!("{}.pst", n.to_string_lossy()))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Treat each immediate subdirectory of an existing MBOX tree as one
/// converted container, labelled like [`infer_source_label`] does.
pub fn containers_from_tree(root: &Path) -> Result<Vec<ConvertedContainer>, PipelineError> {
    let entries = std::fs::read_dir(root).map_err(|e| PipelineError::io(root, e))?;
    let mut containers = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(root, e))?;
        let path = entry.path();
        if path.is_dir() {
            containers.push(ConvertedContainer {
                container_id: format!("{}.pst", entry.file_name().to_string_lossy()),
                output_dir: path,
            });
        }
    }
    containers.sort_by(|a, b| a.output_dir.cmp(&b.output_dir));
    Ok(containers)
}

/// Mailbox files directly under `root`, outside any container subdirectory.
pub fn root_mailbox_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_file() && is_mailbox_file(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => warn!(dir = %root.display(), error = %e, "Skipping unreadable entry"),
        }
    }
    files.sort();
    files
}

/// Store file for shared mode: `<output>/emaildb.sqlite3` when `output` is
/// a directory or has no extension, `output` itself otherwise.
pub fn shared_store_path(output: &Path) -> PathBuf {
    if output.is_dir() || output.extension().is_none() {
        output.join(SHARED_STORE_NAME)
    } else {
        output.to_path_buf()
    }
}

/// Drives extraction and storage for a run. Stores are opened per
/// partition and closed when the partition is done.
pub struct Coordinator {
    options: IngestOptions,
}

impl Coordinator {
    pub fn new(options: IngestOptions) -> Self {
        Self { options }
    }

    /// One store per container at `<output_dir>/<subdir>.sqlite3`, where
    /// `<subdir>` is the container's conversion directory name.
    pub fn ingest_per_container(
        &self,
        containers: &[ConvertedContainer],
        output_dir: &Path,
    ) -> IngestReport {
        let attachment_dir = output_dir.join(attachment::ATTACHMENT_DIR_NAME);
        let mut report = IngestReport::default();

        for container in containers {
            let stem = container
                .output_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| container.container_id.clone());
            let store_path = output_dir.join(format!("{stem}.{STORE_EXTENSION}"));
            let mailboxes: Vec<(PathBuf, String)> = find_mailbox_files(&container.output_dir)
                .into_iter()
                .map(|m| (m, container.container_id.clone()))
                .collect();

            report.partitions.push(self.ingest_partition(
                &store_path,
                Some(&container.container_id),
                &attachment_dir,
                &mailboxes,
            ));
        }
        report
    }

    /// Per-container ingestion of an existing MBOX tree.
    ///
    /// Each immediate subdirectory of `root` is one container. Mailbox files
    /// sitting directly under `root` go to one more store named after `root`,
    /// with an empty container label, so no mailbox of the tree is skipped.
    pub fn ingest_tree(
        &self,
        root: &Path,
        output_dir: &Path,
    ) -> Result<IngestReport, PipelineError> {
        let containers = containers_from_tree(root)?;
        let mut report = self.ingest_per_container(&containers, output_dir);

        let loose = root_mailbox_files(root);
        if loose.is_empty() {
            return Ok(report);
        }

        let taken: Vec<String> = containers
            .iter()
            .filter_map(|c| c.output_dir.file_name())
            .map(|n| n.to_string_lossy().to_lowercase())
            .collect();
        let base = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mbox".to_string());
        let mut stem = base.clone();
        let mut n = 2;
        while taken.contains(&stem.to_lowercase()) {
            stem = format!("{base}_{n}");
            n += 1;
        }

        info!(
            root = %root.display(),
            mailboxes = loose.len(),
            "Mailbox files outside any container get their own store"
        );
        let mailboxes: Vec<(PathBuf, String)> =
            loose.into_iter().map(|m| (m, String::new())).collect();
        report.partitions.push(self.ingest_partition(
            &output_dir.join(format!("{stem}.{STORE_EXTENSION}")),
            None,
            &output_dir.join(attachment::ATTACHMENT_DIR_NAME),
            &mailboxes,
        ));
        Ok(report)
    }

    /// Everything into one store.
    ///
    /// With `containers`, only their conversion directories are read and
    /// the container identifiers are used as labels. Without, the whole
    /// `mbox_root` tree is read and labels come from
    /// [`infer_source_label`].
    pub fn ingest_shared(
        &self,
        store_path: &Path,
        mbox_root: &Path,
        containers: Option<&[ConvertedContainer]>,
    ) -> IngestReport {
        let attachment_dir = store_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(attachment::ATTACHMENT_DIR_NAME);

        let mailboxes: Vec<(PathBuf, String)> = match containers {
            Some(list) => list
                .iter()
                .flat_map(|c| {
                    find_mailbox_files(&c.output_dir)
                        .into_iter()
                        .map(move |m| (m, c.container_id.clone()))
                })
                .collect(),
            None => find_mailbox_files(mbox_root)
                .into_iter()
                .map(|m| {
                    let label = infer_source_label(&m, mbox_root);
                    (m, label)
                })
                .collect(),
        };

        IngestReport {
            partitions: vec![self.ingest_partition(store_path, None, &attachment_dir, &mailboxes)],
        }
    }

    fn ingest_partition(
        &self,
        store_path: &Path,
        label: Option<&str>,
        attachment_dir: &Path,
        mailboxes: &[(PathBuf, String)],
    ) -> PartitionReport {
        let store = match RecordStore::open_with(store_path, self.options.store.clone()) {
            Ok(store) => store,
            Err(e) => {
                error!(store = %store_path.display(), error = %e, "Cannot open store, skipping partition");
                return PartitionReport::failed(store_path, label, e.to_string());
            }
        };
        let extractor = Extractor::new(attachment_dir, self.options.extract.clone());
        info!(
            store = %store_path.display(),
            mailboxes = mailboxes.len(),
            "Ingesting partition"
        );

        let mut report = PartitionReport {
            store_path: store_path.to_path_buf(),
            label: label.map(str::to_string),
            ..PartitionReport::default()
        };

        for (mailbox, source) in mailboxes {
            let entry = match self.ingest_mailbox(&store, &extractor, mailbox, source) {
                Ok(entry) => entry,
                Err(e) => {
                    error!(mailbox = %mailbox.display(), error = %e, "Mailbox rolled back");
                    MailboxReport {
                        path: mailbox.clone(),
                        label: source.clone(),
                        error: Some(e.to_string()),
                        ..MailboxReport::default()
                    }
                }
            };
            report.mailboxes.push(entry);
        }

        if let Err(e) = store.close() {
            warn!(store = %store_path.display(), error = %e, "Error closing store");
        }
        info!(
            store = %store_path.display(),
            stored = report.records_stored(),
            failed_mailboxes = report.mailboxes_failed(),
            "Partition finished"
        );
        report
    }

    /// Extract one mailbox file into `store` as a single transaction.
    ///
    /// Records missing required fields are dropped and counted. Any other
    /// failure rolls back every row of this mailbox and is returned.
    pub fn ingest_mailbox(
        &self,
        store: &RecordStore,
        extractor: &Extractor,
        mailbox: &Path,
        source_container: &str,
    ) -> Result<MailboxReport, PipelineError> {
        let batch_size = self.options.batch_size.max(1);
        let mut tx = store.begin_mailbox()?;
        let mut pending: Vec<EmailRecord> = Vec::with_capacity(batch_size);
        let mut write_error: Option<StoreError> = None;

        let extraction = extractor.extract_mailbox(mailbox, source_container, &mut |record| {
            pending.push(record);
            if pending.len() >= batch_size {
                if let Err(e) = flush(&mut tx, &mut pending) {
                    write_error = Some(e);
                    return false;
                }
            }
            true
        })?;

        if let Some(e) = write_error {
            return Err(e.into());
        }
        if extraction.aborted {
            return Err(PipelineError::Aborted(mailbox.to_path_buf()));
        }
        flush(&mut tx, &mut pending)?;

        let rejected = tx.rejected();
        let stored = tx.commit()?;
        debug!(mailbox = %mailbox.display(), stored, rejected, "Mailbox committed");

        Ok(MailboxReport {
            path: mailbox.to_path_buf(),
            label: source_container.to_string(),
            stored,
            rejected,
            extraction,
            error: None,
        })
    }
}

/// Write buffered records; validation failures are counted by the
/// transaction and skipped.
fn flush(tx: &mut MailboxTx<'_>, pending: &mut Vec<EmailRecord>) -> StoreResult<()> {
    for record in pending.drain(..) {
        match tx.insert(&record) {
            Ok(()) => {}
            Err(e) if e.is_validation() => debug!(error = %e, "Dropped invalid record"),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove the intermediate conversion directory.
///
/// Returns `false` without touching anything when the directory is already
/// gone or when `output` lies inside it.
pub fn cleanup(mbox_dir: &Path, output: &Path) -> Result<bool, PipelineError> {
    if !mbox_dir.exists() {
        return Ok(false);
    }
    if resolve(output).starts_with(resolve(mbox_dir)) {
        warn!(
            dir = %mbox_dir.display(),
            output = %output.display(),
            "Output is inside the intermediate directory, not removing it"
        );
        return Ok(false);
    }
    std::fs::remove_dir_all(mbox_dir).map_err(|e| PipelineError::io(mbox_dir, e))?;
    info!(dir = %mbox_dir.display(), "Removed intermediate directory");
    Ok(true)
}

/// Absolute form of `path`; a missing last component is joined onto its
/// resolved parent.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_source_label() {
        let root = Path::new("/tmp/mbox");
        assert_eq!(
            infer_source_label(Path::new("/tmp/mbox/alice/Inbox.mbox"), root),
            "alice.pst"
        );
        assert_eq!(
            infer_source_label(Path::new("/tmp/mbox/alice/Sent/mbox"), root),
            "Sent.pst"
        );
        assert_eq!(infer_source_label(Path::new("/tmp/mbox/loose.mbox"), root), "");
    }

    #[test]
    fn test_root_mailbox_files_skip_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("carol")).unwrap();
        std::fs::write(dir.path().join("carol/Inbox.mbox"), b"").unwrap();
        std::fs::write(dir.path().join("loose.mbox"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = root_mailbox_files(dir.path());
        assert_eq!(files, vec![dir.path().join("loose.mbox")]);
    }

    #[test]
    fn test_is_mailbox_file() {
        assert!(is_mailbox_file(Path::new("a/Inbox.mbox")));
        assert!(is_mailbox_file(Path::new("a/Inbox.MBOX")));
        assert!(is_mailbox_file(Path::new("a/Inbox/mbox")));
        assert!(!is_mailbox_file(Path::new("a/notes.txt")));
        assert!(!is_mailbox_file(Path::new("a/mbox.bak")));
    }

    #[test]
    fn test_find_mailbox_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/mbox"), b"").unwrap();
        std::fs::write(dir.path().join("a.mbox"), b"").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), b"").unwrap();

        let found = find_mailbox_files(dir.path());
        assert_eq!(found, vec![dir.path().join("a.mbox"), dir.path().join("b/mbox")]);
        assert!(find_mailbox_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_shared_store_path() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(shared_store_path(dir.path()), dir.path().join("emaildb.sqlite3"));
        assert_eq!(
            shared_store_path(&dir.path().join("out")),
            dir.path().join("out").join("emaildb.sqlite3")
        );
        let file = dir.path().join("all.sqlite3");
        assert_eq!(shared_store_path(&file), file);
    }

    #[test]
    fn test_containers_from_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bob")).unwrap();
        std::fs::create_dir_all(dir.path().join("alice")).unwrap();
        std::fs::write(dir.path().join("loose.mbox"), b"").unwrap();

        let containers = containers_from_tree(dir.path()).unwrap();
        let ids: Vec<_> = containers.iter().map(|c| c.container_id.as_str()).collect();
        assert_eq!(ids, ["alice.pst", "bob.pst"]);
        assert_eq!(containers[0].output_dir, dir.path().join("alice"));
    }

    #[test]
    fn test_cleanup_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let removed = cleanup(&dir.path().join("never-created"), dir.path()).unwrap();
        assert!(!removed);
    }

    #[test]
    fn test_cleanup_keeps_dir_holding_output() {
        let dir = tempfile::tempdir().unwrap();
        let mbox = dir.path().join("mbox");
        std::fs::create_dir_all(mbox.join("out")).unwrap();

        assert!(!cleanup(&mbox, &mbox.join("out")).unwrap());
        assert!(!cleanup(&mbox, &mbox.join("out/emaildb.sqlite3")).unwrap());
        assert!(!cleanup(&mbox, &mbox).unwrap());
        assert!(mbox.join("out").is_dir());

        assert!(cleanup(&mbox, &dir.path().join("output")).unwrap());
        assert!(!mbox.exists());
    }
}
