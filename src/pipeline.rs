//! End-to-end run: discover, convert, ingest, clean up.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::convert::{self, ConversionOutcome, ConversionReport, Converter};
use crate::error::{ConvertError, PipelineError};
use crate::ingest::{self, Coordinator, IngestOptions, IngestReport, PartitionMode};

/// Everything a run needs; usually built from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory searched recursively for PST/OST containers.
    pub source_dir: PathBuf,
    /// Intermediate directory receiving converted MBOX trees.
    pub mbox_dir: PathBuf,
    /// Output directory, or the store file itself in shared mode.
    pub output: PathBuf,
    /// Conversion workers; 0 means one per CPU.
    pub workers: usize,
    /// Keep `mbox_dir` after ingestion.
    pub keep_mbox: bool,
    pub mode: PartitionMode,
    pub ingest: IngestOptions,
}

/// What a run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub conversion: ConversionReport,
    pub ingest: IngestReport,
}

/// Convert every container under `source_dir` then ingest the results.
///
/// Containers that fail to convert never reach ingestion. Only a missing
/// source directory or an unusable worker pool fail the run as a whole.
pub fn run(
    options: &RunOptions,
    converter: &dyn Converter,
    on_converted: &(dyn Fn(&ConversionOutcome) + Sync),
) -> Result<RunReport, PipelineError> {
    let containers = convert::discover_containers(&options.source_dir)?;
    info!(
        containers = containers.len(),
        source = %options.source_dir.display(),
        "Discovered containers"
    );

    std::fs::create_dir_all(&options.mbox_dir).map_err(|e| ConvertError::Io {
        path: options.mbox_dir.clone(),
        source: e,
    })?;
    let tasks = convert::plan_tasks(&containers, &options.mbox_dir);
    let conversion = convert::convert_all(tasks, converter, options.workers, on_converted)?;
    let converted = conversion.converted();

    let coordinator = Coordinator::new(options.ingest.clone());
    let ingest = match options.mode {
        PartitionMode::PerContainer => coordinator.ingest_per_container(&converted, &options.output),
        PartitionMode::Shared => coordinator.ingest_shared(
            &ingest::shared_store_path(&options.output),
            &options.mbox_dir,
            Some(converted.as_slice()),
        ),
    };

    if options.keep_mbox {
        info!(dir = %options.mbox_dir.display(), "Keeping intermediate directory");
    } else if let Err(e) = ingest::cleanup(&options.mbox_dir, &options.output) {
        warn!(error = %e, "Failed to remove intermediate directory");
    }

    info!(
        converted = converted.len(),
        records = ingest.records_stored(),
        failed_mailboxes = ingest.mailboxes_failed(),
        "Run finished"
    );
    Ok(RunReport { conversion, ingest })
}
