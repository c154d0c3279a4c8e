//! Container discovery and parallel conversion to MBOX.
//!
//! Each PST/OST container is handed to an external [`Converter`] on a rayon
//! pool. Only the boolean outcome is kept; the converted tree under the
//! task's destination directory is what ingestion reads next.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ConvertError;

/// Extensions recognised as mailbox containers (compared case-insensitively).
pub const CONTAINER_EXTENSIONS: &[&str] = &["pst", "ost"];

/// Default converter program.
pub const DEFAULT_CONVERTER: &str = "readpst";

/// Turns one container into a directory of MBOX files.
pub trait Converter: Send + Sync {
    /// Convert `source` into `destination`; `true` on success.
    fn convert(&self, source: &Path, destination: &Path) -> bool;
}

/// Runs `readpst -D -b -o <destination> <source>` with output discarded.
#[derive(Debug, Clone)]
pub struct ReadpstConverter {
    program: PathBuf,
}

impl ReadpstConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ReadpstConverter {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERTER)
    }
}

impl Converter for ReadpstConverter {
    fn convert(&self, source: &Path, destination: &Path) -> bool {
        let status = Command::new(&self.program)
            .arg("-D")
            .arg("-b")
            .arg("-o")
            .arg(destination)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                debug!(source = %source.display(), code = ?status.code(), "Converter exited with failure");
                false
            }
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "Failed to start converter");
                false
            }
        }
    }
}

/// One container to convert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionTask {
    pub source: PathBuf,
    /// Container file name, e.g. `archive.pst`.
    pub container_id: String,
    pub destination: PathBuf,
}

/// A container whose conversion succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedContainer {
    pub container_id: String,
    pub output_dir: PathBuf,
}

/// Outcome of one task.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub task: ConversionTask,
    pub success: bool,
    pub elapsed: Duration,
}

/// Outcomes of a whole conversion run, in discovery order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    pub outcomes: Vec<ConversionOutcome>,
    pub elapsed: Duration,
}

impl ConversionReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Successful containers only, in discovery order.
    pub fn converted(&self) -> Vec<ConvertedContainer> {
        self.outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| ConvertedContainer {
                container_id: o.task.container_id.clone(),
                output_dir: o.task.destination.clone(),
            })
            .collect()
    }
}

/// Recursively find `.pst`/`.ost` files under `source_dir`, sorted by path.
pub fn discover_containers(source_dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
    if !source_dir.is_dir() {
        return Err(ConvertError::SourceNotFound(source_dir.to_path_buf()));
    }

    let mut containers = Vec::new();
    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry.map_err(|e| ConvertError::Walk {
            path: source_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_container(entry.path()) {
            containers.push(entry.into_path());
        }
    }
    containers.sort();
    debug!(count = containers.len(), dir = %source_dir.display(), "Containers discovered");
    Ok(containers)
}

fn is_container(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            CONTAINER_EXTENSIONS
                .iter()
                .any(|c| ext.eq_ignore_ascii_case(c))
        })
}

/// Assign each container an output subdirectory of `mbox_dir` named after
/// its file stem. Repeated stems get `_2`, `_3`, ... in discovery order.
pub fn plan_tasks(containers: &[PathBuf], mbox_dir: &Path) -> Vec<ConversionTask> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    containers
        .iter()
        .map(|source| {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "container".to_string());
            let uses = seen.entry(stem.to_lowercase()).or_insert(0);
            *uses += 1;
            let dir_name = if *uses == 1 {
                stem
            } else {
                format!("{stem}_{uses}")
            };
            ConversionTask {
                source: source.clone(),
                container_id: source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                destination: mbox_dir.join(dir_name),
            }
        })
        .collect()
}

/// Run every task on a pool of `workers` threads (0 means one per CPU).
///
/// A task whose destination cannot be created counts as failed. `on_done`
/// is called from worker threads as each task finishes.
pub fn convert_all(
    tasks: Vec<ConversionTask>,
    converter: &dyn Converter,
    workers: usize,
    on_done: &(dyn Fn(&ConversionOutcome) + Sync),
) -> Result<ConversionReport, ConvertError> {
    let workers = if workers == 0 { num_cpus::get() } else { workers };
    info!(containers = tasks.len(), workers, "Starting conversion");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ConvertError::Pool(e.to_string()))?;

    let started = Instant::now();
    let outcomes: Vec<ConversionOutcome> = pool.install(|| {
        tasks
            .into_par_iter()
            .map(|task| {
                let outcome = run_task(task, converter);
                on_done(&outcome);
                outcome
            })
            .collect()
    });

    let report = ConversionReport {
        outcomes,
        elapsed: started.elapsed(),
    };
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Conversion finished"
    );
    Ok(report)
}

fn run_task(task: ConversionTask, converter: &dyn Converter) -> ConversionOutcome {
    let started = Instant::now();
    let success = match std::fs::create_dir_all(&task.destination) {
        Ok(()) => converter.convert(&task.source, &task.destination),
        Err(e) => {
            warn!(dir = %task.destination.display(), error = %e, "Cannot create conversion directory");
            false
        }
    };
    if success {
        info!(container = %task.container_id, "Converted");
    } else {
        warn!(container = %task.container_id, source = %task.source.display(), "Conversion failed");
    }
    ConversionOutcome {
        task,
        success,
        elapsed: started.elapsed(),
    }
}
