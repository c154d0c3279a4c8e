//! CLI entry point for `pstingest`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use pstingest::config::Config;
use pstingest::convert::{self, ConversionOutcome, ReadpstConverter};
use pstingest::ingest::{self, Coordinator, IngestReport, PartitionMode};
use pstingest::pipeline::{self, RunOptions};
use pstingest::store::{self, RecordFilter, RecordStore};

#[derive(Parser)]
#[command(name = "pstingest", version, about = "Convert PST/OST archives into SQLite record stores")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Settings shared by `run`, `convert` and `ingest`; each overrides the config file.
#[derive(clap::Args)]
struct PipelineArgs {
    /// Intermediate directory for converted MBOX files
    #[arg(long, value_name = "DIR")]
    mbox_dir: Option<PathBuf>,

    /// Output directory (or store file with --shared)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Write every container into one store
    #[arg(long)]
    shared: bool,

    /// Refuse executable attachments
    #[arg(long)]
    screen_attachments: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every container under SOURCE and ingest the result
    Run {
        /// Directory searched for .pst/.ost files
        #[arg(value_name = "SOURCE")]
        source: Option<PathBuf>,
        /// Conversion workers (0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Keep the intermediate MBOX directory
        #[arg(long)]
        keep_mbox: bool,
        /// Converter executable
        #[arg(long, value_name = "PROGRAM")]
        converter: Option<PathBuf>,
        #[command(flatten)]
        args: PipelineArgs,
    },
    /// Convert containers to MBOX without ingesting
    Convert {
        #[arg(value_name = "SOURCE")]
        source: Option<PathBuf>,
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long, value_name = "PROGRAM")]
        converter: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        mbox_dir: Option<PathBuf>,
    },
    /// Ingest an existing tree of MBOX files
    Ingest {
        /// Root of the MBOX tree; subdirectories are treated as containers
        #[arg(value_name = "MBOX_DIR")]
        root: PathBuf,
        #[command(flatten)]
        args: PipelineArgs,
    },
    /// Show statistics for a store
    Stats {
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List stored records
    Query {
        db: PathBuf,
        /// Sender address contains
        #[arg(long)]
        sender: Option<String>,
        /// Recipient address contains
        #[arg(long)]
        recipient: Option<String>,
        /// Exact source container, e.g. archive.pst
        #[arg(long)]
        source: Option<String>,
        /// Earliest date (inclusive, compared as text)
        #[arg(long, value_name = "DATE")]
        since: Option<String>,
        /// Latest date (inclusive, compared as text)
        #[arg(long, value_name = "DATE")]
        until: Option<String>,
        /// Only rows with an attachment
        #[arg(long, conflicts_with = "without_attachments")]
        with_attachments: bool,
        /// Only rows without an attachment
        #[arg(long)]
        without_attachments: bool,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        json: bool,
    },
    /// Print the number of stored rows
    Count { db: PathBuf },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = pstingest::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    match cli.command {
        Commands::Run {
            source,
            workers,
            keep_mbox,
            converter,
            args,
        } => {
            apply_conversion_overrides(&mut config, source, workers, converter, args.mbox_dir.clone());
            config.pipeline.keep_mbox |= keep_mbox;
            apply_pipeline_overrides(&mut config, &args);
            cmd_run(&config, args.json)
        }
        Commands::Convert {
            source,
            workers,
            converter,
            mbox_dir,
        } => {
            apply_conversion_overrides(&mut config, source, workers, converter, mbox_dir);
            cmd_convert(&config)
        }
        Commands::Ingest { root, args } => {
            apply_pipeline_overrides(&mut config, &args);
            cmd_ingest(&config, &root, args.json)
        }
        Commands::Stats { db, json } => cmd_stats(&db, json),
        Commands::Query {
            db,
            sender,
            recipient,
            source,
            since,
            until,
            with_attachments,
            without_attachments,
            limit,
            offset,
            json,
        } => {
            let mut filter = RecordFilter {
                sender,
                recipient,
                source_container: source,
                ..RecordFilter::default()
            }
            .date_range(since, until);
            if with_attachments {
                filter = filter.has_attachment(true);
            } else if without_attachments {
                filter = filter.has_attachment(false);
            }
            cmd_query(&db, &filter, limit, offset, json)
        }
        Commands::Count { db } => {
            println!("{}", store::count(&db));
            Ok(())
        }
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

fn apply_conversion_overrides(
    config: &mut Config,
    source: Option<PathBuf>,
    workers: Option<usize>,
    converter: Option<PathBuf>,
    mbox_dir: Option<PathBuf>,
) {
    if let Some(source) = source {
        config.pipeline.source_dir = source;
    }
    if let Some(workers) = workers {
        config.pipeline.workers = workers;
    }
    if let Some(converter) = converter {
        config.pipeline.converter = converter;
    }
    if let Some(dir) = mbox_dir {
        config.pipeline.mbox_dir = dir;
    }
}

fn apply_pipeline_overrides(config: &mut Config, args: &PipelineArgs) {
    if let Some(dir) = &args.mbox_dir {
        config.pipeline.mbox_dir = dir.clone();
    }
    if let Some(output) = &args.output {
        config.pipeline.output = output.clone();
    }
    config.pipeline.shared_store |= args.shared;
    config.extract.screen_attachments |= args.screen_attachments;
}

fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = pstingest::config::log_file_path(config);
    let log_target = log_path
        .parent()
        .zip(log_path.file_name())
        .filter(|(dir, _)| config.general.log_to_file && std::fs::create_dir_all(dir).is_ok());
    if let Some((log_dir, log_name)) = log_target {
        let file_appender = tracing_appender::rolling::never(log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "pstingest", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

fn conversion_progress() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} Converted {pos} container(s) {msg}")
            .expect("valid template"),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

fn on_converted(pb: &ProgressBar) -> impl Fn(&ConversionOutcome) + Sync + '_ {
    move |outcome| {
        pb.inc(1);
        pb.set_message(outcome.task.container_id.clone());
    }
}

/// Convert and ingest, then print a summary.
fn cmd_run(config: &Config, json: bool) -> anyhow::Result<()> {
    let options = RunOptions {
        source_dir: config.pipeline.source_dir.clone(),
        mbox_dir: config.pipeline.mbox_dir.clone(),
        output: config.pipeline.output.clone(),
        workers: config.pipeline.workers,
        keep_mbox: config.pipeline.keep_mbox,
        mode: config.partition_mode(),
        ingest: config.ingest_options(),
    };
    let converter = ReadpstConverter::new(&config.pipeline.converter);

    let start = Instant::now();
    let pb = conversion_progress();
    let report = pipeline::run(&options, &converter, &on_converted(&pb))?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {:<22} {} ok, {} failed",
        "Containers",
        report.conversion.succeeded(),
        report.conversion.failed()
    );
    print_ingest_table(&report.ingest);
    println!("  {:<22} {:.2?}", "Elapsed", start.elapsed());
    println!();
    Ok(())
}

/// Convert only; the MBOX tree is left in place.
fn cmd_convert(config: &Config) -> anyhow::Result<()> {
    let containers = convert::discover_containers(&config.pipeline.source_dir)?;
    std::fs::create_dir_all(&config.pipeline.mbox_dir)?;
    let tasks = convert::plan_tasks(&containers, &config.pipeline.mbox_dir);
    let converter = ReadpstConverter::new(&config.pipeline.converter);

    let pb = conversion_progress();
    let report = convert::convert_all(tasks, &converter, config.pipeline.workers, &on_converted(&pb))?;
    pb.finish_and_clear();

    for outcome in &report.outcomes {
        println!(
            "  {:<6} {:<30} {}",
            if outcome.success { "ok" } else { "FAILED" },
            outcome.task.container_id,
            outcome.task.destination.display()
        );
    }
    println!();
    println!(
        "  {} converted, {} failed in {:.2?}",
        report.succeeded(),
        report.failed(),
        report.elapsed
    );
    Ok(())
}

/// Ingest an MBOX tree produced earlier (e.g. by `convert`).
fn cmd_ingest(config: &Config, root: &Path, json: bool) -> anyhow::Result<()> {
    if !root.is_dir() {
        anyhow::bail!("MBOX directory not found: {}", root.display());
    }
    let coordinator = Coordinator::new(config.ingest_options());
    let output = &config.pipeline.output;

    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Ingesting {}", root.display()));
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    let report = match config.partition_mode() {
        PartitionMode::PerContainer => coordinator.ingest_tree(root, output)?,
        PartitionMode::Shared => {
            coordinator.ingest_shared(&ingest::shared_store_path(output), root, None)
        }
    };
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        print_ingest_table(&report);
        println!();
    }
    Ok(())
}

fn print_ingest_table(report: &IngestReport) {
    use humansize::{format_size, BINARY};

    for partition in &report.partitions {
        println!("  {:<22} {}", "Store", partition.store_path.display());
        if let Some(label) = &partition.label {
            println!("  {:<22} {}", "Container", label);
        }
        if let Some(err) = &partition.error {
            println!("  {:<22} {}", "Error", err);
            continue;
        }
        let extraction = partition.extraction();
        println!(
            "  {:<22} {} ok, {} failed",
            "Mailbox files",
            partition.mailboxes_ok(),
            partition.mailboxes_failed()
        );
        println!(
            "  {:<22} {} stored, {} rejected",
            "Records",
            partition.records_stored(),
            partition.records_rejected()
        );
        println!(
            "  {:<22} {} seen, {} skipped, {} flagged sensitive",
            "Messages",
            extraction.messages_seen,
            extraction.messages_skipped,
            extraction.sensitive_messages
        );
        println!(
            "  {:<22} {} saved ({}), {} failed, {} blocked",
            "Attachments",
            extraction.attachments_saved,
            format_size(extraction.bytes_saved, BINARY),
            extraction.attachments_failed,
            extraction.attachments_blocked
        );
        println!();
    }
}

/// Show store statistics.
fn cmd_stats(db: &Path, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    if !db.is_file() {
        anyhow::bail!("Store not found: {}", db.display());
    }
    let store = RecordStore::open(db)?;
    let stats = store.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let file_size = std::fs::metadata(db)?.len();
    println!();
    println!("  {:<20} {}", "Store", db.display());
    println!("  {:<20} {}", "File size", format_size(file_size, BINARY));
    println!("  {:<20} {}", "Records", stats.total_records);
    println!(
        "  {:<20} {} ({:.1}%)",
        "With attachments",
        stats.with_attachments,
        if stats.total_records == 0 {
            0.0
        } else {
            stats.with_attachments as f64 / stats.total_records as f64 * 100.0
        }
    );
    println!("  {:<20} {}", "Distinct senders", stats.distinct_senders);
    println!("  {:<20} {}", "Distinct recipients", stats.distinct_recipients);
    if !stats.source_containers.is_empty() {
        println!("  {:<20} {}", "Containers", stats.source_containers.join(", "));
    }
    if !stats.attachment_types.is_empty() {
        println!();
        println!("  Attachment types:");
        for entry in stats.attachment_types.iter().take(10) {
            println!("    {:>6}  {}", entry.count, entry.content_type);
        }
    }
    println!();
    Ok(())
}

/// List records matching a filter.
fn cmd_query(
    db: &Path,
    filter: &RecordFilter,
    limit: usize,
    offset: usize,
    json: bool,
) -> anyhow::Result<()> {
    if !db.is_file() {
        anyhow::bail!("Store not found: {}", db.display());
    }
    let store = RecordStore::open(db)?;
    let rows = store.query(filter, limit, offset)?;

    if json {
        let output = serde_json::json!({
            "result_count": rows.len(),
            "results": rows,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  {} result(s)", rows.len());
    println!();
    if rows.is_empty() {
        return Ok(());
    }

    println!(
        "  {:<6} {:<25} {:<25} {:<35} {:<20}",
        "#", "Date", "From", "Subject", "Attachment"
    );
    println!("  {}", "-".repeat(114));
    for row in &rows {
        let r = &row.record;
        let date: String = r.email_date.chars().take(24).collect();
        let from: String = r.sender_email.chars().take(24).collect();
        let subject: String = r.subject.chars().take(34).collect();
        let attachment: String = r.attachment_filename.chars().take(20).collect();
        println!(
            "  {:<6} {:<25} {:<25} {:<35} {:<20}",
            row.id, date, from, subject, attachment
        );
    }
    println!();
    Ok(())
}
