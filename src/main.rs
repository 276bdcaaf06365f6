mod checkpoint;
mod config;
mod export;
mod fetch;
mod input;
mod job;
mod pipeline;
mod processor;
mod record;
mod resolver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use crate::checkpoint::{CheckpointStore, FsCheckpointStore, SqliteCheckpointStore};
use crate::config::{PartPrecedence, StoreKind, TieBreak};
use crate::fetch::{HttpFetcher, RetryingFetcher};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::record::Status;
use crate::resolver::{Resolver, ResolverPolicy};

#[derive(Parser)]
#[command(
    name = "unspsc_scraper",
    about = "Part number and UNSPSC extraction from product page URLs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Checkpoint backend
    #[arg(long, value_enum, default_value_t = StoreKind::Files)]
    store: StoreKind,
    /// Directory holding checkpoint files (or the sqlite database)
    #[arg(long, default_value = config::DEFAULT_CHECKPOINT_DIR)]
    checkpoint_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an input file of product URLs, checkpointing each batch
    Run {
        /// Input file: .xlsx, .csv, or one URL per line
        input: PathBuf,
        /// Rows per checkpoint batch
        #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Concurrent fetches within a batch (1 = strictly sequential)
        #[arg(short, long, default_value_t = config::DEFAULT_WORKERS)]
        workers: usize,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
        /// Extra attempts for transient fetch failures
        #[arg(long, default_value_t = fetch::MAX_RETRIES)]
        retries: u32,
        /// Company name stamped on every record
        #[arg(long, default_value = config::DEFAULT_COMPANY)]
        company: String,
        /// Which UNSPSC row wins when the latest version appears twice
        #[arg(long, value_enum, default_value_t = TieBreak::Last)]
        tie_break: TieBreak,
        /// Part number source when the URL and the page disagree
        #[arg(long, value_enum, default_value_t = PartPrecedence::Url)]
        part_source: PartPrecedence,
        /// Max batches to process this run (default: all incomplete)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Output CSV path (default: timestamped name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Drop the Row, Status, and Error columns from the output
        #[arg(long = "final")]
        final_format: bool,
        /// Skip writing the output CSV
        #[arg(long)]
        no_export: bool,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Show checkpoint progress for an input file
    Status {
        /// Input file the job was started from
        input: PathBuf,
        /// Batch size the job was run with
        #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Write the merged records of completed batches to CSV
    Export {
        /// Input file the job was started from
        input: PathBuf,
        /// Output CSV path (default: timestamped name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Drop the Row, Status, and Error columns from the output
        #[arg(long = "final")]
        final_format: bool,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Delete all checkpoints for an input file
    Clear {
        /// Input file the job was started from
        input: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
}

fn open_store(args: &StoreArgs) -> anyhow::Result<Box<dyn CheckpointStore>> {
    match args.store {
        StoreKind::Files => Ok(Box::new(FsCheckpointStore::new(&args.checkpoint_dir)?)),
        StoreKind::Sqlite => {
            std::fs::create_dir_all(&args.checkpoint_dir)?;
            Ok(Box::new(SqliteCheckpointStore::open(
                args.checkpoint_dir.join("checkpoints.sqlite"),
            )?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            input,
            batch_size,
            workers,
            timeout,
            retries,
            company,
            tie_break,
            part_source,
            limit,
            output,
            final_format,
            no_export,
            store,
        } => {
            let job = input::load_job(&input)?;
            if job.rows.is_empty() {
                println!("No rows found in {}.", input.display());
                return Ok(());
            }

            let store = open_store(&store)?;
            let fetcher = Arc::new(RetryingFetcher::new(
                HttpFetcher::new(timeout)?,
                retries,
                fetch::BASE_BACKOFF_MS,
            ));
            let resolver = Arc::new(Resolver::new(ResolverPolicy {
                tie_break,
                part_precedence: part_source,
                company: company.clone(),
            }));
            let pipeline = Pipeline::new(
                fetcher,
                resolver,
                store,
                PipelineConfig {
                    batch_size,
                    workers: workers.max(1),
                    company,
                },
            );

            println!(
                "Processing {} rows in batches of {} (job {})...",
                job.rows.len(),
                batch_size,
                job.id
            );
            let (summary, records) = pipeline.run(&job, limit).await?;
            summary.print();

            if !no_export {
                let path = output.unwrap_or_else(|| export::default_path(final_format));
                export::write_csv(&path, &records, final_format)?;
                println!("Results written to {}", path.display());
            }
            Ok(())
        }
        Commands::Status {
            input,
            batch_size,
            store,
        } => {
            let job = input::load_job(&input)?;
            let store = open_store(&store)?;
            let completed = store.list_completed(&job.id)?;
            let total = job.batch_count(batch_size.max(1));
            let state = job::derive_state(completed.len(), total);
            let records = store.read_all(&job.id)?;
            let success = records
                .iter()
                .filter(|r| r.status == Status::Success)
                .count();

            println!("Job:      {}", job.id);
            println!("Rows:     {}", job.rows.len());
            println!("Batches:  {}/{} complete ({})", completed.len(), total, state);
            println!("Records:  {}", records.len());
            println!("Success:  {}", success);
            println!("Failures: {}", records.len() - success);
            if let Some(next) = (0..total).find(|i| !completed.contains(i)) {
                println!("Next:     batch {}", next);
            }
            Ok(())
        }
        Commands::Export {
            input,
            output,
            final_format,
            store,
        } => {
            let job = input::load_job(&input)?;
            let store = open_store(&store)?;
            let records = store.read_all(&job.id)?;
            if records.is_empty() {
                println!("No completed batches for this input. Run 'run' first.");
                return Ok(());
            }
            let path = output.unwrap_or_else(|| export::default_path(final_format));
            export::write_csv(&path, &records, final_format)?;
            println!("Exported {} records to {}", records.len(), path.display());
            Ok(())
        }
        Commands::Clear { input, store } => {
            let job = input::load_job(&input)?;
            let store = open_store(&store)?;
            store.clear(&job.id)?;
            println!("Cleared checkpoints for job {}.", job.id);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
