#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use verdict_harness::cache::{ResponseCache, SqliteResponseCache};
use verdict_harness::gateway::{ProviderGateway, TracingUsageSink};
use verdict_harness::oracle::GatewayOracle;
use verdict_harness::tournament::{
    run_batch, run_tournament, BatchRequest, FinalRanking, JsonlTraceSink, RunOptions,
    TournamentRequest, TraceSink,
};

#[derive(Parser)]
#[command(name = "verdict", version, about = "Tournament ranking with an LLM judge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the ranking commands.
#[derive(clap::Args)]
struct JudgeArgs {
    /// Request JSON
    #[arg(long)]
    request: PathBuf,
    /// Output JSON
    #[arg(long)]
    out: PathBuf,
    /// Judge model for every chapter; defaults to the request's configured model
    #[arg(long)]
    model: Option<String>,
    /// Cache judge replies in this SQLite file
    #[arg(long)]
    cache: Option<PathBuf>,
    /// Hold an exclusive lock on the cache for the whole run
    #[arg(long)]
    lock_cache: bool,
    /// Serve replies from the cache only; misses fail the call
    #[arg(long)]
    cache_only: bool,
    /// JSONL trace of every judge call
    #[arg(long)]
    trace: Option<PathBuf>,
    #[arg(long)]
    rng_seed: Option<u64>,
    /// Whole-run deadline in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank one chapter's candidates
    Rank(JudgeArgs),
    /// Rank several chapters from a batch request
    Batch(JudgeArgs),
    /// Print the position-bias summary of a stored ranking
    Bias {
        #[arg(long)]
        ranking: PathBuf,
    },
    /// Export the SQLite reply cache to JSONL
    CacheExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune the SQLite reply cache (by age and/or size)
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rank(args) => {
            let req: TournamentRequest = read_json(&args.request)?;
            let model = args
                .model
                .clone()
                .unwrap_or_else(|| req.config.judge_model.clone());
            let session = JudgeSession::open(&args, model)?;
            let trace_ref = session.trace_sink.as_ref().map(|s| s as &dyn TraceSink);

            let result = run_tournament(&session.oracle, &req, &args.run_options(), trace_ref, None)
                .await;
            session.finish()?;
            let ranking = result?;
            write_json(&args.out, &ranking)?;
            print_summary(&ranking);
        }
        Commands::Batch(args) => {
            let batch: BatchRequest = read_json(&args.request)?;
            let model = match &args.model {
                Some(model) => model.clone(),
                None => batch.judge_model()?.to_string(),
            };
            let session = JudgeSession::open(&args, model)?;
            let trace_ref = session.trace_sink.as_ref().map(|s| s as &dyn TraceSink);

            let outcomes = run_batch(&session.oracle, &batch, &args.run_options(), trace_ref).await;
            session.finish()?;
            let reports: Vec<_> = outcomes.iter().map(|o| o.report()).collect();
            write_json(&args.out, &reports)?;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(ranking) => print_summary(ranking),
                    Err(err) => println!("{}: failed: {err}", outcome.chapter_id),
                }
            }
        }
        Commands::Bias { ranking } => {
            let ranking: FinalRanking = read_json(&ranking)?;
            println!("{}", ranking.bias.summary());
            for (a, b) in &ranking.bias.contradicting_pairs {
                println!("  contradiction: {a} vs {b}");
            }
        }
        Commands::CacheExport { db, out } => {
            let path = db.unwrap_or_else(SqliteResponseCache::default_path);
            let cache = SqliteResponseCache::new(path)?;
            let rows = cache.export_jsonl(out).await?;
            println!("exported {rows} rows");
        }
        Commands::CachePrune {
            db,
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            if matches!(max_rows, Some(0)) {
                return Err("--max-rows must be >= 1".into());
            }
            let path = db.unwrap_or_else(SqliteResponseCache::default_path);
            let cache = SqliteResponseCache::new(path)?;
            let _lock = cache.lock_exclusive()?;
            let stats = cache.prune(max_age_days, max_rows).await?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
    }

    Ok(())
}

impl JudgeArgs {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            rng_seed: self.rng_seed,
            deadline: self.deadline_secs.map(std::time::Duration::from_secs),
        }
    }
}

/// Oracle, cache lock and trace writer for one ranking command.
struct JudgeSession {
    oracle: GatewayOracle<ProviderGateway<TracingUsageSink>>,
    usage: Arc<TracingUsageSink>,
    trace_sink: Option<JsonlTraceSink>,
    trace_worker: Option<verdict_harness::tournament::TraceWorker>,
    _lock: Option<verdict_harness::cache::CacheLock>,
}

impl JudgeSession {
    fn open(args: &JudgeArgs, model: String) -> Result<Self, Box<dyn std::error::Error>> {
        let usage = Arc::new(TracingUsageSink::default());
        let gateway = ProviderGateway::from_env(usage.clone())?;
        let mut oracle =
            GatewayOracle::new(Arc::new(gateway), model).cache_only(args.cache_only);

        let mut lock = None;
        if args.cache.is_some() || args.cache_only {
            let path = args
                .cache
                .clone()
                .unwrap_or_else(SqliteResponseCache::default_path);
            let cache = SqliteResponseCache::new(path)?;
            if args.lock_cache {
                lock = Some(cache.lock_exclusive()?);
            }
            oracle = oracle.with_cache(Arc::new(cache) as Arc<dyn ResponseCache>);
        }

        let (trace_sink, trace_worker) = match &args.trace {
            Some(path) => {
                let (sink, worker) = JsonlTraceSink::new(path)?;
                (Some(sink), Some(worker))
            }
            None => (None, None),
        };

        Ok(Self {
            oracle,
            usage,
            trace_sink,
            trace_worker,
            _lock: lock,
        })
    }

    /// Flushes the trace and reports spend.
    fn finish(self) -> Result<(), Box<dyn std::error::Error>> {
        drop(self.trace_sink);
        if let Some(worker) = self.trace_worker {
            worker.join()?;
        }
        eprintln!(
            "provider calls: {} ({} errors), cost ${:.4}",
            self.usage.calls(),
            self.usage.errors(),
            self.usage.total_cost_usd()
        );
        Ok(())
    }
}

fn print_summary(ranking: &FinalRanking) {
    println!("chapter {}:", ranking.chapter_id);
    for entry in &ranking.entries {
        match entry.elo_rating {
            Some(rating) => println!(
                "  #{} {} (elo {:.1}, screening {:.2})",
                entry.rank, entry.display_name, rating, entry.screening_mean_rank
            ),
            None => println!(
                "  #{} {} (eliminated, screening {:.2})",
                entry.rank, entry.display_name, entry.screening_mean_rank
            ),
        }
    }
    println!("  {}", ranking.bias.summary());
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
