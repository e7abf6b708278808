mod snapshot;

use clap::{Args, Parser, Subcommand, ValueEnum};
use reddwarf_scheduler::parallel::DEFAULT_PARALLELISM;
use reddwarf_scheduler::{
    EquivalenceCache, GenericSchedulerConfig, NodeCache, Policy, ScheduleOutcome, Scheduler,
    SchedulerConfig, SchedulingQueue,
};
use snapshot::ClusterSnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "reddwarf-sched", about = "Reddwarf pod scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule the pending pods of a snapshot once and print the outcomes
    Schedule {
        #[command(flatten)]
        algorithm: AlgorithmArgs,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Run the scheduling loop over a snapshot until interrupted
    Run {
        #[command(flatten)]
        algorithm: AlgorithmArgs,
        /// Seconds between scheduling cycles
        #[arg(long, default_value_t = 1)]
        interval_secs: u64,
        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<usize>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Args)]
struct AlgorithmArgs {
    /// Cluster snapshot with nodes, pods and disruption budgets (YAML or JSON)
    #[arg(long)]
    snapshot: PathBuf,
    /// Scheduling policy file; the default algorithms are used without one
    #[arg(long)]
    policy: Option<PathBuf>,
    /// Report every failed predicate instead of stopping at the first
    #[arg(long)]
    always_check_all_predicates: bool,
    /// Evaluate every predicate without reusing results across pods
    #[arg(long)]
    disable_equivalence_cache: bool,
    /// Number of workers for per-node work
    #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
    parallelism: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Schedule { algorithm, output } => run_once(&algorithm, output).await,
        Commands::Run {
            algorithm,
            interval_secs,
            max_cycles,
            output,
        } => {
            run_loop(
                &algorithm,
                Duration::from_secs(interval_secs),
                max_cycles,
                output,
            )
            .await
        }
    }
}

/// Build the scheduler for a snapshot
fn create_scheduler(args: &AlgorithmArgs, interval: Duration) -> miette::Result<Scheduler> {
    let snapshot = ClusterSnapshot::load(&args.snapshot)?;
    let policy = match &args.policy {
        Some(path) => Policy::from_file(path)?,
        None => Policy::default(),
    };

    let queue = Arc::new(SchedulingQueue::new());
    let mut cache = NodeCache::new();
    let equivalence_cache = if args.disable_equivalence_cache {
        None
    } else {
        let ecache = Arc::new(EquivalenceCache::new());
        cache = cache.with_equivalence_cache(ecache.clone());
        Some(ecache)
    };
    let cache = Arc::new(cache);

    let pending = snapshot.populate(&cache, &queue)?;
    info!(
        "{} node(s) in cache, {} pod(s) pending",
        cache.len(),
        pending
    );

    let mut algorithm = policy
        .build(cache.clone())?
        .with_config(GenericSchedulerConfig {
            always_check_all_predicates: policy.always_check_all_predicates
                || args.always_check_all_predicates,
            parallelism: args.parallelism.max(1),
        })
        .with_nominated_pods(queue.clone())
        .with_pdb_lister(Arc::new(snapshot.pod_disruption_budgets))
        .with_pvc_lister(Arc::new(snapshot.persistent_volume_claims));
    if let Some(ecache) = equivalence_cache {
        algorithm = algorithm.with_equivalence_cache(ecache);
    }

    Ok(Scheduler::new(
        algorithm,
        cache,
        queue,
        SchedulerConfig {
            schedule_interval: interval,
        },
    ))
}

/// Run one scheduling cycle on a blocking thread
async fn cycle(scheduler: &Scheduler) -> miette::Result<Vec<ScheduleOutcome>> {
    let scheduler = scheduler.clone();
    let outcomes = tokio::task::spawn_blocking(move || scheduler.schedule_cycle())
        .await
        .map_err(|e| miette::miette!("Scheduling cycle panicked: {}", e))??;
    Ok(outcomes)
}

fn print_outcomes(outcomes: &[ScheduleOutcome], output: OutputFormat) -> miette::Result<()> {
    match output {
        OutputFormat::Text => {
            for outcome in outcomes {
                println!("{}", outcome);
            }
        }
        OutputFormat::Json => println!("{}", reddwarf_core::to_json_pretty(&outcomes)?),
    }
    Ok(())
}

/// Schedule every pending pod once
async fn run_once(args: &AlgorithmArgs, output: OutputFormat) -> miette::Result<()> {
    let scheduler = create_scheduler(args, SchedulerConfig::default().schedule_interval)?;
    let outcomes = cycle(&scheduler).await?;
    print_outcomes(&outcomes, output)
}

/// Repeat scheduling cycles until ctrl-c or the cycle limit
async fn run_loop(
    args: &AlgorithmArgs,
    interval: Duration,
    max_cycles: Option<usize>,
    output: OutputFormat,
) -> miette::Result<()> {
    let scheduler = create_scheduler(args, interval)?;
    let token = CancellationToken::new();

    let signal_token = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("Shutting down gracefully...");
        signal_token.cancel();
    });

    let Some(max_cycles) = max_cycles else {
        scheduler.run(token).await?;
        return Ok(());
    };

    for n in 1..=max_cycles {
        let outcomes = cycle(&scheduler).await?;
        print_outcomes(&outcomes, output)?;
        info!("Finished cycle {}/{}", n, max_cycles);

        if n == max_cycles {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(())
}
