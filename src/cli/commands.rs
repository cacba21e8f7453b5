//! CLI command definitions for workqueue.
//!
//! Every command talks to the queue stored in Redis under `--namespace`.
//! Settings come from `--settings <file>` when given, otherwise from the
//! `WORKQUEUE_*` environment variables.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{Settings, WorkQueueConfig};
use crate::metrics::{export_metrics, init_metrics};
use crate::queue::{register_realtime_handler, Announcer, Task, TaskRegistry, WorkQueue};
use crate::realtime::{RealtimePublisher, RedisPublisher};
use crate::store::RedisStore;

/// Task type whose handler logs the task's fields.
pub const LOG_TASK: &str = "Log";

/// Pause between engine runs while `run` still has time left.
const IDLE_PAUSE: Duration = Duration::from_millis(250);

/// Longest `run` waits for in-flight handlers once its time is up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Distributed at-least-once work queue.
#[derive(Parser, Debug)]
#[command(name = "workqueue")]
#[command(about = "Distributed at-least-once work queue over Redis")]
#[command(version)]
#[command(
    long_about = "workqueue runs background tasks from a Redis-backed queue shared by any number of processes.\n\nExample usage:\n  workqueue enqueue --type Log --payload '{\"hello\":\"world\"}'\n  workqueue run --seconds 10"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Redis connection URL.
    #[arg(
        long,
        env = "REDIS_URL",
        default_value = "redis://127.0.0.1:6379",
        global = true
    )]
    pub redis_url: String,

    /// Key namespace of the queue.
    #[arg(long, default_value = "workqueue", global = true)]
    pub namespace: String,

    /// YAML settings file (debug, poll_interval_ms, batched_realtime).
    #[arg(long, env = "WORKQUEUE_SETTINGS", global = true)]
    pub settings: Option<String>,
}

impl Cli {
    /// Loads settings from the settings file, or from the environment.
    pub fn load_settings(&self) -> anyhow::Result<Settings> {
        let settings = match &self.settings {
            Some(path) => Settings::from_yaml_file(path)?,
            None => Settings::from_env()?,
        };
        Ok(settings)
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn log_filter(&self, settings: &Settings) -> String {
        match &self.log_level {
            Some(level) => level.clone(),
            None if settings.debug => "debug".to_string(),
            None => "info".to_string(),
        }
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Process tasks for a fixed amount of time.
    Run(RunArgs),

    /// Add a task to the queue.
    Enqueue(EnqueueArgs),

    /// Send a realtime message, batched when settings enable it.
    Announce(AnnounceArgs),

    /// Show pending and claimed counts.
    Stats(StatsArgs),
}

/// Arguments for `workqueue run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Seconds to keep claiming tasks.
    #[arg(short, long, default_value = "10")]
    pub seconds: u64,

    /// Print Prometheus metrics when done.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `workqueue enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Task type.
    #[arg(short = 't', long = "type")]
    pub task_type: String,

    /// JSON object of task fields.
    #[arg(short, long)]
    pub payload: Option<String>,

    /// Attempts before the task is dropped (default 5).
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// Arguments for `workqueue announce`.
#[derive(Parser, Debug)]
pub struct AnnounceArgs {
    /// JSON message to broadcast.
    #[arg(short, long)]
    pub message: String,
}

/// Arguments for `workqueue stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    let cli = parse_cli();
    let settings = cli.load_settings()?;
    run_with_cli(cli, settings).await
}

/// Run the CLI with the parsed arguments and loaded settings.
pub async fn run_with_cli(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let store = RedisStore::connect(&cli.redis_url).await?;
    let publisher: Arc<dyn RealtimePublisher> =
        Arc::new(RedisPublisher::new(store.connection()));
    let config = WorkQueueConfig::new().with_namespace(cli.namespace.clone());

    let registry = Arc::new(TaskRegistry::new());
    register_handlers(&registry, Arc::clone(&publisher), &config);
    let queue = WorkQueue::new(Arc::new(store), registry, config, settings);
    let announcer = Announcer::new(queue.clone(), publisher);

    match cli.command {
        Commands::Run(args) => run_run_command(args, &queue, &announcer).await,
        Commands::Enqueue(args) => run_enqueue_command(args, &queue).await,
        Commands::Announce(args) => run_announce_command(args, &announcer).await,
        Commands::Stats(args) => run_stats_command(args, &queue).await,
    }
}

/// Registers the handlers every `workqueue` process provides.
pub fn register_handlers(
    registry: &TaskRegistry,
    publisher: Arc<dyn RealtimePublisher>,
    config: &WorkQueueConfig,
) {
    register_realtime_handler(registry, publisher, config.announce.channel.clone());
    registry.register_fn(LOG_TASK, |task| async move {
        let fields = Value::Object(task.fields().clone());
        info!(
            fields = %fields,
            attempts = task.attempts(),
            "Log task"
        );
        Ok(())
    });
}

/// Parses `--payload` into task fields. Absent means no fields.
fn parse_payload(payload: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = payload else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(fields) => Ok(fields),
        other => anyhow::bail!("payload must be a JSON object, got {other}"),
    }
}

async fn run_run_command(
    args: RunArgs,
    queue: &WorkQueue,
    announcer: &Announcer,
) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let deadline = Utc::now() + chrono::Duration::seconds(args.seconds as i64);
    info!(
        instance = %queue.id(),
        seconds = args.seconds,
        handlers = ?queue.registry().task_types(),
        "Starting work queue"
    );

    let mut dispatched = 0;
    while Utc::now() < deadline {
        let summary = queue.run_until(deadline).await?;
        dispatched += summary.total_dispatched();
        if Utc::now() < deadline {
            tokio::time::sleep(IDLE_PAUSE).await;
        }
    }

    // Deliver anything still waiting in the announce batch.
    if announcer.is_batched() && announcer.flush_now().await? {
        let drain = Utc::now() + chrono::Duration::seconds(1);
        dispatched += queue.run_until(drain).await?.total_dispatched();
    }

    if let Err(e) = queue.wait_for_idle(DRAIN_TIMEOUT).await {
        warn!(error = %e, in_flight = queue.in_flight(), "Handlers still running at exit");
    }

    let stats = queue.stats().await?;
    info!(
        dispatched = dispatched,
        completed = stats.completed,
        failed = stats.failed,
        pending = stats.pending,
        claimed = stats.claimed,
        "Work queue stopped"
    );

    if args.print_metrics {
        print!("{}", export_metrics());
    }
    Ok(())
}

async fn run_enqueue_command(args: EnqueueArgs, queue: &WorkQueue) -> anyhow::Result<()> {
    let fields = parse_payload(args.payload.as_deref())?;
    let mut task = Task::new(args.task_type).with_fields(fields);
    if let Some(max_attempts) = args.max_attempts {
        task = task.with_max_attempts(max_attempts);
    }

    queue.enqueue(task.clone()).await?;
    println!("{}", task.key());
    Ok(())
}

async fn run_announce_command(args: AnnounceArgs, announcer: &Announcer) -> anyhow::Result<()> {
    let message: Value = serde_json::from_str(&args.message)?;
    announcer.send_realtime(message).await?;

    // The background flush does not outlive the process.
    if announcer.is_batched() {
        announcer.flush().await?;
    }
    Ok(())
}

async fn run_stats_command(args: StatsArgs, queue: &WorkQueue) -> anyhow::Result<()> {
    let stats = queue.stats().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Namespace: {}", queue.config().namespace);
        println!("Pending:   {}", stats.pending);
        println!("Claimed:   {}", stats.claimed);
    }
    Ok(())
}
