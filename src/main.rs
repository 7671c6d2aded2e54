// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod abi;
mod builder;
mod config;
mod engine;
mod error;
mod executor;
mod keystore;
mod nonce;
mod notifier;
mod path;
mod rpc;
mod store;
mod watcher;

use builder::TxBuilder;
use config::{Config, ParsedConfig};
use engine::{EngineDeps, JobEngine, JobSpec};
use error::EngineError;
use keystore::{KeyHandle, Keystore, LocalKeystore};
use nonce::NonceArbiter;
use notifier::Notifier;
use rpc::RpcPool;
use store::Store;
use watcher::ReceiptWatcher;

const RECEIPT_WATCHER_WORKERS: usize = 4;

#[derive(Parser)]
#[command(name = "job-engine", version, about = "Scheduled EVM dispatch engine")]
struct Cli {
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the coordinator loop and blocks.
    Run,
    /// Submits a job spec (TOML or JSON) and exits.
    Submit { path: String },
    /// Pauses a running or queued job.
    Pause { job_id: i64 },
    /// Resumes a paused job.
    Resume { job_id: i64 },
    /// Cancels a job.
    Cancel { job_id: i64 },
    /// Prints a job's current progress.
    Status { job_id: i64 },
}

/// Registers every `SIGNER_<HANDLE>` environment variable as a signing key,
/// lower-casing `<HANDLE>` to form the `KeyHandle` job specs reference
/// (spec §6's `Keystore` trait, keyed by opaque handle rather than raw
/// key material).
fn load_keystore(chain_id: u64) -> Result<LocalKeystore, EngineError> {
    let mut keystore = LocalKeystore::new();
    let mut loaded = 0;

    for (name, value) in std::env::vars() {
        let Some(suffix) = name.strip_prefix("SIGNER_") else {
            continue;
        };
        let handle = KeyHandle::new(suffix.to_lowercase());
        keystore.register_from_private_key(handle, &value, chain_id)?;
        loaded += 1;
    }

    if loaded == 0 {
        return Err(EngineError::Keystore(
            "no signing keys found; set at least one SIGNER_<HANDLE> environment variable".into(),
        ));
    }

    info!("keystore loaded {} signing key(s)", loaded);
    Ok(keystore)
}

async fn build_engine(config_path: &str) -> Result<Arc<JobEngine>, EngineError> {
    let config = Config::load(config_path).unwrap_or_else(|e| {
        warn!("failed to load {}: {}; falling back to defaults", config_path, e);
        Config::load_or_default()
    });
    let parsed = ParsedConfig::from_config(&config)?;

    let store = Arc::new(Store::connect(&config.store.path).await?);

    let rpc = Arc::new(
        RpcPool::new(
            &config.rpc.endpoints,
            Duration::from_secs(config.rpc.health_ttl_secs),
            config.rpc.acquire_retries,
        )
        .map_err(|e| EngineError::Config(e.to_string()))?,
    );

    let keystore: Arc<dyn Keystore> = Arc::new(load_keystore(parsed.chain_id)?);
    let arbiter = Arc::new(NonceArbiter::new());
    let builder = Arc::new(TxBuilder::new(
        rpc.clone(),
        arbiter.clone(),
        keystore.clone(),
        parsed.chain_id,
        parsed.default_gas_price_wei,
    ));
    let watcher = Arc::new(ReceiptWatcher::spawn(
        rpc.clone(),
        arbiter.clone(),
        store.clone(),
        RECEIPT_WATCHER_WORKERS,
    ));
    let notifier = Arc::new(Notifier::new(
        config.monitoring.telegram_bot_token.clone(),
        config.monitoring.telegram_chat_id.clone(),
    ));

    let deps = EngineDeps {
        store,
        rpc,
        arbiter,
        builder,
        keystore,
        watcher,
        notifier,
        router: parsed.router,
        wrapped_native: parsed.wrapped_native,
        usdt: parsed.usdt,
        consecutive_failure_threshold: config.execution.consecutive_failure_threshold,
    };

    Ok(JobEngine::new(deps))
}

fn exit_code_for(err: &EngineError) -> ExitCode {
    match err {
        EngineError::Config(_) => ExitCode::from(1),
        EngineError::Keystore(_) => ExitCode::from(2),
        EngineError::Rpc(_) => ExitCode::from(3),
        _ => ExitCode::from(4),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            exit_code_for(&e)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, EngineError> {
    match cli.command {
        Command::Run => run_engine(&cli.config).await,
        Command::Submit { path } => submit(&cli.config, &path).await,
        Command::Pause { job_id } => set_job_state(&cli.config, job_id, store::JobState::Paused).await,
        Command::Resume { job_id } => set_job_state(&cli.config, job_id, store::JobState::Running).await,
        Command::Cancel { job_id } => set_job_state(&cli.config, job_id, store::JobState::Cancelled).await,
        Command::Status { job_id } => status(&cli.config, job_id).await,
    }
}

async fn run_engine(config_path: &str) -> Result<ExitCode, EngineError> {
    info!("═══════════════════════════════════════════");
    info!("    JOB ENGINE v0.1.0");
    info!("═══════════════════════════════════════════");

    let engine = build_engine(config_path).await?;
    engine.deps().notifier.send_startup_message().await;

    let resolved = engine.reconcile().await?;
    info!("startup reconciliation resolved {} pending transaction(s)", resolved);

    let rpc_health = engine.deps().rpc.clone();
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            rpc_health.health_check_all().await;
        }
    });

    engine.run().await;
    Ok(ExitCode::SUCCESS)
}

async fn submit(config_path: &str, path: &str) -> Result<ExitCode, EngineError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("failed to read job spec {path}: {e}")))?;

    let spec: JobSpec = if path.ends_with(".json") {
        serde_json::from_str(&contents)
            .map_err(|e| EngineError::JobRejected(format!("invalid JSON job spec: {e}")))?
    } else {
        toml::from_str(&contents)
            .map_err(|e| EngineError::JobRejected(format!("invalid TOML job spec: {e}")))?
    };

    let config = Config::load(config_path).unwrap_or_else(|_| Config::load_or_default());
    let store = Store::connect(&config.store.path).await?;
    let job_id = engine::write_job_row(&store, spec).await?;

    info!("submitted job #{}", job_id);
    println!("{job_id}");
    Ok(ExitCode::SUCCESS)
}

async fn set_job_state(config_path: &str, job_id: i64, state: store::JobState) -> Result<ExitCode, EngineError> {
    let config = Config::load(config_path).unwrap_or_else(|_| Config::load_or_default());
    let store = Store::connect(&config.store.path).await?;

    let job = store.get_job(job_id).await?.ok_or(error::StoreError::JobNotFound(job_id))?;
    info!("job #{} {} -> {:?}", job_id, job.title, state);

    store
        .update_job(job_id, store::JobPatch { state: Some(state), ..Default::default() })
        .await?;
    Ok(ExitCode::SUCCESS)
}

async fn status(config_path: &str, job_id: i64) -> Result<ExitCode, EngineError> {
    let config = Config::load(config_path).unwrap_or_else(|_| Config::load_or_default());
    let store = Store::connect(&config.store.path).await?;

    let Some(job) = store.get_job(job_id).await? else {
        println!("job #{job_id} not found");
        return Ok(ExitCode::from(4));
    };

    println!(
        "job #{} \"{}\" mode={} state={:?} done={}/{} failed={}",
        job.id, job.title, job.mode, job.state, job.done, job.total, job.failed
    );
    if let Some(err) = &job.error_message {
        println!("  error: {err}");
    }

    Ok(ExitCode::SUCCESS)
}
