//! jobwire CLI - follow a job or collection over the event gateway.
//!
//! This is the main binary entry point. See the `jobwire` library for the
//! core functionality.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jobwire::api::ApiClient;
use jobwire::watcher::{JobWatcher, ScriptWatcher};
use jobwire::{Config, ConnectionRegistry};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "jobwire")]
#[command(version)]
#[command(about = "Follow long-running backend jobs over WebSocket")]
struct Cli {
    /// Override the WebSocket gateway URL
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Override the HTTP API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a job until it completes
    Job {
        job_id: String,
        /// Also poll the HTTP status endpoint every N seconds
        #[arg(long, value_name = "SECS")]
        poll: Option<u64>,
    },
    /// Watch a collection until a script is generated
    Collection { collection_id: String },
    /// Fetch a job's status once over HTTP
    Status { job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_overrides(|key| match key {
        "JOBWIRE_WS_URL" => cli.ws_url.clone(),
        "JOBWIRE_API_URL" => cli.api_url.clone(),
        _ => None,
    });

    match cli.command {
        Commands::Job { job_id, poll } => watch_job(&config, &job_id, poll).await,
        Commands::Collection { collection_id } => watch_collection(&config, &collection_id).await,
        Commands::Status { job_id } => {
            let api = ApiClient::new(config.api_url.as_str())?;
            let status = api.script_status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

fn build_registry(config: &Config) -> ConnectionRegistry {
    ConnectionRegistry::new(
        Arc::new(config.connector()),
        config.registry_config(),
    )
}

async fn watch_job(config: &Config, job_id: &str, poll: Option<u64>) -> Result<()> {
    let registry = build_registry(config);
    let api = ApiClient::new(config.api_url.as_str())?;
    let watcher = JobWatcher::start(&registry, &config.ws_url, job_id);
    let mut progress = watcher.subscribe_progress();

    let mut poll_timer = poll.map(|secs| tokio::time::interval(Duration::from_secs(secs.max(1))));

    println!("Watching job {job_id} via {}", config.ws_url);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = progress.borrow_and_update().clone();
                println!(
                    "connected={} status={} error={}",
                    current.connected,
                    current.status.as_deref().unwrap_or("-"),
                    current.error.as_deref().unwrap_or("-")
                );
                if current.complete {
                    print_job_result(&current);
                    break;
                }
            }
            () = tick(poll_timer.as_mut()) => {
                if let Err(e) = watcher.check_status(&api).await {
                    log::warn!("Status poll failed: {:#}", e);
                }
            }
        }
    }

    registry.close_connection(job_id);
    Ok(())
}

async fn watch_collection(config: &Config, collection_id: &str) -> Result<()> {
    let registry = build_registry(config);
    let watcher = ScriptWatcher::start(&registry, &config.ws_url, collection_id);
    let mut progress = watcher.subscribe_progress();

    println!("Watching collection {collection_id} via {}", config.ws_url);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = progress.borrow_and_update().clone();
                println!("status={}", current.status.as_deref().unwrap_or("-"));
                if let Some(script_id) = current.script_id {
                    println!("Script generated: {script_id}");
                    break;
                }
            }
        }
    }

    registry.close_connection(collection_id);
    Ok(())
}

/// Wait for the next poll tick, or forever when polling is off.
async fn tick(timer: Option<&mut tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_job_result(progress: &jobwire::watcher::JobProgress) {
    println!("Job complete");
    if let Some(audio) = &progress.audio_url {
        println!("  audio:  {audio}");
    }
    for url in &progress.image_urls {
        println!("  image:  {url}");
    }
    if let Some(text) = &progress.script_text {
        println!("  script: {} chars", text.chars().count());
    }
}
