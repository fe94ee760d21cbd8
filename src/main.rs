use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use chat_outbox::config::Settings;
use chat_outbox::metrics::encode_metrics;
use chat_outbox::outbox::maintenance;
use chat_outbox::redis::RedisPool;
use chat_outbox::store::{create_store, OutboxStore};
use chat_outbox::telemetry::init_tracing;

/// Operator tool for the chat outbox
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the depth of every bucket, the delayed set and dead letters
    Stats,
    /// Remove queued edits left over from a previous run
    PurgeStaleEdits,
    /// List the oldest dead letters without removing them
    DeadLetters {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Move dead letters back to their buckets with a fresh retry budget
    RequeueDeadLetters {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Refresh depth gauges and print metrics in Prometheus text format
    Metrics,
    /// Ping the store backend and report connection and circuit breaker state
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::new().context("Failed to load configuration")?;
    init_tracing(&settings.logging);

    let pool = if settings.queue.backend == "redis" {
        let pool = RedisPool::new(settings.redis.clone()).context("Invalid Redis configuration")?;
        Some(Arc::new(pool))
    } else {
        None
    };
    let store = create_store(&settings.queue, pool.clone());

    run(args.command, store.as_ref(), pool.as_deref()).await
}

async fn run(command: Command, store: &dyn OutboxStore, pool: Option<&RedisPool>) -> Result<()> {
    match command {
        Command::Stats => {
            let stats = maintenance::queue_stats(store)
                .await
                .context("Failed to read queue stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::PurgeStaleEdits => {
            let report = maintenance::purge_stale_edits(store)
                .await
                .context("Failed to purge stale edits")?;
            let output = json!({ "removed": report.total(), "by_priority": report });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::DeadLetters { limit } => {
            let records = maintenance::dead_letters(store, limit)
                .await
                .context("Failed to read dead letters")?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::RequeueDeadLetters { limit } => {
            let requeued = maintenance::requeue_dead_letters(store, limit)
                .await
                .context("Failed to requeue dead letters")?;
            println!("{}", serde_json::to_string_pretty(&json!({ "requeued": requeued }))?);
        }
        Command::Metrics => {
            maintenance::queue_stats(store)
                .await
                .context("Failed to read queue stats")?;
            print!("{}", encode_metrics()?);
        }
        Command::Health => {
            let report = health_report(store, pool).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

async fn health_report(store: &dyn OutboxStore, pool: Option<&RedisPool>) -> serde_json::Value {
    let Some(pool) = pool else {
        return json!({ "backend": store.backend_name(), "healthy": true });
    };

    let ping = pool.ping().await;
    if let Err(e) = &ping {
        tracing::warn!(error = %e, url = pool.url(), "Redis ping failed");
    }
    json!({
        "backend": store.backend_name(),
        "url": pool.url(),
        "ping": ping.is_ok(),
        "healthy": pool.is_healthy(),
        "circuit_state": format!("{:?}", pool.circuit_state()),
    })
}
