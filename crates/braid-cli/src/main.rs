//! braid - command line front end for the reliable queue.

mod cli;
mod config;

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use braid_core::{
    ConfigLoader, Consumer, HandlerError, Producer, Queue, QueueError, QueueEvent, QueueStatus,
    Task, TaskHandler, TimeoutMonitor, WorkerGroup,
};
use braid_redis::RedisListStore;
use clap::Parser;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::BraidConfig;

/// Logs every task it receives.
struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, task: &Task, data: Value) -> Result<(), HandlerError> {
        info!(task_id = %task.task_id(), retries = task.retries(), %data, "task received");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config: BraidConfig = ConfigLoader::load(&cli.config)?;
    config.queue.validate()?;

    let store = Arc::new(RedisListStore::connect(&config.redis_url).await?);
    let queue = Queue::new(store, config.queue.clone())?;

    let result = match cli.command {
        Commands::Push { json } => push(&queue, &json).await,
        Commands::Work { workers } => work(&queue, workers).await,
        Commands::Stats => stats(&queue).await,
        Commands::Monitor => monitor(&queue).await,
    };

    match queue.stop().await {
        Ok(()) | Err(QueueError::AlreadyClosing) => {}
        Err(err) => warn!(error = %err, "queue did not stop cleanly"),
    }
    result
}

async fn push(queue: &Queue, json: &str) -> Result<(), Box<dyn Error>> {
    let payload: Value = serde_json::from_str(json)?;
    let producer = Producer::new(queue.clone());

    match producer.push(&payload).await {
        Ok(length) => println!("queued ({length} pending)"),
        // the task is stored; the queue is paused until the backlog drains
        Err(QueueError::Overflow {
            length, max_size, ..
        }) => println!("queued ({length} pending, over capacity {max_size})"),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

async fn work(queue: &Queue, workers: usize) -> Result<(), Box<dyn Error>> {
    let consumer = Arc::new(Consumer::new(queue.clone()));
    let group = WorkerGroup::spawn(
        workers.max(1),
        consumer,
        Arc::new(EchoHandler),
        queue.config().max_retries,
    );
    let monitor = TimeoutMonitor::new(queue.clone()).spawn();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
        }
        _ = wait_for_stop(queue) => warn!("queue stopped"),
    }

    group.shutdown_and_join().await;
    monitor.shutdown().await;
    Ok(())
}

async fn stats(queue: &Queue) -> Result<(), Box<dyn Error>> {
    let stats = serde_json::json!({
        "queue": queue.name(),
        "status": queue.status().as_str(),
        "pending": queue.pending().await?,
        "processing": queue.processing().await?,
        "max_size": queue.max_size(),
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn monitor(queue: &Queue) -> Result<(), Box<dyn Error>> {
    let handle = TimeoutMonitor::new(queue.clone()).spawn();
    let mut events = handle.subscribe();

    let report = async {
        loop {
            match events.recv().await {
                Ok(QueueEvent::TaskTimeout { task, age }) => {
                    println!("{} stale for {}s: {}", task.task_id(), age.as_secs(), task.payload());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed monitor events"),
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        _ = report => {}
        _ = wait_for_stop(queue) => warn!("queue stopped"),
    }

    handle.shutdown().await;
    Ok(())
}

/// Resolves once the queue reaches `stopped`.
async fn wait_for_stop(queue: &Queue) {
    let mut events = queue.subscribe();
    if queue.status() == QueueStatus::Stopped {
        return;
    }
    loop {
        match events.recv().await {
            Ok(QueueEvent::StatusChanged {
                to: QueueStatus::Stopped,
                ..
            })
            | Err(RecvError::Closed) => return,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
}
