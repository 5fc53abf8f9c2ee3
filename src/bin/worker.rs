//! Appointment Creator Worker
//!
//! Consumes appointment events from a Redis stream and hands each delivery to
//! the [`EventProcessor`].
//!
//! ## Delivery semantics
//!
//! - Handled, dropped and undecodable messages are acknowledged.
//! - Retryable failures are left pending; entries idle longer than
//!   `pending_idle_ms` are reclaimed with XAUTOCLAIM and processed again.
//!
//! ## Configuration
//!
//! See [`AppConfig`]. Environment variables:
//! - `APPOINTMENT_CREATOR_CONFIG`: Config file path (default: "config/appointment-creator.toml")
//! - `REDIS_URL`: Redis connection string (overrides the config file)
//! - `APPOINTMENT_WORKER_NAME`: Unique worker identifier (default: hostname or UUID)
//! - `APPOINTMENT_CONSUMER_GROUP`: Consumer group name
//! - `RUST_LOG`: Logging level (default: "info")

use deadpool_redis::redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use deadpool_redis::redis::{cmd, AsyncCommands, RedisResult};
use deadpool_redis::{Config, Connection, Runtime};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use appointment_creator::config::{AppConfig, WorkerConfig};
use appointment_creator::repository::{RedisAppointmentRepository, RedisEventRepository};
use appointment_creator::shutdown::ShutdownSignal;
use appointment_creator::stream::{is_idle_read, parse_entry, READ_ERROR_BACKOFF};
use appointment_creator::{Context, Dispatch, EventProcessor};

/// Get the worker name from configuration or generate one.
fn get_worker_name(config: &WorkerConfig) -> String {
    if let Some(name) = &config.name {
        return name.clone();
    }

    // Try hostname
    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return format!("worker-{}", name);
        }
    }

    // Fallback to UUID
    format!("worker-{}", uuid::Uuid::new_v4())
}

#[derive(Debug, Default)]
struct Stats {
    processed: u64,
    dropped: u64,
    rejected: u64,
    failed: u64,
}

struct Worker {
    processor: EventProcessor,
    config: WorkerConfig,
    name: String,
    root: Context,
    stats: Stats,
}

impl Worker {
    async fn ensure_group(&self, conn: &mut Connection) -> RedisResult<()> {
        let result: RedisResult<()> = cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(()) => {
                info!(consumer_group = %self.config.consumer_group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                info!(consumer_group = %self.config.consumer_group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Claim pending entries that other consumers (or this one) left unacknowledged.
    async fn claim_pending(&self, conn: &mut Connection) -> Vec<StreamId> {
        let opts = StreamAutoClaimOptions::default().count(self.config.batch_size);

        let result: RedisResult<StreamAutoClaimReply> = conn
            .xautoclaim_options(
                &self.config.stream,
                &self.config.consumer_group,
                &self.name,
                self.config.pending_idle_ms,
                "0-0",
                opts,
            )
            .await;

        match result {
            Ok(reply) => {
                if !reply.claimed.is_empty() {
                    info!(count = reply.claimed.len(), "Claimed pending messages for redelivery");
                }
                reply.claimed
            }
            Err(e) => {
                debug!(error = %e, "XAUTOCLAIM failed, skipping pending recovery");
                Vec::new()
            }
        }
    }

    async fn ack(&self, conn: &mut Connection, id: &str) {
        let result: RedisResult<()> = conn
            .xack(&self.config.stream, &self.config.consumer_group, &[id])
            .await;

        if let Err(e) = result {
            error!(id = %id, error = %e, "Failed to ACK message");
        }
    }

    async fn process_entry(&mut self, conn: &mut Connection, entry: StreamId) {
        let delivery = match parse_entry(&entry.id, &entry.map) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(id = %entry.id, error = %e, "Skipping unparseable stream entry");
                self.stats.rejected += 1;
                self.ack(conn, &entry.id).await;
                return;
            }
        };

        let ctx = self.root.with_timeout(self.config.handle_timeout());

        match self
            .processor
            .handle(&ctx, &delivery.message_id, &delivery.message)
            .await
        {
            Ok(Dispatch::Reconciled(result)) => {
                self.stats.processed += 1;
                debug!(id = %entry.id, message_id = %delivery.message_id, result = ?result, "Message handled");
                self.ack(conn, &entry.id).await;
            }
            Ok(Dispatch::Dropped { event_type }) => {
                self.stats.dropped += 1;
                debug!(id = %entry.id, event_type = %event_type, "Message dropped");
                self.ack(conn, &entry.id).await;
            }
            Err(e) if !e.is_retryable() => {
                self.stats.rejected += 1;
                error!(
                    id = %entry.id,
                    message_id = %delivery.message_id,
                    error = %e,
                    "Rejecting message that can never be processed"
                );
                self.ack(conn, &entry.id).await;
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(
                    id = %entry.id,
                    message_id = %delivery.message_id,
                    error = %e,
                    "Message processing failed, leaving pending for redelivery"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = AppConfig::load()?;
    config.apply_env_overrides();
    config.validate()?;

    let worker_name = get_worker_name(&config.worker);

    info!(
        worker_name = %worker_name,
        consumer_group = %config.worker.consumer_group,
        stream = %config.worker.stream,
        "Appointment creator worker starting"
    );

    // Create Redis connection pool
    let pool = Config::from_url(config.redis.url.clone()).create_pool(Some(Runtime::Tokio1))?;

    let processor = EventProcessor::new(
        Arc::new(RedisEventRepository::new(
            pool.clone(),
            config.storage.key_prefix.clone(),
        )),
        Arc::new(RedisAppointmentRepository::new(
            pool.clone(),
            config.storage.key_prefix.clone(),
        )),
    );

    // Setup graceful shutdown
    let shutdown = ShutdownSignal::new();
    tokio::spawn(shutdown.clone().listen());

    let mut worker = Worker {
        processor,
        config: config.worker.clone(),
        name: worker_name,
        root: shutdown.context(),
        stats: Stats::default(),
    };

    let mut conn = pool.get().await?;
    worker.ensure_group(&mut conn).await.map_err(|e| {
        error!(error = %e, "Failed to create consumer group");
        e
    })?;

    // Pick up anything a previous worker left behind
    for entry in worker.claim_pending(&mut conn).await {
        worker.process_entry(&mut conn, entry).await;
    }
    drop(conn);

    info!(stream = %worker.config.stream, "Listening for events");

    let opts = StreamReadOptions::default()
        .group(&worker.config.consumer_group, &worker.name)
        .block(worker.config.block_ms as usize)
        .count(worker.config.batch_size);

    while !shutdown.is_shutdown() {
        let mut conn = match pool.get().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to get Redis connection");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => continue,
                }
            }
        };

        let keys = [worker.config.stream.clone()];
        let ids = [">"];
        let result: RedisResult<StreamReadReply> = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received during read, finishing...");
                break;
            }
            result = conn.xread_options(&keys, &ids, &opts) => result,
        };

        let entries: Vec<StreamId> = match result {
            Ok(reply) => reply.keys.into_iter().flat_map(|key| key.ids).collect(),
            Err(e) => {
                // Ignore timeout/nil errors (normal when no messages)
                if !is_idle_read(&e) {
                    warn!(error = %e, "Stream read error");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => continue,
                    }
                }
                Vec::new()
            }
        };

        // Idle read: give stuck deliveries another chance
        let entries = if entries.is_empty() {
            worker.claim_pending(&mut conn).await
        } else {
            entries
        };

        for entry in entries {
            if shutdown.is_shutdown() {
                break;
            }
            worker.process_entry(&mut conn, entry).await;
        }
    }

    info!(
        processed = worker.stats.processed,
        dropped = worker.stats.dropped,
        rejected = worker.stats.rejected,
        failed = worker.stats.failed,
        "Worker shutdown complete"
    );

    Ok(())
}
