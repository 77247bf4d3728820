//! Background sweep of idle sessions

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use viewswap_engine::ExchangeEngine;

/// Periodically drops sessions the engine no longer needs to hold
pub struct SessionSweepTask {
    engine: Arc<ExchangeEngine>,
    interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl SessionSweepTask {
    pub fn new(
        engine: Arc<ExchangeEngine>,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            engine,
            interval,
            shutdown_rx,
        }
    }

    /// Spawn the task
    pub fn spawn(
        engine: Arc<ExchangeEngine>,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(engine, interval, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Session sweep started");

        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Session sweep shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let evicted = self.engine.evict_idle_sessions();
                    debug!(evicted, live = self.engine.sessions().len(), "Session sweep ran");
                }
            }
        }
    }
}
