//! Runs the discovery and exit-check cycles as two independent,
//! cancellable tasks. The exit-check interval is re-read from config on
//! every iteration, so a live config reload takes effect without a
//! restart.

use crate::config::AppConfig;
use crate::engine::StrategyEngine;
use crate::notifier::Notifier;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub running: bool,
    pub discovery_cycles: u64,
    pub exit_cycles: u64,
    pub last_discovery_at: Option<DateTime<Utc>>,
    pub last_exit_at: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    config: AppConfig,
    engine: Arc<StrategyEngine>,
    notifier: Arc<dyn Notifier>,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
    exit_task: Mutex<Option<JoinHandle<()>>>,
    discovery_cycles: AtomicU64,
    exit_cycles: AtomicU64,
    last_discovery_at: Mutex<Option<DateTime<Utc>>>,
    last_exit_at: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(config: AppConfig, engine: Arc<StrategyEngine>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            engine,
            notifier,
            discovery_task: Mutex::new(None),
            exit_task: Mutex::new(None),
            discovery_cycles: AtomicU64::new(0),
            exit_cycles: AtomicU64::new(0),
            last_discovery_at: Mutex::new(None),
            last_exit_at: Mutex::new(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) {
        let mut discovery_guard = self.discovery_task.lock().await;
        if discovery_guard.is_none() {
            let this = Arc::clone(self);
            *discovery_guard = Some(tokio::spawn(async move { this.discovery_loop().await }));
        }
        drop(discovery_guard);

        let mut exit_guard = self.exit_task.lock().await;
        if exit_guard.is_none() {
            let this = Arc::clone(self);
            *exit_guard = Some(tokio::spawn(async move { this.exit_loop().await }));
        }
        info!("scheduler started");
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.discovery_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.exit_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }

    async fn discovery_loop(&self) {
        let interval = std::time::Duration::from_secs(self.config.discovery_interval_mins as u64 * 60);
        loop {
            self.run_discovery_now().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn exit_loop(&self) {
        loop {
            self.run_exit_check_now().await;
            let interval = std::time::Duration::from_secs(self.config.price_check_seconds as u64);
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn run_discovery_now(&self) {
        let result = self.engine.run_discovery_cycle().await;
        self.discovery_cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_discovery_at.lock().await = Some(result.timestamp);
        if self.notifier.is_configured() {
            self.notifier.notify_discovery_cycle(&result).await;
        }
    }

    pub async fn run_exit_check_now(&self) {
        let result = self.engine.run_exit_checks().await;
        self.exit_cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_exit_at.lock().await = Some(result.timestamp);
        if self.notifier.is_configured() {
            self.notifier.notify_exit_cycle(&result).await;
        }
    }

    pub async fn get_status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.discovery_task.lock().await.is_some(),
            discovery_cycles: self.discovery_cycles.load(Ordering::Relaxed),
            exit_cycles: self.exit_cycles.load(Ordering::Relaxed),
            last_discovery_at: *self.last_discovery_at.lock().await,
            last_exit_at: *self.last_exit_at.lock().await,
        }
    }
}
