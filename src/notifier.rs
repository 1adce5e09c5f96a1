//! External notifier collaborator: a narrow, swallow-errors fan-out
//! point for cycle summaries. The concrete chat-bot integration is out
//! of scope; this module provides the trait boundary plus a
//! tracing-backed implementation for local/dev use.

use crate::models::{DiscoveryCycleResult, ExitCycleResult};
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn notify_discovery_cycle(&self, result: &DiscoveryCycleResult);
    async fn notify_exit_cycle(&self, result: &ExitCycleResult);
}

/// Logs cycle summaries at info level; always configured.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    fn is_configured(&self) -> bool {
        true
    }

    async fn notify_discovery_cycle(&self, result: &DiscoveryCycleResult) {
        info!(summary = %result.summary, opened = result.positions_opened.len(), "discovery cycle complete");
    }

    async fn notify_exit_cycle(&self, result: &ExitCycleResult) {
        info!(summary = %result.summary, closed = result.positions_closed.len(), "exit cycle complete");
    }
}

/// A notifier that is never configured and does nothing; used when no
/// external channel is set up.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    fn is_configured(&self) -> bool {
        false
    }

    async fn notify_discovery_cycle(&self, _result: &DiscoveryCycleResult) {}
    async fn notify_exit_cycle(&self, _result: &ExitCycleResult) {}
}
