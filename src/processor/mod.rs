//! Processors deliver envelopes to a downstream sink.

pub mod event_bridge;
pub mod sigv4;
pub mod webhook;

pub use event_bridge::EventBridgeProcessor;
pub use webhook::WebhookProcessor;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProcessorConfig;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::metrics::{self, Receiver, StatsTracker};

/// Default interval between two stats pushes.
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Accepts one envelope at a time and attempts delivery.
///
/// The router calls `process` sequentially from a single task. Implementations
/// that can be shared across tasks document so themselves.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, envelope: Envelope) -> Result<()>;
}

/// Optional behavior toggles applied when a processor is constructed.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub verbose: bool,
    pub push_interval: Duration,
    /// Overrides the backend endpoint derived from the configuration.
    pub endpoint: Option<String>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            push_interval: DEFAULT_PUSH_INTERVAL,
            endpoint: None,
        }
    }
}

impl ProcessorOptions {
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn push_interval(mut self, interval: Duration) -> Self {
        self.push_interval = interval;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Build the processor selected by `config`.
pub async fn from_config(
    ctx: &CancellationToken,
    config: &ProcessorConfig,
    receiver: Arc<dyn Receiver>,
    options: ProcessorOptions,
) -> Result<Arc<dyn Processor>> {
    match config {
        ProcessorConfig::AwsEventBridge(cfg) => {
            let p = EventBridgeProcessor::new(ctx, cfg, receiver, options).await?;
            Ok(Arc::new(p))
        }
        ProcessorConfig::Webhook(cfg) => {
            let p = WebhookProcessor::new(ctx, cfg, receiver, options)?;
            Ok(Arc::new(p))
        }
    }
}

/// Push snapshots from `stats` to `receiver` every `interval` until `ctx` is
/// cancelled, on a task of its own.
pub(crate) fn spawn_stats_push(
    ctx: CancellationToken,
    stats: Arc<StatsTracker>,
    receiver: Arc<dyn Receiver>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move { metrics::push_stats(&ctx, &stats, &receiver, interval).await })
}
