//! A provider fed by a caller-controlled channel of batches.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::{stream_batches, Batch, Provider};
use crate::error::{Result, RouterError};
use crate::metrics::Receiver;
use crate::processor::Processor;

pub const FAKE_SOURCE: &str = "https://fake.vcenter01.testing.io/sdk";

/// Streams batches received from a generator channel with the same ordering
/// and error handling as the live providers.
pub struct FakeProvider {
    source: String,
    events: Mutex<mpsc::Receiver<Batch>>,
}

impl FakeProvider {
    pub fn new(generator: mpsc::Receiver<Batch>) -> Self {
        Self::with_source(generator, FAKE_SOURCE)
    }

    pub fn with_source(generator: mpsc::Receiver<Batch>, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            events: Mutex::new(generator),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn stream(&self, ctx: &CancellationToken, processor: &dyn Processor) -> Result<()> {
        let mut events = self
            .events
            .try_lock()
            .map_err(|_| RouterError::AlreadyStreaming)?;

        stream_batches(ctx, &mut events, &self.source, processor)
            .instrument(info_span!("provider", kind = "fake", source = %self.source))
            .await
    }

    async fn push_metrics(&self, _ctx: &CancellationToken, _receiver: Arc<dyn Receiver>) {}

    async fn shutdown(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }
}
