//! Providers stream events from a source into a [`Processor`].

pub mod fake;
pub mod http;

pub use fake::FakeProvider;
pub use http::HttpProvider;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::events::{new_cloud_event, VsphereEvent};
use crate::metrics::{self, Receiver};
use crate::processor::Processor;

/// Events delivered together by a source, in the order the source produced them.
pub type Batch = Vec<VsphereEvent>;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Forward events to `processor` until `ctx` is cancelled.
    ///
    /// Cancellation is the normal way to stop and yields `Ok(())`. Conversion and
    /// delivery failures are logged per event and never end the stream.
    async fn stream(&self, ctx: &CancellationToken, processor: &dyn Processor) -> Result<()>;

    /// Report provider statistics to `receiver` until `ctx` is cancelled. Never
    /// fails and never blocks `stream`, however slow the receiver is.
    async fn push_metrics(&self, ctx: &CancellationToken, receiver: Arc<dyn Receiver>);

    /// Release provider resources. Safe to call more than once.
    async fn shutdown(&self, ctx: &CancellationToken) -> Result<()>;
}

/// Build the provider selected by `config`.
pub fn from_config(config: &ProviderConfig, push_interval: std::time::Duration) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Fake => {
            // sender dropped on purpose: the fake never produces anything
            let (_tx, rx) = mpsc::channel(1);
            Ok(Arc::new(FakeProvider::new(rx)))
        }
        ProviderConfig::Http(cfg) => Ok(Arc::new(HttpProvider::new(cfg.clone(), push_interval)?)),
    }
}

/// Drain `batches` into `processor` until `ctx` is cancelled.
///
/// The only suspension point is the wait for the next batch. A batch is fully
/// converted and delivered before the next one is taken, and cancellation is
/// observed only between batches. A closed channel parks the loop until
/// cancellation.
pub(crate) async fn stream_batches(
    ctx: &CancellationToken,
    batches: &mut mpsc::Receiver<Batch>,
    source: &str,
    processor: &dyn Processor,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(()),
            batch = batches.recv() => match batch {
                Some(batch) => process_batch(&batch, source, processor).await,
                None => {
                    debug!(source, "event source closed, waiting for cancellation");
                    ctx.cancelled().await;
                    return Ok(());
                }
            },
        }
    }
}

/// Convert and deliver one batch, newest arrival last.
///
/// Sources hand over batches with the most recent event first, so iterating in
/// reverse restores increasing event keys.
pub(crate) async fn process_batch(batch: &[VsphereEvent], source: &str, processor: &dyn Processor) {
    metrics::stream::batch_received(batch.len());

    for event in batch.iter().rev() {
        let envelope = match new_cloud_event(event, source) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::stream::conversion_failed();
                warn!(?event, error = %e, "skipping event because it could not be converted to CloudEvent format");
                continue;
            }
        };
        metrics::stream::event_converted();

        let id = envelope.id.clone();
        let subject = envelope.subject.clone();
        let started = Instant::now();
        match processor.process(envelope).await {
            Ok(()) => metrics::stream::event_delivered(started.elapsed().as_secs_f64()),
            Err(e) => {
                metrics::stream::delivery_failed(started.elapsed().as_secs_f64());
                warn!(event_key = event.key, %id, %subject, error = %e, "could not process event");
            }
        }
    }
}
