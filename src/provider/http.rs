//! A provider backed by a vCenter event history endpoint.
//!
//! The endpoint answers `GET {url}?afterKey={key}&limit={n}` with a JSON array
//! of events newer than `key`, most recent first. A poller task turns each
//! non-empty page into a [`Batch`] and hands it to the shared streaming loop.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{stream_batches, Batch, Provider};
use crate::config::HttpProviderConfig;
use crate::error::{Result, RouterError};
use crate::events::VsphereEvent;
use crate::metrics::{self, EndpointType, EventStats, Receiver, StatsTracker};
use crate::processor::Processor;

pub const PROVIDER_NAME: &str = "vcenter_http";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpProvider {
    config: HttpProviderConfig,
    client: reqwest::Client,
    stats: Arc<StatsTracker>,
    checkpoint: Arc<AtomicI32>,
    push_interval: Duration,
    /// Cancelled by `shutdown`.
    closed: CancellationToken,
    active: StdMutex<Option<ActiveStream>>,
    streaming: Mutex<()>,
}

struct ActiveStream {
    run: CancellationToken,
    poller: JoinHandle<()>,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig, push_interval: Duration) -> Result<Self> {
        config.validate()?;
        reqwest::Url::parse(&config.url)
            .map_err(|e| RouterError::Config(format!("invalid provider url '{}': {}", config.url, e)))?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let stats = Arc::new(StatsTracker::new(EventStats::new(
            PROVIDER_NAME,
            EndpointType::Provider,
            config.url.clone(),
        )));

        Ok(Self {
            config,
            client,
            stats,
            checkpoint: Arc::new(AtomicI32::new(0)),
            push_interval,
            closed: CancellationToken::new(),
            active: StdMutex::new(None),
            streaming: Mutex::new(()),
        })
    }

    pub fn stats(&self) -> EventStats {
        self.stats.snapshot()
    }

    /// Key of the newest event handed to the stream.
    pub fn checkpoint(&self) -> i32 {
        self.checkpoint.load(Ordering::SeqCst)
    }

    fn take_active(&self) -> Option<ActiveStream> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn stream(&self, ctx: &CancellationToken, processor: &dyn Processor) -> Result<()> {
        let _guard = self
            .streaming
            .try_lock()
            .map_err(|_| RouterError::AlreadyStreaming)?;

        // cancelled by either the caller or shutdown
        let run = ctx.child_token();
        let (tx, mut rx) = mpsc::channel::<Batch>(1);
        {
            // checked under the lock shutdown takes, so a concurrent shutdown
            // either stops us here or finds the stream registered
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if self.closed.is_cancelled() {
                return Ok(());
            }
            let poller = Poller {
                client: self.client.clone(),
                url: self.config.url.clone(),
                page_size: self.config.page_size,
                interval: self.config.poll_interval(),
                stats: self.stats.clone(),
                checkpoint: self.checkpoint.clone(),
            };
            *active = Some(ActiveStream {
                run: run.clone(),
                poller: tokio::spawn(poller.run(run.clone(), tx)),
            });
        }

        let source = self.config.source().to_string();
        info!(url = %self.config.url, %source, "streaming vCenter events");

        let result = stream_batches(&run, &mut rx, &source, processor)
            .instrument(info_span!("provider", kind = "http", source = %source))
            .await;

        run.cancel();
        if let Some(active) = self.take_active() {
            let _ = active.poller.await;
        }
        result
    }

    async fn push_metrics(&self, ctx: &CancellationToken, receiver: Arc<dyn Receiver>) {
        tokio::select! {
            _ = self.closed.cancelled() => {}
            _ = metrics::push_stats(ctx, &self.stats, &receiver, self.push_interval) => {}
        }
    }

    async fn shutdown(&self, _ctx: &CancellationToken) -> Result<()> {
        self.closed.cancel();
        if let Some(active) = self.take_active() {
            active.run.cancel();
            active.poller.abort();
        }
        debug!("vCenter provider shut down");
        Ok(())
    }
}

struct Poller {
    client: reqwest::Client,
    url: String,
    page_size: u32,
    interval: Duration,
    stats: Arc<StatsTracker>,
    /// Highest event key handed to the stream so far. Shared with the provider
    /// so a new stream resumes where the last one stopped.
    checkpoint: Arc<AtomicI32>,
}

impl Poller {
    async fn run(self, stop: CancellationToken, tx: mpsc::Sender<Batch>) {
        loop {
            let page = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                page = self.fetch() => page,
            };

            match page {
                Ok(batch) if !batch.is_empty() => {
                    let full = batch.len() >= self.page_size as usize;
                    self.stats.record_events(batch.len() as u64);
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => return,
                        sent = tx.send(batch) => if sent.is_err() { return },
                    }
                    // a full page means more may be waiting
                    if full {
                        continue;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.record_failure();
                    warn!(url = %self.url, error = %e, "could not retrieve events");
                }
            }

            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Fetch the next page, keeping only events past the checkpoint.
    async fn fetch(&self) -> Result<Batch> {
        let checkpoint = self.checkpoint.load(Ordering::SeqCst);
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("afterKey", checkpoint.to_string()),
                ("limit", self.page_size.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::Api {
                message: format!("event history returned status {}: {}", status, body),
            });
        }

        let mut page: Vec<VsphereEvent> = response.json().await?;
        page.retain(|e| e.key > checkpoint);
        if let Some(max) = page.iter().map(|e| e.key).max() {
            self.checkpoint.store(max, Ordering::SeqCst);
        }
        debug!(events = page.len(), after_key = checkpoint, "retrieved events");
        Ok(page)
    }
}
