//! Delivers envelopes to an HTTP endpoint in CloudEvents structured mode.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{spawn_stats_push, Processor, ProcessorOptions};
use crate::config::{BasicAuth, WebhookConfig};
use crate::envelope::Envelope;
use crate::error::{Result, RouterError};
use crate::metrics::{EndpointType, EventStats, Receiver, StatsTracker};

pub const PROCESSOR_NAME: &str = "webhook";
pub const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebhookProcessor {
    client: reqwest::Client,
    url: String,
    auth: Option<BasicAuth>,
    verbose: bool,
    stats: Arc<StatsTracker>,
}

impl WebhookProcessor {
    /// Validate `cfg` and start pushing stats to `receiver` until `ctx` is
    /// cancelled. No request is made during construction.
    pub fn new(
        ctx: &CancellationToken,
        cfg: &WebhookConfig,
        receiver: Arc<dyn Receiver>,
        options: ProcessorOptions,
    ) -> Result<Self> {
        cfg.validate()?;

        let url = options.endpoint.clone().unwrap_or_else(|| cfg.url.clone());
        reqwest::Url::parse(&url)
            .map_err(|e| RouterError::Config(format!("invalid webhook url '{}': {}", url, e)))?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let stats = Arc::new(StatsTracker::new(EventStats::new(
            PROCESSOR_NAME,
            EndpointType::Processor,
            url.clone(),
        )));
        spawn_stats_push(ctx.clone(), stats.clone(), receiver, options.push_interval);

        info!(%url, "webhook processor ready");
        Ok(Self {
            client,
            url,
            auth: cfg.auth.clone(),
            verbose: options.verbose,
            stats,
        })
    }

    pub fn stats(&self) -> EventStats {
        self.stats.snapshot()
    }

    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let body = envelope.to_json()?;
        if self.verbose {
            info!(url = %self.url, %body, "posting event");
        }

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, CLOUDEVENTS_JSON)
            .body(body);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::Delivery(format!(
                "webhook returned status {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Processor for WebhookProcessor {
    async fn process(&self, envelope: Envelope) -> Result<()> {
        match self.send(&envelope).await {
            Ok(()) => {
                self.stats.record_success(&envelope.subject);
                debug!(id = %envelope.id, subject = %envelope.subject, "delivered event to webhook");
                Ok(())
            }
            Err(e) => {
                self.stats.record_error();
                Err(e)
            }
        }
    }
}
