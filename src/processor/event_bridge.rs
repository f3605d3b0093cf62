//! Delivers envelopes to an AWS EventBridge event bus.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sigv4::{self, Credentials, SignableRequest};
use super::{spawn_stats_push, Processor, ProcessorOptions};
use crate::config::{AuthMethod, EventBridgeConfig};
use crate::envelope::Envelope;
use crate::error::{Result, RouterError};
use crate::metrics::{EndpointType, EventStats, Receiver, StatsTracker};

pub const PROCESSOR_NAME: &str = "aws_event_bridge";

const SERVICE: &str = "events";
const AMZ_JSON: &str = "application/x-amz-json-1.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListRulesRequest<'a> {
    event_bus_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListRulesResponse {
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Rule {
    arn: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    event_pattern: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsRequest<'a> {
    entries: Vec<PutEventsEntry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsEntry<'a> {
    source: &'a str,
    detail_type: &'a str,
    detail: String,
    event_bus_name: &'a str,
    /// Seconds since the epoch.
    time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResponse {
    #[serde(default)]
    failed_entry_count: u32,
    #[serde(default)]
    entries: Vec<PutEventsResultEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResultEntry {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct AwsErrorBody {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct EventPattern {
    #[serde(default)]
    detail: Option<DetailPattern>,
}

#[derive(Deserialize)]
struct DetailPattern {
    #[serde(default)]
    subject: Vec<serde_json::Value>,
}

/// Subjects matched by a rule's event pattern.
///
/// `None` means every subject is forwarded: the pattern has no
/// `detail.subject` list or uses matchers other than exact strings.
fn subject_filter(pattern: Option<&str>) -> Option<HashSet<String>> {
    let pattern: EventPattern = match serde_json::from_str(pattern?) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "could not parse rule event pattern, forwarding all subjects");
            return None;
        }
    };

    let values = pattern.detail?.subject;
    if values.is_empty() {
        return None;
    }

    let mut subjects = HashSet::with_capacity(values.len());
    for value in values {
        match value {
            serde_json::Value::String(s) => {
                subjects.insert(s);
            }
            other => {
                debug!(matcher = %other, "rule uses content filtering, forwarding all subjects");
                return None;
            }
        }
    }
    Some(subjects)
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| RouterError::Config(format!("endpoint '{}' has no host", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn api_error(status: reqwest::StatusCode, body: &str) -> RouterError {
    let message = match serde_json::from_str::<AwsErrorBody>(body) {
        Ok(AwsErrorBody {
            kind: Some(kind),
            message,
        }) => format!("{} ({}): {}", kind, status, message.unwrap_or_default()),
        _ => format!("EventBridge returned status {}: {}", status, body),
    };
    RouterError::Api { message }
}

/// Sends each envelope as a single `PutEvents` entry.
///
/// Safe to share across tasks; stats are updated under a lock.
pub struct EventBridgeProcessor {
    client: reqwest::Client,
    endpoint: Url,
    host: String,
    region: String,
    event_bus: String,
    rule_arn: String,
    access_key: String,
    secret_key: String,
    subjects: Option<HashSet<String>>,
    verbose: bool,
    stats: Arc<StatsTracker>,
}

impl std::fmt::Debug for EventBridgeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridgeProcessor")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("event_bus", &self.event_bus)
            .field("rule_arn", &self.rule_arn)
            .field("subjects", &self.subjects)
            .finish_non_exhaustive()
    }
}

impl EventBridgeProcessor {
    /// Validate `cfg`, verify the rule exists on the bus, and start pushing
    /// stats to `receiver` until `ctx` is cancelled.
    ///
    /// Empty configuration fields fail before any request is made.
    pub async fn new(
        ctx: &CancellationToken,
        cfg: &EventBridgeConfig,
        receiver: Arc<dyn Receiver>,
        options: ProcessorOptions,
    ) -> Result<Self> {
        cfg.validate()?;

        let AuthMethod::AwsAccessKey {
            access_key,
            secret_key,
        } = &cfg.auth;

        let endpoint = options
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://events.{}.amazonaws.com/", cfg.region));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| RouterError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let host = host_header(&endpoint)?;

        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let mut processor = Self {
            client,
            endpoint,
            host,
            region: cfg.region.clone(),
            event_bus: cfg.event_bus.clone(),
            rule_arn: cfg.rule_arn.clone(),
            access_key: access_key.clone(),
            secret_key: secret_key.clone(),
            subjects: None,
            verbose: options.verbose,
            stats: Arc::new(StatsTracker::new(EventStats::new(
                PROCESSOR_NAME,
                EndpointType::Processor,
                cfg.rule_arn.clone(),
            ))),
        };

        let rule = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(RouterError::Config("cancelled while verifying EventBridge rule".to_string()));
            }
            rule = processor.find_rule() => rule?,
        };

        processor.subjects = subject_filter(rule.event_pattern.as_deref());
        info!(
            event_bus = %processor.event_bus,
            rule = rule.name.as_deref().unwrap_or_default(),
            subjects = ?processor.subjects,
            "connected to AWS EventBridge"
        );

        spawn_stats_push(
            ctx.clone(),
            processor.stats.clone(),
            receiver,
            options.push_interval,
        );

        Ok(processor)
    }

    pub fn stats(&self) -> EventStats {
        self.stats.snapshot()
    }

    /// Subjects forwarded by this processor, or `None` when all are.
    pub fn subjects(&self) -> Option<&HashSet<String>> {
        self.subjects.as_ref()
    }

    async fn find_rule(&self) -> Result<Rule> {
        let mut next_token: Option<String> = None;
        loop {
            let request = ListRulesRequest {
                event_bus_name: &self.event_bus,
                next_token: next_token.as_deref(),
            };
            let response: ListRulesResponse = self.call("ListRules", &request).await?;

            if let Some(rule) = response.rules.into_iter().find(|r| r.arn == self.rule_arn) {
                return Ok(rule);
            }

            match response.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => {
                    return Err(RouterError::Config(format!(
                        "rule {} not found on event bus {}",
                        self.rule_arn, self.event_bus
                    )))
                }
            }
        }
    }

    async fn call<B, T>(&self, operation: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let now = Utc::now();

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), AMZ_JSON.to_string());
        headers.insert("host".to_string(), self.host.clone());
        headers.insert(
            "x-amz-date".to_string(),
            now.format("%Y%m%dT%H%M%SZ").to_string(),
        );
        headers.insert(
            "x-amz-target".to_string(),
            format!("AWSEvents.{}", operation),
        );

        let signed = sigv4::sign(
            &SignableRequest {
                method: "POST",
                path: self.endpoint.path(),
                query: "",
                headers: headers.clone(),
                payload: &payload,
            },
            &Credentials {
                access_key: &self.access_key,
                secret_key: &self.secret_key,
            },
            &self.region,
            SERVICE,
            now,
        )?;

        if self.verbose {
            info!(operation, body = %String::from_utf8_lossy(&payload), "sending EventBridge request");
        }

        let mut request = self.client.post(self.endpoint.clone());
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .header("authorization", signed.authorization)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if self.verbose {
            info!(operation, %status, body = %text, "received EventBridge response");
        }
        if !status.is_success() {
            return Err(api_error(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Processor for EventBridgeProcessor {
    async fn process(&self, envelope: Envelope) -> Result<()> {
        if let Some(subjects) = &self.subjects {
            if !subjects.contains(&envelope.subject) {
                debug!(subject = %envelope.subject, id = %envelope.id, "subject not matched by rule, skipping");
                return Ok(());
            }
        }

        let detail = envelope.to_json()?;
        let request = PutEventsRequest {
            entries: vec![PutEventsEntry {
                source: &envelope.source,
                detail_type: &envelope.subject,
                detail,
                event_bus_name: &self.event_bus,
                time: envelope.time.timestamp(),
            }],
        };

        let started = Instant::now();
        let response: PutEventsResponse = match self.call("PutEvents", &request).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_error();
                return Err(e);
            }
        };

        if response.failed_entry_count > 0 {
            self.stats.record_error();
            let reason = response
                .entries
                .into_iter()
                .find_map(|entry| {
                    entry.error_code.map(|code| {
                        format!("{}: {}", code, entry.error_message.unwrap_or_default())
                    })
                })
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(RouterError::Delivery(format!(
                "EventBridge rejected event {}: {}",
                envelope.id, reason
            )));
        }

        self.stats.record_success(&envelope.subject);
        debug!(
            id = %envelope.id,
            subject = %envelope.subject,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "delivered event to EventBridge"
        );
        Ok(())
    }
}
