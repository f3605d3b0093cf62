//! Metrics for the router.
//!
//! Two paths exist side by side. The streaming loop records counters through the
//! `metrics` facade, exported by the Prometheus recorder installed in
//! [`init_metrics`]. Providers and processors additionally hand [`EventStats`]
//! snapshots to a [`Receiver`], which is fire-and-forget and never feeds back
//! into the delivery path.

pub mod stats;

pub use stats::{EndpointType, EventStats, StatsTracker};

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};

static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Every metric name used by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    EventsReceived,
    EventsConverted,
    ConversionErrors,
    EventsDelivered,
    DeliveryErrors,
    DeliveryDuration,
    BatchSize,
    StatsEventsTotal,
    StatsEventsErrors,
    StatsEventsPerSec,
    StatsInvocations,
}

impl MetricName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricName::EventsReceived => "router_events_received_total",
            MetricName::EventsConverted => "router_events_converted_total",
            MetricName::ConversionErrors => "router_conversion_errors_total",
            MetricName::EventsDelivered => "router_events_delivered_total",
            MetricName::DeliveryErrors => "router_delivery_errors_total",
            MetricName::DeliveryDuration => "router_delivery_duration_seconds",
            MetricName::BatchSize => "router_batch_size",
            MetricName::StatsEventsTotal => "router_stats_events_total",
            MetricName::StatsEventsErrors => "router_stats_events_errors",
            MetricName::StatsEventsPerSec => "router_stats_events_per_second",
            MetricName::StatsInvocations => "router_stats_invocations",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime. Idempotent: later calls after a
/// successful install are no-ops.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    if HANDLE.get().is_some() {
        return Ok(());
    }

    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| RouterError::Metrics(e.to_string()))?;
    let handle = recorder.handle();
    ::metrics::set_global_recorder(recorder)
        .map_err(|_| RouterError::Metrics("a metrics recorder is already installed".to_string()))?;
    let _ = HANDLE.set(handle);

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            warn!(error = ?e, "Prometheus exporter stopped");
        }
    });

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Receives statistics from providers and processors.
///
/// Calls never return an error and must not panic. Implementations own their
/// synchronization; they are invoked from whichever task pushes metrics.
pub trait Receiver: Send + Sync {
    fn receive(&self, stats: &EventStats);
}

/// Hand a snapshot of `stats` to `receiver` every `interval` until `ctx` is
/// cancelled.
///
/// `receive` is synchronous and may block, so it runs on the blocking pool. A
/// tick that arrives while the previous push is still running is skipped.
pub(crate) async fn push_stats(
    ctx: &CancellationToken,
    stats: &Arc<StatsTracker>,
    receiver: &Arc<dyn Receiver>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pending: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if let Some(push) = &pending {
            if !push.is_finished() {
                debug!("previous stats push still running, skipping tick");
                continue;
            }
        }

        let snapshot = stats.snapshot();
        let receiver = receiver.clone();
        pending = Some(tokio::task::spawn_blocking(move || receiver.receive(&snapshot)));
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReceiver;

impl Receiver for NoopReceiver {
    fn receive(&self, _stats: &EventStats) {}
}

/// Logs each record at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReceiver;

impl Receiver for LogReceiver {
    fn receive(&self, stats: &EventStats) {
        match serde_json::to_string(stats) {
            Ok(json) => debug!(endpoint = %stats.provider, stats = %json, "received stats"),
            Err(e) => debug!(endpoint = %stats.provider, error = %e, "could not encode stats"),
        }
    }
}

/// Mirrors received records into labelled Prometheus gauges.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusReceiver;

impl Receiver for PrometheusReceiver {
    fn receive(&self, stats: &EventStats) {
        let kind = match stats.provider_type {
            EndpointType::Provider => "provider",
            EndpointType::Processor => "processor",
        };

        if let Some(total) = stats.events_total {
            ::metrics::gauge!(MetricName::StatsEventsTotal.as_str(), "endpoint" => stats.provider.clone(), "type" => kind)
                .set(total as f64);
        }
        if let Some(errors) = stats.events_err {
            ::metrics::gauge!(MetricName::StatsEventsErrors.as_str(), "endpoint" => stats.provider.clone(), "type" => kind)
                .set(errors as f64);
        }
        if let Some(rate) = stats.events_per_sec {
            ::metrics::gauge!(MetricName::StatsEventsPerSec.as_str(), "endpoint" => stats.provider.clone(), "type" => kind)
                .set(rate);
        }
        for (subject, count) in &stats.invocations {
            ::metrics::gauge!(MetricName::StatsInvocations.as_str(), "endpoint" => stats.provider.clone(), "subject" => subject.clone())
                .set(*count as f64);
        }
    }
}

/// Counters recorded by the streaming loop.
pub mod stream {
    use super::MetricName;

    pub fn batch_received(size: usize) {
        ::metrics::counter!(MetricName::EventsReceived.as_str()).increment(size as u64);
        ::metrics::histogram!(MetricName::BatchSize.as_str()).record(size as f64);
    }

    pub fn event_converted() {
        ::metrics::counter!(MetricName::EventsConverted.as_str()).increment(1);
    }

    pub fn conversion_failed() {
        ::metrics::counter!(MetricName::ConversionErrors.as_str()).increment(1);
    }

    pub fn event_delivered(duration_secs: f64) {
        ::metrics::counter!(MetricName::EventsDelivered.as_str()).increment(1);
        ::metrics::histogram!(MetricName::DeliveryDuration.as_str()).record(duration_secs);
    }

    pub fn delivery_failed(duration_secs: f64) {
        ::metrics::counter!(MetricName::DeliveryErrors.as_str()).increment(1);
        ::metrics::histogram!(MetricName::DeliveryDuration.as_str()).record(duration_secs);
    }
}
