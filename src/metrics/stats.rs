//! Statistics records handed to metrics receivers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Which side of the router an endpoint sits on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    Provider,
    Processor,
}

/// Point-in-time statistics for one provider or processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventStats {
    #[serde(skip)]
    pub provider: String,
    #[serde(rename = "type")]
    pub provider_type: EndpointType,
    pub address: String,
    pub started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_err: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_per_sec: Option<f64>,
    /// Successful deliveries per event subject.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub invocations: BTreeMap<String, u64>,
}

impl EventStats {
    pub fn new(provider: impl Into<String>, provider_type: EndpointType, address: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            provider_type,
            address: address.into(),
            started: Utc::now(),
            events_total: Some(0),
            events_err: Some(0),
            events_per_sec: None,
            invocations: BTreeMap::new(),
        }
    }
}

/// Thread-safe accumulator that hands out [`EventStats`] snapshots.
#[derive(Debug)]
pub struct StatsTracker {
    inner: Mutex<EventStats>,
}

impl StatsTracker {
    pub fn new(stats: EventStats) -> Self {
        Self {
            inner: Mutex::new(stats),
        }
    }

    /// Count `n` events seen without attributing them to a subject.
    pub fn record_events(&self, n: u64) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *stats.events_total.get_or_insert(0) += n;
    }

    pub fn record_success(&self, subject: &str) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *stats.events_total.get_or_insert(0) += 1;
        *stats.invocations.entry(subject.to_string()).or_insert(0) += 1;
    }

    pub fn record_error(&self) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *stats.events_total.get_or_insert(0) += 1;
        *stats.events_err.get_or_insert(0) += 1;
    }

    /// Errors that are not tied to a single event, e.g. a failed poll.
    pub fn record_failure(&self) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *stats.events_err.get_or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> EventStats {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> EventStats {
        let mut stats = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let elapsed = (now - stats.started).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 {
            stats.events_per_sec = stats.events_total.map(|total| total as f64 / elapsed);
        }
        stats
    }
}
