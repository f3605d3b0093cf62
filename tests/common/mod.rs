#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use event_router::config::{AuthMethod, EventBridgeConfig};
use event_router::{Envelope, EventStats, Processor, Receiver, Result, RouterError, VsphereEvent};

pub const RULE_ARN: &str = "arn:aws:events:us-west-1:123456789012:rule/vmware-event-router";
pub const BAD_ACCESS_KEY: &str = "AKIDREJECTED";

pub fn event(key: i32, class: &str) -> VsphereEvent {
    VsphereEvent::new(
        key,
        class,
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(key as i64),
    )
}

pub fn event_bridge_config(access_key: &str) -> EventBridgeConfig {
    EventBridgeConfig {
        event_bus: "default".to_string(),
        region: "us-west-1".to_string(),
        rule_arn: RULE_ARN.to_string(),
        auth: AuthMethod::AwsAccessKey {
            access_key: access_key.to_string(),
            secret_key: "test-secret".to_string(),
        },
    }
}

/// Serve `app` on an ephemeral local port.
pub fn serve(app: Router) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);
    addr
}

/// Records everything it is handed; fails for `fail_subject`.
#[derive(Default)]
pub struct RecordingProcessor {
    pub seen: Mutex<Vec<Envelope>>,
    pub fail_subject: Option<String>,
}

impl RecordingProcessor {
    pub fn keys(&self) -> Vec<i64> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.data["key"].as_i64().unwrap())
            .collect()
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, envelope: Envelope) -> Result<()> {
        let failed = self.fail_subject.as_deref() == Some(envelope.subject.as_str());
        self.seen.lock().unwrap().push(envelope);
        if failed {
            return Err(RouterError::Delivery("sink unavailable".to_string()));
        }
        Ok(())
    }
}

/// Counts records it receives.
#[derive(Default)]
pub struct CountingReceiver {
    pub received: Mutex<Vec<EventStats>>,
}

impl Receiver for CountingReceiver {
    fn receive(&self, stats: &EventStats) {
        self.received.lock().unwrap().push(stats.clone());
    }
}

/// Blocks the calling thread for `delay` on every record.
pub struct SlowReceiver {
    pub delay: std::time::Duration,
    pub received: Mutex<usize>,
}

impl SlowReceiver {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            received: Mutex::new(0),
        }
    }
}

impl Receiver for SlowReceiver {
    fn receive(&self, _stats: &EventStats) {
        std::thread::sleep(self.delay);
        *self.received.lock().unwrap() += 1;
    }
}

/// In-process stand-in for the EventBridge JSON API.
#[derive(Clone, Default)]
pub struct MockEventBridge {
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
    pub put_entries: Arc<Mutex<Vec<Value>>>,
    pub event_pattern: Arc<Mutex<Option<String>>>,
    pub reject_subject: Arc<Mutex<Option<String>>>,
}

impl MockEventBridge {
    pub fn start(self) -> String {
        let app = Router::new()
            .route("/", post(event_bridge_handler))
            .with_state(self);
        format!("http://{}/", serve(app))
    }

    pub fn operations(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(op, _)| op.clone()).collect()
    }
}

async fn event_bridge_handler(
    State(mock): State<MockEventBridge>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !authorization.starts_with("AWS4-HMAC-SHA256 Credential=") || headers.get("x-amz-date").is_none() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"__type": "MissingAuthenticationTokenException", "message": "unsigned"})),
        );
    }
    if authorization.contains(BAD_ACCESS_KEY) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "__type": "UnrecognizedClientException",
                "message": "The security token included in the request is invalid."
            })),
        );
    }

    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim_start_matches("AWSEvents.")
        .to_string();
    let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    mock.calls.lock().unwrap().push((target.clone(), request.clone()));

    match target.as_str() {
        "ListRules" => {
            let pattern = mock.event_pattern.lock().unwrap().clone();
            // two pages, the configured rule on the second
            if request.get("NextToken").is_none() {
                (
                    StatusCode::OK,
                    Json(json!({
                        "Rules": [{"Arn": "arn:aws:events:us-west-1:123456789012:rule/other", "Name": "other"}],
                        "NextToken": "page-2"
                    })),
                )
            } else {
                (
                    StatusCode::OK,
                    Json(json!({
                        "Rules": [{"Arn": RULE_ARN, "Name": "vmware-event-router", "EventPattern": pattern}]
                    })),
                )
            }
        }
        "PutEvents" => {
            let entries = request["Entries"].as_array().cloned().unwrap_or_default();
            let reject = mock.reject_subject.lock().unwrap().clone();
            let mut failed = 0;
            let mut results = Vec::new();
            for entry in entries {
                if reject.as_deref() == entry["DetailType"].as_str() {
                    failed += 1;
                    results.push(json!({"ErrorCode": "InternalFailure", "ErrorMessage": "try again"}));
                } else {
                    results.push(json!({"EventId": format!("id-{}", results.len())}));
                    mock.put_entries.lock().unwrap().push(entry);
                }
            }
            (
                StatusCode::OK,
                Json(json!({"FailedEntryCount": failed, "Entries": results})),
            )
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"__type": "UnknownOperationException", "message": target})),
        ),
    }
}

/// In-process stand-in for a vCenter event history endpoint. Pages are served
/// in the queued order; once drained it answers with an empty page.
#[derive(Clone, Default)]
pub struct MockEventHistory {
    pub pages: Arc<Mutex<VecDeque<Vec<VsphereEvent>>>>,
    pub requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl MockEventHistory {
    pub fn start(self) -> String {
        let app = Router::new()
            .route("/api/events", get(event_history_handler))
            .with_state(self);
        format!("http://{}/api/events", serve(app))
    }
}

async fn event_history_handler(
    State(mock): State<MockEventHistory>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<VsphereEvent>> {
    mock.requests.lock().unwrap().push(params);
    let page = mock.pages.lock().unwrap().pop_front().unwrap_or_default();
    Json(page)
}
