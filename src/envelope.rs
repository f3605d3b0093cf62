use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SPEC_VERSION: &str = "1.0";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Normalized, source-agnostic record of one event in CloudEvents 1.0
/// structured form.
///
/// Downstream consumers key on `event_type` and `subject`, so the serialized
/// field names are part of the wire contract.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    #[serde(rename = "specversion")]
    pub spec_version: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "datacontenttype")]
    pub data_content_type: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
