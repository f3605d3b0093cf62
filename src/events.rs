//! vSphere events and their conversion into CloudEvent envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::envelope::{Envelope, CONTENT_TYPE_JSON, SPEC_VERSION};

/// CloudEvent `type` attribute shared by every routed event. Consumers select on
/// `subject` for the concrete event class.
pub const EVENT_CANONICAL_TYPE: &str = "com.vmware.event.router/event";

/// Classes whose concrete type lives in `event_type_id` rather than the class name.
const EXTENDED_EVENT_CLASSES: [&str; 2] = ["EventEx", "ExtendedEvent"];

/// A raw event as reported by the vCenter event history.
///
/// `key` increases monotonically with the time the event was recorded.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VsphereEvent {
    pub key: i32,
    pub chain_id: i32,
    pub created_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_formatted_message: Option<String>,
    /// Event class, e.g. `VmPoweredOnEvent`.
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type_id: Option<String>,
    /// Remaining class-specific fields.
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl VsphereEvent {
    pub fn new(key: i32, class: impl Into<String>, created_time: DateTime<Utc>) -> Self {
        Self {
            key,
            chain_id: key,
            created_time,
            user_name: None,
            full_formatted_message: None,
            class: class.into(),
            event_type_id: None,
            data: serde_json::Map::new(),
        }
    }

    pub fn with_event_type_id(mut self, event_type_id: impl Into<String>) -> Self {
        self.event_type_id = Some(event_type_id.into());
        self
    }

    fn is_extended(&self) -> bool {
        EXTENDED_EVENT_CLASSES.contains(&self.class.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("event source must not be empty")]
    EmptySource,

    #[error("event {key} has no event class")]
    MissingClass { key: i32 },

    #[error("extended event {key} of class {class} has no event type id")]
    MissingEventTypeId { key: i32, class: String },

    #[error("could not encode event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Converts a vSphere event into a CloudEvent envelope originating from `source`.
///
/// The envelope id is derived from the source and the event identity, so the
/// same input always yields the same envelope.
pub fn new_cloud_event(event: &VsphereEvent, source: &str) -> Result<Envelope, ConversionError> {
    if source.is_empty() {
        return Err(ConversionError::EmptySource);
    }
    if event.class.is_empty() {
        return Err(ConversionError::MissingClass { key: event.key });
    }

    let subject = if event.is_extended() {
        match event.event_type_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(ConversionError::MissingEventTypeId {
                    key: event.key,
                    class: event.class.clone(),
                })
            }
        }
    } else {
        event.class.clone()
    };

    let data = serde_json::to_value(event)?;

    Ok(Envelope {
        spec_version: SPEC_VERSION.to_string(),
        id: envelope_id(event, source).to_string(),
        source: source.to_string(),
        event_type: EVENT_CANONICAL_TYPE.to_string(),
        subject,
        time: event.created_time,
        data_content_type: CONTENT_TYPE_JSON.to_string(),
        data,
    })
}

fn envelope_id(event: &VsphereEvent, source: &str) -> Uuid {
    let name = format!(
        "{}/{}/{}/{}",
        source,
        event.chain_id,
        event.key,
        event.created_time.to_rfc3339()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SOURCE: &str = "https://vc01.example.com/sdk";

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_regular_event_uses_class_as_subject() {
        let mut event = VsphereEvent::new(42, "VmPoweredOnEvent", created());
        event.user_name = Some("VSPHERE.LOCAL\\admin".to_string());

        let ce = new_cloud_event(&event, SOURCE).unwrap();

        assert_eq!(ce.subject, "VmPoweredOnEvent");
        assert_eq!(ce.source, SOURCE);
        assert_eq!(ce.event_type, EVENT_CANONICAL_TYPE);
        assert_eq!(ce.time, created());
        assert_eq!(ce.data["key"], 42);
        assert_eq!(ce.data["userName"], "VSPHERE.LOCAL\\admin");
    }

    #[test]
    fn test_extended_event_uses_event_type_id() {
        let event = VsphereEvent::new(7, "EventEx", created())
            .with_event_type_id("com.vmware.vc.VmDiskConsolidatedEvent");

        let ce = new_cloud_event(&event, SOURCE).unwrap();

        assert_eq!(ce.subject, "com.vmware.vc.VmDiskConsolidatedEvent");
    }

    #[test]
    fn test_extended_event_without_type_id_fails() {
        let event = VsphereEvent::new(7, "ExtendedEvent", created());

        let err = new_cloud_event(&event, SOURCE).unwrap_err();
        assert!(matches!(err, ConversionError::MissingEventTypeId { key: 7, .. }));
    }

    #[test]
    fn test_missing_class_and_source_fail() {
        let event = VsphereEvent::new(1, "", created());
        assert!(matches!(
            new_cloud_event(&event, SOURCE),
            Err(ConversionError::MissingClass { key: 1 })
        ));

        let event = VsphereEvent::new(1, "VmCreatedEvent", created());
        assert!(matches!(
            new_cloud_event(&event, ""),
            Err(ConversionError::EmptySource)
        ));
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let event = VsphereEvent::new(3, "VmMigratedEvent", created());

        let first = new_cloud_event(&event, SOURCE).unwrap();
        let second = new_cloud_event(&event, SOURCE).unwrap();
        assert_eq!(first, second);

        let other = VsphereEvent::new(4, "VmMigratedEvent", created());
        assert_ne!(first.id, new_cloud_event(&other, SOURCE).unwrap().id);
    }

    #[test]
    fn test_ids_differ_by_time_outside_nanosecond_range() {
        let early = Utc.with_ymd_and_hms(1500, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();

        let first = new_cloud_event(&VsphereEvent::new(9, "VmCreatedEvent", early), SOURCE).unwrap();
        let second = new_cloud_event(&VsphereEvent::new(9, "VmCreatedEvent", late), SOURCE).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.time, early);
    }

    #[test]
    fn test_class_specific_fields_round_trip_flattened() {
        let raw = json!({
            "key": 9,
            "chainId": 8,
            "createdTime": "2020-06-01T12:00:00Z",
            "class": "VmRenamedEvent",
            "oldName": "a",
            "newName": "b"
        });
        let event: VsphereEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.data["oldName"], "a");

        let ce = new_cloud_event(&event, SOURCE).unwrap();
        assert_eq!(ce.data["newName"], "b");
        assert_eq!(ce.data["chainId"], 8);
    }
}
