use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{AvailabilityWindow, Classification, DrmKeys, GeoRestrictions};

/// The only event type this plane consumes. Anything else is a permanent
/// decode failure.
pub const UPLOAD_COMPLETED_TYPE: &str = "media.uploaded";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed event json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported event type: {event_type}")]
    UnsupportedType { event_type: String },
    #[error("invalid event payload: {reason}")]
    InvalidPayload { reason: String },
}

pub type EventResult<T> = std::result::Result<T, EventError>;

/// Subscription push envelope. `data` is base64-encoded UTF-8 JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubEnvelope {
    pub data: String,
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
    /// 1-based; absent means first delivery.
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

impl PubSubEnvelope {
    pub fn attempt(&self) -> u32 {
        self.delivery_attempt.unwrap_or(1)
    }
}

/// Opaque subscription-side context. Logged, never interpreted.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub event_id: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    pub data: UploadPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub content_id: String,
    pub tenant_id: String,
    pub content_type: Classification,
    /// The uploader historically emitted `sourceGcsUri`; both spellings
    /// are accepted.
    #[serde(alias = "sourceGcsUri")]
    pub source_uri: String,
    pub checksum: String,
    pub duration_seconds: i64,
    pub ingest_region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drm: Option<DrmKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_window: Option<AvailabilityWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_restrictions: Option<GeoRestrictions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledgement: Option<serde_json::Value>,
}

/// Decodes a subscription envelope into an upload event, rejecting foreign
/// event types and non-positive durations.
pub fn decode_upload_event(envelope: &PubSubEnvelope) -> EventResult<UploadCompletedEvent> {
    let bytes = BASE64.decode(envelope.data.as_bytes())?;
    let text = String::from_utf8(bytes)?;
    let event: UploadCompletedEvent = serde_json::from_str(&text)?;
    if event.event_type != UPLOAD_COMPLETED_TYPE {
        return Err(EventError::UnsupportedType {
            event_type: event.event_type,
        });
    }
    if event.data.duration_seconds <= 0 {
        return Err(EventError::InvalidPayload {
            reason: format!(
                "durationSeconds must be positive, got {}",
                event.data.duration_seconds
            ),
        });
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_for(json: &str) -> PubSubEnvelope {
        PubSubEnvelope {
            data: BASE64.encode(json),
            message_id: "m1".into(),
            publish_time: None,
            delivery_attempt: None,
        }
    }

    #[test]
    fn decodes_upload_event() {
        let envelope = envelope_for(
            r#"{
                "eventId": "e1",
                "eventType": "media.uploaded",
                "version": "1",
                "occurredAt": "2026-07-01T12:00:00Z",
                "data": {
                    "contentId": "c1",
                    "tenantId": "t1",
                    "contentType": "reel",
                    "sourceUri": "gs://bucket/asset",
                    "checksum": "s1",
                    "durationSeconds": 10,
                    "ingestRegion": "us"
                },
                "somethingUnknown": true
            }"#,
        );
        let event = decode_upload_event(&envelope).unwrap();
        assert_eq!(event.event_id.as_deref(), Some("e1"));
        assert_eq!(event.data.content_id, "c1");
        assert_eq!(event.data.content_type, Classification::Reel);
        assert_eq!(event.data.source_uri, "gs://bucket/asset");
    }

    #[test]
    fn accepts_legacy_source_field() {
        let envelope = envelope_for(
            r#"{
                "eventType": "media.uploaded",
                "data": {
                    "contentId": "c1",
                    "tenantId": "t",
                    "contentType": "reel",
                    "sourceGcsUri": "gs://b/a",
                    "checksum": "s1",
                    "durationSeconds": 10,
                    "ingestRegion": "us"
                }
            }"#,
        );
        let event = decode_upload_event(&envelope).unwrap();
        assert_eq!(event.data.source_uri, "gs://b/a");
    }

    #[test]
    fn rejects_foreign_event_types() {
        let envelope = envelope_for(
            r#"{
                "eventType": "media.reuploaded",
                "data": {
                    "contentId": "c1",
                    "tenantId": "t",
                    "contentType": "reel",
                    "sourceUri": "gs://b/a",
                    "checksum": "s1",
                    "durationSeconds": 10,
                    "ingestRegion": "us"
                }
            }"#,
        );
        let err = decode_upload_event(&envelope).unwrap_err();
        assert!(matches!(err, EventError::UnsupportedType { event_type } if event_type == "media.reuploaded"));
    }

    #[test]
    fn rejects_non_positive_duration() {
        let envelope = envelope_for(
            r#"{
                "eventType": "media.uploaded",
                "data": {
                    "contentId": "c1",
                    "tenantId": "t",
                    "contentType": "series",
                    "sourceUri": "gs://b/a",
                    "checksum": "s1",
                    "durationSeconds": 0,
                    "ingestRegion": "us"
                }
            }"#,
        );
        assert!(matches!(
            decode_upload_event(&envelope),
            Err(EventError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn rejects_bad_base64_and_bad_json() {
        let mut envelope = envelope_for("{}");
        envelope.data = "!!not-base64!!".into();
        assert!(matches!(
            decode_upload_event(&envelope),
            Err(EventError::Base64(_))
        ));

        let envelope = envelope_for("{not json");
        assert!(matches!(
            decode_upload_event(&envelope),
            Err(EventError::Json(_))
        ));
    }

    #[test]
    fn attempt_defaults_to_one() {
        let envelope = envelope_for("{}");
        assert_eq!(envelope.attempt(), 1);
        let envelope = PubSubEnvelope {
            delivery_attempt: Some(4),
            ..envelope
        };
        assert_eq!(envelope.attempt(), 4);
    }

    #[test]
    fn recognized_fields_survive_round_trip() {
        let envelope = envelope_for(
            r#"{
                "eventId": "e1",
                "eventType": "media.uploaded",
                "occurredAt": "2026-07-01T12:00:00Z",
                "data": {
                    "contentId": "c1",
                    "tenantId": "t1",
                    "contentType": "series",
                    "sourceUri": "gs://bucket/asset",
                    "checksum": "s1",
                    "durationSeconds": 90,
                    "ingestRegion": "eu",
                    "drm": {"keyId": "k1", "licenseServer": "https://drm.example"},
                    "geoRestrictions": {"allow": ["BR", "PT"]}
                }
            }"#,
        );
        let event = decode_upload_event(&envelope).unwrap();
        let text = serde_json::to_string(&event).unwrap();
        let reparsed: UploadCompletedEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(event, reparsed);
    }
}
