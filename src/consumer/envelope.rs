//! Wire types for the transport envelope and the inner check-in payload.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
}

/// A check-in as wrapped by the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckInMessage {
    /// The inner check-in payload, JSON-encoded.
    pub payload: String,
    /// Event time as fractional epoch seconds.
    pub start_time: f64,
    pub project_id: String,
    #[serde(default)]
    pub sdk: Option<String>,
}

impl CheckInMessage {
    /// SDK platform with the version stripped, to bound metric cardinality.
    pub fn sdk_platform(&self) -> &str {
        match self.sdk.as_deref() {
            Some(sdk) if !sdk.is_empty() => sdk.split('/').next().unwrap_or("none"),
            _ => "none",
        }
    }
}

#[derive(Debug)]
pub enum Envelope {
    CheckIn(Box<CheckInMessage>),
    ClockPulse,
}

#[derive(Debug, Deserialize)]
struct EnvelopeTag {
    #[serde(default)]
    message_type: Option<String>,
}

/// Classifies and decodes one transport message. Messages from producers
/// that predate the type tag carry no `message_type` and are check-ins.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let tag: EnvelopeTag = serde_json::from_slice(bytes)?;
    match tag.message_type.as_deref() {
        None | Some("check_in") => Ok(Envelope::CheckIn(Box::new(serde_json::from_slice(bytes)?))),
        Some("clock_pulse") => Ok(Envelope::ClockPulse),
        Some(other) => Err(DecodeError::UnknownMessageType(other.to_string())),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInPayload {
    pub check_in_id: String,
    pub monitor_slug: String,
    pub status: String,
    #[serde(default)]
    pub environment: Option<String>,
    /// Fractional seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub monitor_config: Option<serde_json::Value>,
    #[serde(default)]
    pub contexts: Option<CheckInContexts>,
}

impl CheckInPayload {
    pub fn trace_id(&self) -> Option<&str> {
        self.contexts
            .as_ref()?
            .trace
            .as_ref()
            .map(|t| t.trace_id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInContexts {
    #[serde(default)]
    pub trace: Option<TraceContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_envelope_is_a_check_in() {
        let raw = br#"{"payload": "{}", "start_time": 1709290800.5, "project_id": "7", "sdk": "rust/1.0"}"#;
        match decode(raw).unwrap() {
            Envelope::CheckIn(message) => {
                assert_eq!(message.project_id, "7");
                assert_eq!(message.sdk_platform(), "rust");
            }
            other => panic!("expected check-in, got {other:?}"),
        }
    }

    #[test]
    fn test_clock_pulse_envelope() {
        let raw = br#"{"message_type": "clock_pulse"}"#;
        assert!(matches!(decode(raw).unwrap(), Envelope::ClockPulse));
    }

    #[test]
    fn test_explicit_check_in_tag() {
        let raw = br#"{"message_type": "check_in", "payload": "{}", "start_time": 1.0, "project_id": "7", "sdk": "python/2.1"}"#;
        assert!(matches!(decode(raw).unwrap(), Envelope::CheckIn(_)));
    }

    #[test]
    fn test_unknown_message_type() {
        let raw = br#"{"message_type": "heartbeat"}"#;
        assert!(matches!(decode(raw), Err(DecodeError::UnknownMessageType(_))));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_missing_sdk_platform_is_none() {
        let raw = br#"{"payload": "{}", "start_time": 1.0, "project_id": "7"}"#;
        match decode(raw).unwrap() {
            Envelope::CheckIn(message) => assert_eq!(message.sdk_platform(), "none"),
            other => panic!("expected check-in, got {other:?}"),
        }
    }

    #[test]
    fn test_payload_trace_context() {
        let payload: CheckInPayload = serde_json::from_str(
            r#"{
                "check_in_id": "00000000-0000-0000-0000-000000000000",
                "monitor_slug": "nightly-backup",
                "status": "ok",
                "duration": 12.5,
                "contexts": {"trace": {"trace_id": "4c79f60c11214eb38604f4ae0781bfb2"}}
            }"#,
        )
        .unwrap();

        assert_eq!(payload.trace_id(), Some("4c79f60c11214eb38604f4ae0781bfb2"));
        assert_eq!(payload.duration, Some(12.5));
        assert_eq!(payload.environment, None);
    }
}
