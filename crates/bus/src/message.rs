use crate::{Approach, Aspect};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("payload could not be encoded: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(msg)?)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    if payload.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Value pair keyed by approach, serialized as `{"A": .., "B": ..}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerApproach<T> {
    #[serde(rename = "A")]
    pub a: T,
    #[serde(rename = "B")]
    pub b: T,
}

impl<T: Copy> PerApproach<T> {
    pub fn from_array(values: [T; 2]) -> Self {
        Self {
            a: values[0],
            b: values[1],
        }
    }

    pub fn get(&self, approach: Approach) -> T {
        match approach {
            Approach::A => self.a,
            Approach::B => self.b,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseLabel {
    AGreen,
    BGreen,
    Switching,
    Emergency,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModeLabel {
    Normal,
    Emergency,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalMessage {
    pub ts_ms: u64,
    #[serde(default)]
    pub detector: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyMessage {
    pub ts_ms: u64,
    /// Explicit clear of an active emergency.
    #[serde(default)]
    pub resolved: bool,
}

/// Operational snapshot published on `signal/state`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    pub seq: u64,
    pub ts_ms: u64,
    pub phase: PhaseLabel,
    pub mode: ModeLabel,
    pub lamps: PerApproach<Aspect>,
    pub queue: PerApproach<u32>,
    pub elapsed_ms: u64,
    pub remaining_ms: Option<u64>,
    pub extensions: u32,
    pub emergency_remaining_ms: Option<u64>,
    pub buzzer: bool,
    pub fail_safe: bool,
}

/// Liveness heartbeat published on `signal/status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub ts_ms: u64,
    pub team: String,
    pub uptime_ms: u64,
    pub online: bool,
    pub mode: ModeLabel,
    pub transitions: u64,
    pub dropped_events: u64,
    pub fail_safe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_without_resolved_field_is_a_detect() {
        let m: EmergencyMessage = decode(br#"{"ts_ms":12}"#).unwrap();
        assert_eq!(
            m,
            EmergencyMessage {
                ts_ms: 12,
                resolved: false
            }
        );
    }

    #[test]
    fn empty_and_garbage_payloads_are_rejected() {
        assert!(matches!(
            decode::<ArrivalMessage>(b"  "),
            Err(DecodeError::Empty)
        ));
        assert!(matches!(
            decode::<ArrivalMessage>(b"{not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn state_uses_screaming_labels() {
        let msg = StateMessage {
            seq: 1,
            ts_ms: 0,
            phase: PhaseLabel::AGreen,
            mode: ModeLabel::Normal,
            lamps: PerApproach {
                a: Aspect::Green,
                b: Aspect::Red,
            },
            queue: PerApproach { a: 2, b: 0 },
            elapsed_ms: 0,
            remaining_ms: Some(5000),
            extensions: 0,
            emergency_remaining_ms: None,
            buzzer: false,
            fail_safe: false,
        };
        let text = String::from_utf8(encode(&msg).unwrap()).unwrap();
        assert!(text.contains(r#""phase":"A_GREEN""#));
        assert!(text.contains(r#""lamps":{"A":"GREEN","B":"RED"}"#));
        assert!(text.contains(r#""queue":{"A":2,"B":0}"#));
    }
}
