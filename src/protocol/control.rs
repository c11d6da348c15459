//! Text side-channel messages
//!
//! The only text message the relay carries is the end-of-stream notice
//! the playout engine uses to start its fade.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Control messages sent as WebSocket text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// The producer will stop in `countdown` seconds
    StreamEnding { countdown: u32 },
}

impl ControlMessage {
    /// Parse a text message
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidControl(e.to_string()))
    }

    /// Serialize to the JSON text form
    pub fn to_text(&self) -> String {
        match self {
            Self::StreamEnding { countdown } => {
                format!(r#"{{"type":"stream_ending","countdown":{}}}"#, countdown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_ending() {
        let msg = ControlMessage::parse(r#"{"type":"stream_ending","countdown":5}"#).unwrap();
        assert_eq!(msg, ControlMessage::StreamEnding { countdown: 5 });
        assert_eq!(ControlMessage::parse(&msg.to_text()).unwrap(), msg);
    }

    #[test]
    fn test_rejects_other_text() {
        assert!(ControlMessage::parse("hello").is_err());
        assert!(ControlMessage::parse(r#"{"type":"chat","text":"hi"}"#).is_err());
    }
}
