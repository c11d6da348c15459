//! Connection parameters from the WebSocket upgrade query string

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RelayError;

/// Largest drop probability a listener may request
pub const MAX_DROP_RATE: f64 = 0.5;

/// Which side of a stream room a connection is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Broadcaster,
    Listener,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Broadcaster => f.write_str("broadcaster"),
            Role::Listener => f.write_str("listener"),
        }
    }
}

/// Query parameters exactly as received
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConnectParams {
    pub role: Option<String>,
    pub stream_id: Option<String>,
    pub drop_rate: Option<String>,
    pub max_kbps: Option<String>,
}

/// Validated connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub role: Role,
    pub stream_id: u32,
    /// Per-frame drop probability, within `[0, MAX_DROP_RATE]`
    pub drop_rate: f64,
    /// Sustained bitrate cap; `None` means uncapped
    pub max_kbps: Option<u32>,
}

impl ConnectParams {
    pub fn broadcaster(stream_id: u32) -> Self {
        Self {
            role: Role::Broadcaster,
            stream_id,
            drop_rate: 0.0,
            max_kbps: None,
        }
    }

    pub fn listener(stream_id: u32) -> Self {
        Self {
            role: Role::Listener,
            ..Self::broadcaster(stream_id)
        }
    }

    pub fn with_drop_rate(mut self, drop_rate: f64) -> Self {
        self.drop_rate = clamp_drop_rate(drop_rate);
        self
    }

    pub fn with_max_kbps(mut self, max_kbps: u32) -> Self {
        self.max_kbps = (max_kbps > 0).then_some(max_kbps);
        self
    }

    /// Render as a query string (without the leading `?`)
    pub fn to_query(&self) -> String {
        let mut query = format!("role={}&streamId={}", self.role, self.stream_id);
        if self.drop_rate > 0.0 {
            query.push_str(&format!("&dropRate={}", self.drop_rate));
        }
        if let Some(kbps) = self.max_kbps {
            query.push_str(&format!("&maxKbps={}", kbps));
        }
        query
    }
}

impl TryFrom<RawConnectParams> for ConnectParams {
    type Error = RelayError;

    fn try_from(raw: RawConnectParams) -> Result<Self, Self::Error> {
        let role = match raw.role.as_deref() {
            Some("broadcaster") => Role::Broadcaster,
            Some("listener") => Role::Listener,
            Some(other) => {
                return Err(RelayError::InvalidParams(format!("unknown role '{}'", other)))
            }
            None => return Err(RelayError::InvalidParams("missing role".into())),
        };

        let stream_id = raw
            .stream_id
            .as_deref()
            .ok_or_else(|| RelayError::InvalidParams("missing streamId".into()))?
            .trim()
            .parse::<u32>()
            .map_err(|e| RelayError::InvalidParams(format!("streamId: {}", e)))?;

        let drop_rate = match raw.drop_rate.as_deref().map(str::trim) {
            None | Some("") => 0.0,
            Some(v) => v
                .parse::<f64>()
                .map(clamp_drop_rate)
                .map_err(|e| RelayError::InvalidParams(format!("dropRate: {}", e)))?,
        };

        let max_kbps = match raw.max_kbps.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(v) => {
                let kbps = v
                    .parse::<u32>()
                    .map_err(|e| RelayError::InvalidParams(format!("maxKbps: {}", e)))?;
                (kbps > 0).then_some(kbps)
            }
        };

        Ok(Self {
            role,
            stream_id,
            drop_rate,
            max_kbps,
        })
    }
}

fn clamp_drop_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, MAX_DROP_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(role: &str, stream: &str, drop: Option<&str>, kbps: Option<&str>) -> RawConnectParams {
        RawConnectParams {
            role: Some(role.into()),
            stream_id: Some(stream.into()),
            drop_rate: drop.map(Into::into),
            max_kbps: kbps.map(Into::into),
        }
    }

    #[test]
    fn test_parses_listener_with_impairment() {
        let params = ConnectParams::try_from(raw("listener", "12", Some("0.3"), Some("64"))).unwrap();
        assert_eq!(params.role, Role::Listener);
        assert_eq!(params.stream_id, 12);
        assert!((params.drop_rate - 0.3).abs() < f64::EPSILON);
        assert_eq!(params.max_kbps, Some(64));
    }

    #[test]
    fn test_clamps_drop_rate() {
        let high = ConnectParams::try_from(raw("listener", "1", Some("0.9"), None)).unwrap();
        assert_eq!(high.drop_rate, MAX_DROP_RATE);

        let low = ConnectParams::try_from(raw("listener", "1", Some("-2"), None)).unwrap();
        assert_eq!(low.drop_rate, 0.0);

        let nan = ConnectParams::try_from(raw("listener", "1", Some("NaN"), None)).unwrap();
        assert_eq!(nan.drop_rate, 0.0);
    }

    #[test]
    fn test_rejects_bad_role_and_stream() {
        assert!(ConnectParams::try_from(raw("dj", "1", None, None)).is_err());
        assert!(ConnectParams::try_from(raw("listener", "abc", None, None)).is_err());
        assert!(ConnectParams::try_from(RawConnectParams::default()).is_err());
    }

    #[test]
    fn test_query_roundtrip() {
        let params = ConnectParams::listener(5).with_drop_rate(0.25).with_max_kbps(96);
        assert_eq!(params.to_query(), "role=listener&streamId=5&dropRate=0.25&maxKbps=96");
        assert_eq!(ConnectParams::broadcaster(5).to_query(), "role=broadcaster&streamId=5");
    }
}
