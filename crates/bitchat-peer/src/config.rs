//! Configuration for the peer layer.

use std::time::Duration;

use bitchat_protocol::NodeId;
use bitchat_transport::{CHAT_CHARACTERISTIC, CHAT_SERVICE, CapabilityId};
use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

/// Timing and capability settings for a [`PeerManager`](crate::PeerManager).
///
/// Every field has a default, so a JSON config only needs the keys it
/// changes. Durations are written in milliseconds:
///
/// ```json
/// { "scan_interval_ms": 10000, "retry": { "max_attempts": 5, "delay_ms": 500 } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Pause between discovery sweeps.
    #[serde(rename = "scan_interval_ms", with = "millis")]
    pub scan_interval: Duration,

    /// How long a single sweep scans for.
    #[serde(rename = "scan_timeout_ms", with = "millis")]
    pub scan_timeout: Duration,

    /// Budget for opening a link, and separately for each validation step.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,

    /// Budget for a single write to one peer.
    #[serde(rename = "write_timeout_ms", with = "millis")]
    pub write_timeout: Duration,

    /// Budget for closing one link.
    #[serde(rename = "disconnect_timeout_ms", with = "millis")]
    pub disconnect_timeout: Duration,

    pub retry: RetryPolicy,

    /// Service a peer must advertise to be discovered.
    #[serde(with = "capability")]
    pub service: CapabilityId,

    /// Characteristic a peer must expose to pass validation.
    #[serde(with = "capability")]
    pub chat_characteristic: CapabilityId,

    /// Write an `Announce` packet with our nickname right after connecting.
    pub announce_on_connect: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(3),
            retry: RetryPolicy::default(),
            service: CHAT_SERVICE,
            chat_characteristic: CHAT_CHARACTERISTIC,
            announce_on_connect: true,
        }
    }
}

impl PeerConfig {
    /// Clamps values that would stall the manager.
    ///
    /// A zero scan interval would spin the discovery loop and zero attempts
    /// would never connect, so both are raised to their minimum.
    pub fn validated(mut self) -> Self {
        if self.scan_interval.is_zero() {
            tracing::warn!("scan_interval of 0 would busy-loop; using 1s");
            self.scan_interval = Duration::from_secs(1);
        }
        if self.retry.max_attempts == 0 {
            tracing::warn!("retry.max_attempts of 0 never connects; using 1");
            self.retry.max_attempts = 1;
        }
        self
    }
}

/// Who this node is to its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Stamped as the sender of every outgoing packet.
    pub node_id: NodeId,
    /// Carried in `Announce` packets.
    pub nickname: String,
}

impl LocalIdentity {
    pub fn new(node_id: NodeId, nickname: impl Into<String>) -> Self {
        Self {
            node_id,
            nickname: nickname.into(),
        }
    }
}

/// `Duration` as an integer number of milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `CapabilityId` as its UUID string.
mod capability {
    use bitchat_transport::CapabilityId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &CapabilityId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<CapabilityId, D::Error> {
        String::deserialize(deserializer).map(CapabilityId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_chat_uuids() {
        let config = PeerConfig::default();

        assert_eq!(config.service, CHAT_SERVICE);
        assert_eq!(config.chat_characteristic, CHAT_CHARACTERISTIC);
        assert!(config.announce_on_connect);
    }

    #[test]
    fn test_deserialize_partial_json_keeps_defaults() {
        let config: PeerConfig = serde_json::from_str(
            r#"{ "scan_interval_ms": 250, "retry": { "max_attempts": 5, "delay_ms": 10 } }"#,
        )
        .unwrap();

        assert_eq!(config.scan_interval, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.connect_timeout, PeerConfig::default().connect_timeout);
    }

    #[test]
    fn test_deserialize_normalises_uuid_case() {
        let config: PeerConfig = serde_json::from_str(
            r#"{ "chat_characteristic": "a1b2c3d4-e5f6-4a5b-8c9d-0e1f2a3b4c5d" }"#,
        )
        .unwrap();

        assert_eq!(config.chat_characteristic, CHAT_CHARACTERISTIC);
    }

    #[test]
    fn test_serialize_round_trips() {
        let config = PeerConfig::default();

        let json = serde_json::to_string(&config).unwrap();

        assert!(json.contains("\"write_timeout_ms\":5000"));
        assert_eq!(serde_json::from_str::<PeerConfig>(&json).unwrap(), config);
    }

    #[test]
    fn test_validated_clamps_zero_values() {
        let mut config = PeerConfig::default();
        config.scan_interval = Duration::ZERO;
        config.retry.max_attempts = 0;

        let config = config.validated();

        assert_eq!(config.scan_interval, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 1);
    }
}
