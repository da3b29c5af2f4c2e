//! Streaming wire protocol
//!
//! JSON frames exchanged on a session stream. Inbound frames come from the
//! equipment gateway and observer consoles; outbound events are broadcast
//! to every connection on the session, or sent directly as replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use testlane_core::{AlertRecord, Measurement, TestType};

use crate::session::SessionSnapshot;

/// A frame received from a streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Client-initiated liveness probe; answered with a `pong` event
    Ping,

    /// Reply to a server `ping`
    Pong,

    /// A raw measurement frame for the named test type
    TestData { test_type: String, data: Value },

    /// Status query; answered with a `session_status` event. The carried
    /// string is the status the client last saw and is informational only.
    StatusUpdate { status: String },
}

/// An event sent to streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server-initiated liveness probe; clients answer with a `pong` frame
    Ping,

    /// Reply to a client `ping`
    Pong,

    /// First event on every new connection
    ConnectionEstablished {
        client_id: String,
        session_id: String,
    },

    /// An accepted measurement, fanned out to the whole session
    TestData {
        test_type: TestType,
        data: Measurement,
        timestamp: DateTime<Utc>,
    },

    /// A warning alert attached to the session
    Alert {
        #[serde(flatten)]
        alert: AlertRecord,
    },

    /// A critical alert; the session is paused when this fires
    CriticalAlert {
        #[serde(flatten)]
        alert: AlertRecord,
    },

    /// The current test has gone quiet
    DataGapWarning {
        test_type: TestType,
        idle_secs: i64,
        timestamp: DateTime<Utc>,
    },

    /// A session lifecycle transition
    StatusChanged {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Reply to a `status_update` query
    SessionStatus {
        #[serde(flatten)]
        snapshot: SessionSnapshot,
    },

    /// Per-connection error report; never broadcast
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testlane_core::{AlertKind, Severity};

    fn now() -> DateTime<Utc> {
        "2026-03-01T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_inbound_ping_parses() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn test_inbound_test_data_parses() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"test_data","test_type":"speed","data":{"speed":62.5}}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::TestData { test_type, data } => {
                assert_eq!(test_type, "speed");
                assert_eq!(data["speed"], 62.5);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_error() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"type":"shutdown"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_outbound_test_data_shape() {
        let event = ServerEvent::TestData {
            test_type: TestType::Speed,
            data: Measurement::Speed { speed: 62.5 },
            timestamp: now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"test_data\""));
        assert!(json.contains("\"test_type\":\"speed\""));
        assert!(json.contains("\"speed\":62.5"));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn test_outbound_connection_established_shape() {
        let event = ServerEvent::ConnectionEstablished {
            client_id: "client_op-1_ab12".to_string(),
            session_id: "sess_1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"connection_established\""));
        assert!(json.contains("\"client_id\":\"client_op-1_ab12\""));
        assert!(json.contains("\"session_id\":\"sess_1\""));
    }

    #[test]
    fn test_critical_alert_flattens_record() {
        let event = ServerEvent::CriticalAlert {
            alert: AlertRecord::critical(
                AlertKind::SessionPaused,
                json!({"warning_count": 3}),
                now(),
            ),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "critical_alert");
        assert_eq!(json["kind"], "session_paused");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["detail"]["warning_count"], 3);
    }

    #[test]
    fn test_alert_severity_round_trip() {
        let event = ServerEvent::Alert {
            alert: AlertRecord::warning(AlertKind::SpeedInstability, json!({"speed": 70.0}), now()),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ServerEvent::Alert { alert } => {
                assert_eq!(alert.kind, AlertKind::SpeedInstability);
                assert_eq!(alert.severity, Severity::Warning);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_error_event_shape() {
        let event = ServerEvent::Error {
            message: "speed 150 out of range [0, 120]".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("out of range"));
    }
}
