//! Integration tests for the Test-Session Gateway
//!
//! These tests drive the full pipeline - session manager, measurement
//! validation, anomaly screening, supervision and streaming fan-out -
//! against in-memory collaborators and a manual clock.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use testlane_core::{SequenceTemplate, TestType, ThresholdCatalog};
use testlane_gateway::auth::{Identity, Role};
use testlane_gateway::clock::{Clock, ManualClock};
use testlane_gateway::config::{HubSettings, MonitorSettings};
use testlane_gateway::hub::ConnectionHub;
use testlane_gateway::ports::{
    AllowAllPrerequisites, EquipmentStatusSource, MemoryEquipmentSource, MemoryRepository,
    Notification, Notifier, PrerequisiteChecker, PrerequisiteError, SessionRepository,
};
use testlane_gateway::protocol::ServerEvent;
use testlane_gateway::session::{SessionError, SessionManager};

/// Notifier that records everything it is handed.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    async fn titles(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|n| n.title.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.sent.lock().await.push(notification);
    }
}

/// Prerequisite checker that rejects every vehicle.
struct DenyPrerequisites;

#[async_trait]
impl PrerequisiteChecker for DenyPrerequisites {
    async fn check(&self, vehicle_id: &str, _: &str, _: &str) -> Result<(), PrerequisiteError> {
        Err(PrerequisiteError::Rejected(format!(
            "vehicle {vehicle_id} not eligible for re-test yet"
        )))
    }
}

struct Harness {
    manager: Arc<SessionManager>,
    hub: Arc<ConnectionHub>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    harness_with(Arc::new(AllowAllPrerequisites), Arc::new(MemoryEquipmentSource::new()))
}

fn harness_with(
    prerequisites: Arc<dyn PrerequisiteChecker>,
    equipment: Arc<dyn EquipmentStatusSource>,
) -> Harness {
    let clock = Arc::new(ManualClock::new("2026-03-01T10:00:00Z".parse().unwrap()));
    let hub = Arc::new(ConnectionHub::new(
        HubSettings {
            max_clients_per_session: 5,
            message_buffer_size: 100,
            heartbeat_interval: StdDuration::from_secs(3600),
            heartbeat_timeout: Duration::seconds(60),
        },
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = Arc::new(SessionManager::new(
        Arc::new(ThresholdCatalog::default()),
        Arc::clone(&hub),
        Arc::new(MemoryRepository::new()) as Arc<dyn SessionRepository>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        prerequisites,
        equipment,
        MonitorSettings {
            session_timeout: Duration::minutes(30),
            data_gap: Duration::seconds(30),
            // Supervision is driven explicitly in these tests.
            supervisor_tick: StdDuration::from_secs(3600),
            alert_pause_threshold: 3,
            equipment_poll: StdDuration::from_secs(3600),
        },
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    Harness {
        manager,
        hub,
        clock,
        notifier,
    }
}

fn observer(user: &str) -> Identity {
    Identity {
        user_id: user.to_string(),
        role: Role::Observer,
    }
}

async fn attach(
    harness: &Harness,
    session_id: &str,
    user: &str,
) -> (String, mpsc::Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(256);
    let client_id = harness
        .hub
        .admit(session_id, &observer(user), tx)
        .await
        .unwrap();
    (client_id, rx)
}

/// Pull events until one matches, panicking if the channel drains first.
fn next_matching(
    rx: &mut mpsc::Receiver<ServerEvent>,
    predicate: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    loop {
        match rx.try_recv() {
            Ok(event) if predicate(&event) => return event,
            Ok(_) => continue,
            Err(_) => panic!("expected event not delivered"),
        }
    }
}

#[tokio::test]
async fn test_measurement_flows_to_every_observer() {
    let harness = harness();
    let session_id = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap()
        .session_id;

    let (_, mut rx_a) = attach(&harness, &session_id, "dash-a").await;
    let (_, mut rx_b) = attach(&harness, &session_id, "dash-b").await;

    harness
        .manager
        .submit_measurement(&session_id, "speed", &json!({ "speed": 62.5 }))
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let event = next_matching(rx, |e| matches!(e, ServerEvent::TestData { .. }));
        match event {
            ServerEvent::TestData {
                test_type,
                timestamp,
                ..
            } => {
                assert_eq!(test_type, TestType::Speed);
                assert_eq!(timestamp, harness.clock.now());
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_late_observer_replays_missed_events_in_order() {
    let harness = harness();
    let session_id = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap()
        .session_id;

    let speeds = [58.0, 59.0, 60.0, 61.0];
    for speed in speeds {
        harness
            .manager
            .submit_measurement(&session_id, "speed", &json!({ "speed": speed }))
            .await
            .unwrap();
    }

    // The late client gets the session start, then each missed measurement
    // in submission order, before anything new.
    let (_, mut rx) = attach(&harness, &session_id, "late").await;
    assert!(matches!(
        rx.try_recv().unwrap(),
        ServerEvent::ConnectionEstablished { .. }
    ));
    assert!(matches!(
        rx.try_recv().unwrap(),
        ServerEvent::StatusChanged { .. }
    ));
    for expected in speeds {
        match rx.try_recv().unwrap() {
            ServerEvent::TestData { data, .. } => {
                assert_eq!(
                    data,
                    testlane_core::Measurement::Speed { speed: expected }
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    harness
        .manager
        .submit_measurement(&session_id, "speed", &json!({ "speed": 62.0 }))
        .await
        .unwrap();
    match next_matching(&mut rx, |e| matches!(e, ServerEvent::TestData { .. })) {
        ServerEvent::TestData { data, .. } => {
            assert_eq!(data, testlane_core::Measurement::Speed { speed: 62.0 });
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_failed_client_does_not_disturb_the_rest() {
    let harness = harness();
    let session_id = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap()
        .session_id;

    let (_, mut rx_a) = attach(&harness, &session_id, "dash-a").await;
    let (_, rx_dead) = attach(&harness, &session_id, "dash-dead").await;
    let (_, mut rx_c) = attach(&harness, &session_id, "dash-c").await;
    drop(rx_dead);
    assert_eq!(harness.hub.connection_count(&session_id).await, 3);

    harness
        .manager
        .submit_measurement(&session_id, "speed", &json!({ "speed": 60.0 }))
        .await
        .unwrap();

    // The dead client is gone; the other two received the event.
    assert_eq!(harness.hub.connection_count(&session_id).await, 2);
    for rx in [&mut rx_a, &mut rx_c] {
        next_matching(rx, |e| matches!(e, ServerEvent::TestData { .. }));
    }
}

#[tokio::test]
async fn test_terminal_session_drains_connections() {
    let harness = harness();
    let session_id = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap()
        .session_id;

    let (_, mut rx) = attach(&harness, &session_id, "dash").await;
    harness
        .manager
        .cancel(&session_id, "lane needed for emergency")
        .await
        .unwrap();

    // The client saw the terminal transition before the drain.
    let event = next_matching(&mut rx, |e| {
        matches!(e, ServerEvent::StatusChanged { status, .. } if status == "cancelled")
    });
    match event {
        ServerEvent::StatusChanged { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("lane needed for emergency"));
        }
        _ => unreachable!(),
    }
    assert_eq!(harness.hub.connection_count(&session_id).await, 0);
    assert_eq!(harness.hub.buffered_count(&session_id).await, 0);
}

#[tokio::test]
async fn test_timeout_notifies_operator_and_drains() {
    let harness = harness();
    let session_id = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap()
        .session_id;
    let (_, _rx) = attach(&harness, &session_id, "dash").await;

    harness.clock.advance(Duration::minutes(31));
    assert!(!harness.manager.supervisor_pass(&session_id).await);

    let snapshot = harness.manager.status(&session_id).await.unwrap();
    assert_eq!(snapshot.status, "failed");
    assert_eq!(snapshot.reason.as_deref(), Some("timeout"));
    assert_eq!(harness.hub.connection_count(&session_id).await, 0);

    let titles = harness.notifier.titles().await;
    assert!(titles.iter().any(|t| t == "Test session timed out"));
}

#[tokio::test]
async fn test_escalation_broadcasts_critical_alert() {
    let harness = harness();
    let session_id = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap()
        .session_id;
    let (_, mut rx) = attach(&harness, &session_id, "dash").await;

    for _ in 0..5 {
        harness
            .manager
            .submit_measurement(&session_id, "speed", &json!({ "speed": 60.0 }))
            .await
            .unwrap();
    }
    for unstable in [70.0, 50.0, 70.0] {
        harness
            .manager
            .submit_measurement(&session_id, "speed", &json!({ "speed": unstable }))
            .await
            .unwrap();
    }
    assert!(harness.manager.supervisor_pass(&session_id).await);

    let event = next_matching(&mut rx, |e| matches!(e, ServerEvent::CriticalAlert { .. }));
    match event {
        ServerEvent::CriticalAlert { alert } => {
            assert_eq!(alert.kind, testlane_core::AlertKind::SessionPaused);
        }
        _ => unreachable!(),
    }

    // Paused sessions still answer status queries but reject measurements.
    let snapshot = harness.manager.status(&session_id).await.unwrap();
    assert!(snapshot.paused);
    let err = harness
        .manager
        .submit_measurement(&session_id, "speed", &json!({ "speed": 60.0 }))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Paused(_)));

    let titles = harness.notifier.titles().await;
    assert!(titles.iter().any(|t| t == "Test session paused"));

    // Resume reopens intake and tells the lane.
    harness.manager.resume(&session_id).await.unwrap();
    harness
        .manager
        .submit_measurement(&session_id, "speed", &json!({ "speed": 60.0 }))
        .await
        .unwrap();
    next_matching(&mut rx, |e| {
        matches!(e, ServerEvent::StatusChanged { reason: Some(r), .. } if r == "resumed")
    });
}

#[tokio::test]
async fn test_data_gap_warning_reaches_observers() {
    let harness = harness();
    let session_id = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap()
        .session_id;
    let (_, mut rx) = attach(&harness, &session_id, "dash").await;

    harness
        .manager
        .submit_measurement(&session_id, "speed", &json!({ "speed": 60.0 }))
        .await
        .unwrap();
    harness.clock.advance(Duration::seconds(31));
    assert!(harness.manager.supervisor_pass(&session_id).await);

    let event = next_matching(&mut rx, |e| matches!(e, ServerEvent::DataGapWarning { .. }));
    match event {
        ServerEvent::DataGapWarning {
            test_type,
            idle_secs,
            ..
        } => {
            assert_eq!(test_type, TestType::Speed);
            assert!(idle_secs >= 31);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_external_prerequisite_rejection() {
    let harness = harness_with(Arc::new(DenyPrerequisites), Arc::new(MemoryEquipmentSource::new()));

    let err = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Standard)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Prerequisite(PrerequisiteError::Rejected(_))
    ));
    assert_eq!(harness.manager.session_count().await, 0);
}

#[tokio::test]
async fn test_comprehensive_template_runs_axle_last() {
    let harness = harness();
    let snapshot = harness
        .manager
        .create_session("veh-1", "center-1", "op-1", SequenceTemplate::Comprehensive)
        .await
        .unwrap();

    assert_eq!(snapshot.sequence.len(), 5);
    assert_eq!(*snapshot.sequence.last().unwrap(), TestType::Axle);
    assert_eq!(snapshot.current_test, Some(TestType::Speed));
}
