//! Session management for live test lanes
//!
//! This module handles the lifecycle of test sessions, from creation to
//! termination, including the test-sequence state machine, the measurement
//! pipeline (validate, screen, append, broadcast) and supervisor-driven
//! transitions.
//!
//! All session state lives in one registry owned by the manager; every
//! lookup-then-mutate path runs under the registry lock, so measurements
//! within a session are processed in arrival order and no task ever
//! observes a half-applied transition.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify, RwLock};

use testlane_core::{
    evaluate, AlertKind, AlertRecord, AnomalyDetector, MeasurementRecord, SequenceTemplate,
    Severity, TestType, ThresholdCatalog, ValidationError, Validator,
};

use crate::clock::Clock;
use crate::config::MonitorSettings;
use crate::equipment::EquipmentWatcher;
use crate::hub::ConnectionHub;
use crate::metrics::global_metrics;
use crate::ports::{
    EquipmentHealth, EquipmentState, EquipmentStatusSource, Notification, Notifier,
    PrerequisiteChecker, PrerequisiteError, SessionRecord, SessionRepository,
};
use crate::protocol::ServerEvent;
use crate::supervisor::SessionSupervisor;

/// Session state enum.
///
/// `Created` and `InProgress` are the only non-terminal states; status only
/// moves forward and a terminal state is never left. "Paused" is a flag on
/// an `InProgress` session, not a state of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session allocated but not yet running (durable records only)
    Created,

    /// Session live on the lane
    InProgress,

    /// Sequence finished with every test passing
    Completed,

    /// Sequence failed, timed out or hit a fatal monitoring error
    Failed {
        /// Why the session failed
        reason: String,
    },

    /// Explicitly cancelled by the operator
    Cancelled {
        /// Cancellation reason
        reason: String,
    },
}

impl SessionStatus {
    /// Wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed { .. } => "failed",
            SessionStatus::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether this status can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed { .. } | SessionStatus::Cancelled { .. }
        )
    }

    /// The terminal reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            SessionStatus::Failed { reason } | SessionStatus::Cancelled { reason } => Some(reason),
            _ => None,
        }
    }
}

/// One inspection run progressing through its fixed test sequence.
#[derive(Debug, Clone)]
pub struct TestSession {
    pub id: String,
    pub vehicle_id: String,
    pub center_id: String,
    pub operator_id: String,
    pub status: SessionStatus,
    pub paused: bool,
    pub sequence: Vec<TestType>,
    pub completed: Vec<TestType>,
    pub measurements: HashMap<TestType, Vec<MeasurementRecord>>,
    pub alerts: Vec<AlertRecord>,
    pub warning_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// One data-gap alert per quiet episode; reset on every accepted reading
    gap_alerted: bool,
}

impl TestSession {
    fn new(
        id: String,
        vehicle_id: String,
        center_id: String,
        operator_id: String,
        template: SequenceTemplate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            vehicle_id,
            center_id,
            operator_id,
            status: SessionStatus::InProgress,
            paused: false,
            sequence: template.tests(),
            completed: Vec::new(),
            measurements: HashMap::new(),
            alerts: Vec::new(),
            warning_count: 0,
            created_at: now,
            last_activity: now,
            gap_alerted: false,
        }
    }

    /// The test currently expected: the first sequence entry not yet
    /// completed, or `None` once the sequence is exhausted.
    pub fn current_test(&self) -> Option<TestType> {
        self.sequence
            .iter()
            .find(|t| !self.completed.contains(t))
            .copied()
    }

    /// Point-in-time view of this session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            vehicle_id: self.vehicle_id.clone(),
            center_id: self.center_id.clone(),
            operator_id: self.operator_id.clone(),
            status: self.status.as_str().to_string(),
            reason: self.status.reason().map(str::to_string),
            paused: self.paused,
            sequence: self.sequence.clone(),
            completed_tests: self.completed.clone(),
            current_test: self.current_test(),
            warning_count: self.warning_count,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    fn record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            vehicle_id: self.vehicle_id.clone(),
            center_id: self.center_id.clone(),
            operator_id: self.operator_id.clone(),
            status: self.status.clone(),
            sequence: self.sequence.clone(),
            completed: self.completed.clone(),
            measurements: self.measurements.clone(),
            alerts: self.alerts.clone(),
            created_at: self.created_at,
            updated_at: self.last_activity,
        }
    }
}

/// Point-in-time view of a session, served over the API and the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub vehicle_id: String,
    pub center_id: String,
    pub operator_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub paused: bool,
    pub sequence: Vec<TestType>,
    pub completed_tests: Vec<TestType>,
    pub current_test: Option<TestType>,
    pub warning_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// A client submitted a test out of order.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SequenceError {
    #[error("test {submitted} is out of order; expected {expected}")]
    OutOfOrder {
        submitted: TestType,
        expected: TestType,
    },

    #[error("test {0} is already completed")]
    AlreadyCompleted(TestType),

    #[error("the test sequence is already exhausted")]
    SequenceExhausted,

    #[error("test {0} has no accepted measurements yet")]
    NoMeasurements(TestType),
}

/// Session-related errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Prerequisite(#[from] PrerequisiteError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error("session {0} is paused; resume it before submitting measurements")]
    Paused(String),

    #[error("session {0} is not paused")]
    NotPaused(String),

    #[error("session {session_id} is no longer active ({status})")]
    NotActive { session_id: String, status: String },

    #[error("monitoring failure: {0}")]
    Monitoring(String),
}

/// Live registry entry: the session plus the handles that drive it.
struct SessionEntry {
    session: TestSession,
    /// Wakes the supervisor on every accepted measurement
    wake: Arc<Notify>,
    /// Cancels the supervisor and equipment-watcher tasks
    shutdown: broadcast::Sender<()>,
}

/// Owner of all active sessions.
///
/// Collaborators are injected at construction; the manager holds the only
/// mutable registry and exposes synchronized operations over it.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    validator: Validator,
    detector: AnomalyDetector,
    catalog: Arc<ThresholdCatalog>,
    hub: Arc<ConnectionHub>,
    repository: Arc<dyn SessionRepository>,
    notifier: Arc<dyn Notifier>,
    prerequisites: Arc<dyn PrerequisiteChecker>,
    equipment: Arc<dyn EquipmentStatusSource>,
    settings: MonitorSettings,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    /// Create a session manager over the injected collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<ThresholdCatalog>,
        hub: Arc<ConnectionHub>,
        repository: Arc<dyn SessionRepository>,
        notifier: Arc<dyn Notifier>,
        prerequisites: Arc<dyn PrerequisiteChecker>,
        equipment: Arc<dyn EquipmentStatusSource>,
        settings: MonitorSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            validator: Validator::new(Arc::clone(&catalog)),
            detector: AnomalyDetector::new(Arc::clone(&catalog)),
            catalog,
            hub,
            repository,
            notifier,
            prerequisites,
            equipment,
            settings,
            clock,
        }
    }

    /// Create a new session and start its supervision tasks.
    pub async fn create_session(
        self: &Arc<Self>,
        vehicle_id: &str,
        center_id: &str,
        operator_id: &str,
        template: SequenceTemplate,
    ) -> Result<SessionSnapshot, SessionError> {
        self.prerequisites
            .check(vehicle_id, center_id, operator_id)
            .await?;

        let mut sessions = self.sessions.write().await;

        // One in-flight session per vehicle; the rest of the eligibility
        // rules live behind the prerequisite checker.
        if sessions
            .values()
            .any(|entry| entry.session.vehicle_id == vehicle_id)
        {
            return Err(PrerequisiteError::VehicleBusy {
                vehicle_id: vehicle_id.to_string(),
            }
            .into());
        }

        let session_id = format!(
            "sess_{}",
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );
        let now = self.clock.now();
        let session = TestSession::new(
            session_id.clone(),
            vehicle_id.to_string(),
            center_id.to_string(),
            operator_id.to_string(),
            template,
            now,
        );

        self.repository
            .create(session.record())
            .await
            .map_err(|e| SessionError::Monitoring(e.to_string()))?;

        let wake = Arc::new(Notify::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        let supervisor = SessionSupervisor::new(
            Arc::clone(self),
            session_id.clone(),
            Arc::clone(&wake),
            self.settings.supervisor_tick,
            shutdown_tx.subscribe(),
        );
        tokio::spawn(supervisor.run());

        let watcher = EquipmentWatcher::new(
            Arc::clone(self),
            Arc::clone(&self.equipment),
            session_id.clone(),
            center_id.to_string(),
            self.settings.equipment_poll,
            shutdown_tx.subscribe(),
        );
        tokio::spawn(watcher.run());

        let snapshot = session.snapshot();
        sessions.insert(
            session_id.clone(),
            SessionEntry {
                session,
                wake,
                shutdown: shutdown_tx,
            },
        );
        drop(sessions);

        self.hub
            .broadcast(
                &session_id,
                ServerEvent::StatusChanged {
                    status: "in_progress".to_string(),
                    reason: None,
                    timestamp: now,
                },
            )
            .await;
        self.notifier
            .notify(Notification {
                recipient: operator_id.to_string(),
                title: "Test session started".to_string(),
                message: format!("Session {session_id} started for vehicle {vehicle_id}"),
                data: json!({
                    "session_id": session_id,
                    "vehicle_id": vehicle_id,
                    "center_id": center_id,
                    "template": template,
                }),
            })
            .await;

        global_metrics().session_created();
        tracing::info!(
            session_id = %session_id,
            vehicle_id = %vehicle_id,
            center_id = %center_id,
            template = %template,
            "session started"
        );
        Ok(snapshot)
    }

    /// Submit a raw measurement frame for the session's current test.
    ///
    /// Runs the whole pipeline: sequence check, validation, anomaly
    /// screening, append, persist, broadcast, supervisor wake-up.
    pub async fn submit_measurement(
        &self,
        session_id: &str,
        test_type: &str,
        payload: &Value,
    ) -> Result<MeasurementRecord, SessionError> {
        let Some(test_type) = TestType::parse(test_type) else {
            global_metrics().measurement_rejected();
            return Err(ValidationError::UnknownTestType(test_type.to_string()).into());
        };

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let session = &mut entry.session;

        if session.status != SessionStatus::InProgress {
            return Err(SessionError::NotActive {
                session_id: session_id.to_string(),
                status: session.status.as_str().to_string(),
            });
        }
        if session.paused {
            return Err(SessionError::Paused(session_id.to_string()));
        }

        match session.current_test() {
            Some(expected) if expected == test_type => {}
            _ if session.completed.contains(&test_type) => {
                global_metrics().measurement_rejected();
                return Err(SequenceError::AlreadyCompleted(test_type).into());
            }
            Some(expected) => {
                global_metrics().measurement_rejected();
                return Err(SequenceError::OutOfOrder {
                    submitted: test_type,
                    expected,
                }
                .into());
            }
            None => {
                global_metrics().measurement_rejected();
                return Err(SequenceError::SequenceExhausted.into());
            }
        }

        let measurement = match self.validator.validate(test_type, payload) {
            Ok(m) => m,
            Err(e) => {
                global_metrics().measurement_rejected();
                tracing::debug!(
                    session_id = %session_id,
                    test_type = %test_type,
                    error = %e,
                    "measurement rejected"
                );
                return Err(e.into());
            }
        };

        let now = self.clock.now();
        let record = MeasurementRecord::new(measurement.clone(), now);

        let alerts = {
            let history = session
                .measurements
                .get(&test_type)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let window_len = self.catalog.recent_window(test_type).min(history.len());
            let window = &history[history.len() - window_len..];
            self.detector.detect(&measurement, window, now)
        };

        session
            .measurements
            .entry(test_type)
            .or_default()
            .push(record.clone());
        for alert in &alerts {
            session.alerts.push(alert.clone());
            session.warning_count += 1;
        }
        session.last_activity = now;
        session.gap_alerted = false;

        if let Err(e) = self.repository.append_measurement(session_id, &record).await {
            tracing::error!(session_id = %session_id, error = %e, "failed to persist measurement");
        }
        for alert in &alerts {
            if let Err(e) = self.repository.append_alert(session_id, alert).await {
                tracing::error!(session_id = %session_id, error = %e, "failed to persist alert");
            }
        }

        self.hub
            .broadcast(
                session_id,
                ServerEvent::TestData {
                    test_type,
                    data: measurement,
                    timestamp: now,
                },
            )
            .await;
        for alert in &alerts {
            global_metrics().alert_recorded();
            self.hub
                .broadcast(
                    session_id,
                    ServerEvent::Alert {
                        alert: alert.clone(),
                    },
                )
                .await;
        }

        entry.wake.notify_one();
        global_metrics().measurement_accepted();
        Ok(record)
    }

    /// Mark the current test as finished and move to the next one.
    ///
    /// Only the current test can be advanced, only once, and only after at
    /// least one accepted measurement. Finalizes the session when the
    /// sequence is exhausted.
    pub async fn advance(
        &self,
        session_id: &str,
        test_type: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        let Some(test_type) = TestType::parse(test_type) else {
            return Err(ValidationError::UnknownTestType(test_type.to_string()).into());
        };

        let mut sessions = self.sessions.write().await;
        let finished = {
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            let session = &mut entry.session;

            if session.status != SessionStatus::InProgress {
                return Err(SessionError::NotActive {
                    session_id: session_id.to_string(),
                    status: session.status.as_str().to_string(),
                });
            }
            if session.paused {
                return Err(SessionError::Paused(session_id.to_string()));
            }
            if session.completed.contains(&test_type) {
                return Err(SequenceError::AlreadyCompleted(test_type).into());
            }
            match session.current_test() {
                Some(expected) if expected == test_type => {}
                Some(expected) => {
                    return Err(SequenceError::OutOfOrder {
                        submitted: test_type,
                        expected,
                    }
                    .into());
                }
                None => return Err(SequenceError::SequenceExhausted.into()),
            }
            if session
                .measurements
                .get(&test_type)
                .map_or(true, Vec::is_empty)
            {
                return Err(SequenceError::NoMeasurements(test_type).into());
            }

            let now = self.clock.now();
            session.completed.push(test_type);
            session.last_activity = now;
            session.gap_alerted = false;

            if let Err(e) = self
                .repository
                .update_status(session_id, &session.status, &session.completed, now)
                .await
            {
                tracing::error!(session_id = %session_id, error = %e, "failed to persist advance");
            }
            self.hub
                .broadcast(
                    session_id,
                    ServerEvent::StatusChanged {
                        status: session.status.as_str().to_string(),
                        reason: Some(format!("test {test_type} completed")),
                        timestamp: now,
                    },
                )
                .await;
            tracing::info!(
                session_id = %session_id,
                test_type = %test_type,
                remaining = session.sequence.len() - session.completed.len(),
                "test completed"
            );

            session.current_test().is_none()
        };

        if finished {
            let snapshot = self.finalize_locked(&mut sessions, session_id).await;
            return snapshot.ok_or_else(|| SessionError::NotFound(session_id.to_string()));
        }

        let entry = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(entry.session.snapshot())
    }

    /// Cancel a session. Allowed from non-terminal states only; immediately
    /// terminal.
    pub async fn cancel(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session_id) {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let snapshot = self
            .terminate_locked(
                &mut sessions,
                session_id,
                SessionStatus::Cancelled {
                    reason: reason.to_string(),
                },
                json!({ "reason": reason }),
            )
            .await;
        snapshot.ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Force a session into `Failed`. Used by the supervisor and for fatal
    /// monitoring errors.
    pub async fn fail(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session_id) {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let snapshot = self
            .terminate_locked(
                &mut sessions,
                session_id,
                SessionStatus::Failed {
                    reason: reason.to_string(),
                },
                json!({ "reason": reason }),
            )
            .await;
        snapshot.ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Resume a paused session.
    ///
    /// Clears the pause flag and the accumulated warning counter. Paused
    /// sessions keep answering pings and status queries; only measurement
    /// intake is gated, and this call reopens it.
    pub async fn resume(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let session = &mut entry.session;

        if session.status != SessionStatus::InProgress || !session.paused {
            return Err(SessionError::NotPaused(session_id.to_string()));
        }

        let now = self.clock.now();
        session.paused = false;
        session.warning_count = 0;
        session.gap_alerted = false;
        session.last_activity = now;
        let snapshot = session.snapshot();
        let operator = session.operator_id.clone();

        if let Err(e) = self
            .repository
            .update_status(session_id, &SessionStatus::InProgress, &session.completed, now)
            .await
        {
            tracing::error!(session_id = %session_id, error = %e, "failed to persist resume");
        }
        self.hub
            .broadcast(
                session_id,
                ServerEvent::StatusChanged {
                    status: "in_progress".to_string(),
                    reason: Some("resumed".to_string()),
                    timestamp: now,
                },
            )
            .await;
        self.notifier
            .notify(Notification {
                recipient: operator,
                title: "Test session resumed".to_string(),
                message: format!("Session {session_id} was resumed"),
                data: json!({ "session_id": session_id }),
            })
            .await;
        tracing::info!(session_id = %session_id, "session resumed");
        Ok(snapshot)
    }

    /// Current snapshot of a session, falling back to the durable record
    /// for sessions already evicted from the registry.
    pub async fn status(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(entry) = sessions.get(session_id) {
                return Ok(entry.session.snapshot());
            }
        }
        let record = self
            .repository
            .fetch(session_id)
            .await
            .map_err(|e| SessionError::Monitoring(e.to_string()))?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(snapshot_from_record(record))
    }

    /// Number of live sessions in the registry.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// One supervision pass over a session.
    ///
    /// Checks inactivity, data gaps and alert accumulation. Returns `false`
    /// once the session is gone or terminal, which ends the supervisor loop.
    pub async fn supervisor_pass(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let now = self.clock.now();

        let mut timeout_operator: Option<(String, i64)> = None;
        {
            let Some(entry) = sessions.get_mut(session_id) else {
                return false;
            };
            let session = &mut entry.session;

            let idle = now - session.last_activity;
            if idle > self.settings.session_timeout {
                timeout_operator = Some((session.operator_id.clone(), idle.num_seconds()));
            } else {
                // Data gap: the current test has gone quiet without the
                // session as a whole being dead.
                if let Some(current) = session.current_test() {
                    let last_data = session
                        .measurements
                        .get(&current)
                        .and_then(|records| records.last())
                        .map(|record| record.timestamp)
                        .unwrap_or(session.last_activity);
                    let gap = now - last_data;
                    if !session.gap_alerted && gap > self.settings.data_gap {
                        session.gap_alerted = true;
                        let alert = AlertRecord::warning(
                            AlertKind::DataGap,
                            json!({
                                "test_type": current,
                                "idle_secs": gap.num_seconds(),
                            }),
                            now,
                        );
                        session.alerts.push(alert.clone());
                        session.warning_count += 1;
                        if let Err(e) = self.repository.append_alert(session_id, &alert).await {
                            tracing::error!(
                                session_id = %session_id,
                                error = %e,
                                "failed to persist data-gap alert"
                            );
                        }
                        self.hub
                            .broadcast(
                                session_id,
                                ServerEvent::DataGapWarning {
                                    test_type: current,
                                    idle_secs: gap.num_seconds(),
                                    timestamp: now,
                                },
                            )
                            .await;
                        global_metrics().alert_recorded();
                        tracing::warn!(
                            session_id = %session_id,
                            test_type = %current,
                            idle_secs = gap.num_seconds(),
                            "data gap on current test"
                        );
                    }
                }

                // Critical escalation: enough warnings accumulate into a pause.
                if !session.paused
                    && session.warning_count >= self.settings.alert_pause_threshold
                {
                    let detail = json!({ "warning_count": session.warning_count });
                    self.pause_session_locked(
                        session_id,
                        session,
                        "alert threshold reached",
                        detail,
                        now,
                    )
                    .await;
                }
            }
        }

        if let Some((operator, idle_secs)) = timeout_operator {
            self.terminate_locked(
                &mut sessions,
                session_id,
                SessionStatus::Failed {
                    reason: "timeout".to_string(),
                },
                json!({ "idle_secs": idle_secs }),
            )
            .await;
            self.notifier
                .notify(Notification {
                    recipient: operator,
                    title: "Test session timed out".to_string(),
                    message: format!(
                        "Session {session_id} timed out after {idle_secs}s of inactivity"
                    ),
                    data: json!({ "session_id": session_id, "idle_secs": idle_secs }),
                })
                .await;
            return false;
        }
        true
    }

    /// Fold an equipment finding into the session's alert stream.
    ///
    /// A critical finding pauses the session immediately, regardless of the
    /// warning counter. Returns `false` once the session is gone, which
    /// ends the watcher loop.
    pub async fn report_equipment(&self, session_id: &str, health: &EquipmentHealth) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(session_id) else {
            return false;
        };
        let session = &mut entry.session;

        if health.status.is_operational() {
            return true;
        }

        let now = self.clock.now();
        let severity = match health.status {
            EquipmentState::Faulty => Severity::Critical,
            _ => Severity::Warning,
        };
        let detail = json!({
            "unit": health.unit,
            "status": health.status,
            "detail": health.detail,
        });
        let alert = match severity {
            Severity::Critical => AlertRecord::critical(AlertKind::EquipmentIssue, detail, now),
            Severity::Warning => AlertRecord::warning(AlertKind::EquipmentIssue, detail, now),
        };
        session.alerts.push(alert.clone());
        if severity == Severity::Warning {
            session.warning_count += 1;
        }

        if let Err(e) = self.repository.append_alert(session_id, &alert).await {
            tracing::error!(session_id = %session_id, error = %e, "failed to persist equipment alert");
        }
        let event = match severity {
            Severity::Critical => ServerEvent::CriticalAlert {
                alert: alert.clone(),
            },
            Severity::Warning => ServerEvent::Alert {
                alert: alert.clone(),
            },
        };
        self.hub.broadcast(session_id, event).await;
        global_metrics().alert_recorded();
        tracing::warn!(
            session_id = %session_id,
            unit = %health.unit,
            status = ?health.status,
            "equipment issue"
        );

        if severity.is_critical() && !session.paused {
            self.pause_session_locked(
                session_id,
                session,
                "critical equipment issue",
                json!({ "unit": health.unit }),
                now,
            )
            .await;
        }
        true
    }

    /// Pause an in-progress session and broadcast the critical alert.
    async fn pause_session_locked(
        &self,
        session_id: &str,
        session: &mut TestSession,
        cause: &str,
        extra: Value,
        now: DateTime<Utc>,
    ) {
        session.paused = true;
        let mut detail = json!({ "cause": cause });
        if let (Some(obj), Some(extra)) = (detail.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        let alert = AlertRecord::critical(AlertKind::SessionPaused, detail, now);
        session.alerts.push(alert.clone());

        if let Err(e) = self.repository.append_alert(session_id, &alert).await {
            tracing::error!(session_id = %session_id, error = %e, "failed to persist pause alert");
        }
        self.hub
            .broadcast(
                session_id,
                ServerEvent::CriticalAlert {
                    alert: alert.clone(),
                },
            )
            .await;
        self.hub
            .broadcast(
                session_id,
                ServerEvent::StatusChanged {
                    status: "in_progress".to_string(),
                    reason: Some(format!("paused: {cause}")),
                    timestamp: now,
                },
            )
            .await;
        self.notifier
            .notify(Notification {
                recipient: session.center_id.clone(),
                title: "Test session paused".to_string(),
                message: format!("Session {session_id} paused: {cause}"),
                data: json!({ "session_id": session_id, "cause": cause }),
            })
            .await;
        global_metrics().alert_recorded();
        tracing::warn!(session_id = %session_id, cause = %cause, "session paused");
    }

    /// Finalize a session whose sequence is exhausted: judge every test and
    /// transition to `Completed` or `Failed`.
    async fn finalize_locked(
        &self,
        sessions: &mut HashMap<String, SessionEntry>,
        session_id: &str,
    ) -> Option<SessionSnapshot> {
        let (status, outcomes) = {
            let entry = sessions.get(session_id)?;
            let session = &entry.session;

            let outcomes: Vec<_> = session
                .sequence
                .iter()
                .map(|&test_type| {
                    let records = session
                        .measurements
                        .get(&test_type)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    evaluate(&self.catalog, test_type, records)
                })
                .collect();
            let failed: Vec<TestType> = outcomes
                .iter()
                .filter(|o| !o.passed)
                .map(|o| o.test_type)
                .collect();

            // A still-paused session means a critical alert was never
            // resolved; that fails the run even if every test passed.
            let status = if session.paused {
                SessionStatus::Failed {
                    reason: "unresolved critical alerts".to_string(),
                }
            } else if !failed.is_empty() {
                SessionStatus::Failed {
                    reason: format!(
                        "tests failed: {}",
                        failed
                            .iter()
                            .map(TestType::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                }
            } else {
                SessionStatus::Completed
            };
            (status, outcomes)
        };

        self.terminate_locked(
            sessions,
            session_id,
            status,
            json!({ "outcomes": outcomes }),
        )
        .await
    }

    /// Common terminal transition: set status, persist, broadcast, drain
    /// connections, cancel background tasks and evict the entry.
    ///
    /// Idempotent: a second call for the same session finds no entry and
    /// does nothing.
    async fn terminate_locked(
        &self,
        sessions: &mut HashMap<String, SessionEntry>,
        session_id: &str,
        status: SessionStatus,
        detail: Value,
    ) -> Option<SessionSnapshot> {
        let mut entry = sessions.remove(session_id)?;
        let now = self.clock.now();
        entry.session.status = status.clone();
        entry.session.last_activity = now;
        let snapshot = entry.session.snapshot();

        if let Err(e) = self
            .repository
            .update_status(session_id, &status, &entry.session.completed, now)
            .await
        {
            tracing::error!(session_id = %session_id, error = %e, "failed to persist terminal status");
        }

        self.hub
            .broadcast(
                session_id,
                ServerEvent::StatusChanged {
                    status: status.as_str().to_string(),
                    reason: status.reason().map(str::to_string),
                    timestamp: now,
                },
            )
            .await;
        self.hub.close(session_id).await;

        // Stops the supervisor and equipment watcher; safe to fire twice.
        let _ = entry.shutdown.send(());

        self.notifier
            .notify(Notification {
                recipient: entry.session.operator_id.clone(),
                title: format!("Test session {}", status.as_str()),
                message: format!("Session {session_id} is {}", status.as_str()),
                data: json!({
                    "session_id": session_id,
                    "status": status.as_str(),
                    "detail": detail,
                }),
            })
            .await;

        global_metrics().session_ended();
        tracing::info!(
            session_id = %session_id,
            status = status.as_str(),
            reason = ?status.reason(),
            "session ended"
        );
        Some(snapshot)
    }
}

fn snapshot_from_record(record: SessionRecord) -> SessionSnapshot {
    let current_test = record
        .sequence
        .iter()
        .find(|t| !record.completed.contains(t))
        .copied()
        .filter(|_| !record.status.is_terminal());
    SessionSnapshot {
        session_id: record.id,
        vehicle_id: record.vehicle_id,
        center_id: record.center_id,
        operator_id: record.operator_id,
        status: record.status.as_str().to_string(),
        reason: record.status.reason().map(str::to_string),
        paused: false,
        sequence: record.sequence,
        completed_tests: record.completed,
        current_test,
        warning_count: record
            .alerts
            .iter()
            .filter(|a| a.severity == Severity::Warning)
            .count() as u32,
        created_at: record.created_at,
        last_activity: record.updated_at,
    }
}
