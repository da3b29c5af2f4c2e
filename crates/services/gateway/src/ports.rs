//! Collaborator ports
//!
//! The gateway touches the outside world through the narrow traits in this
//! module: durable session storage, the notification sink, the vehicle
//! eligibility check and the equipment status feed. Implementations are
//! injected at construction time; nothing in the core holds a reference
//! back to its caller.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use testlane_core::{AlertRecord, MeasurementRecord, TestType};

use crate::session::SessionStatus;

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Durable form of a session: one record per session, measurements and
/// alerts embedded, plus a separate audit record per alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub vehicle_id: String,
    pub center_id: String,
    pub operator_id: String,
    pub status: SessionStatus,
    pub sequence: Vec<TestType>,
    pub completed: Vec<TestType>,
    pub measurements: HashMap<TestType, Vec<MeasurementRecord>>,
    pub alerts: Vec<AlertRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage-side failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable record of session state and stored measurements.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create the durable record for a new session.
    async fn create(&self, record: SessionRecord) -> Result<(), RepositoryError>;

    /// Update status and completed-test list after a transition.
    async fn update_status(
        &self,
        session_id: &str,
        status: &SessionStatus,
        completed: &[TestType],
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Append an accepted measurement.
    async fn append_measurement(
        &self,
        session_id: &str,
        record: &MeasurementRecord,
    ) -> Result<(), RepositoryError>;

    /// Append an alert, both to the session record and the audit log.
    async fn append_alert(
        &self,
        session_id: &str,
        alert: &AlertRecord,
    ) -> Result<(), RepositoryError>;

    /// Fetch the durable record for a session.
    async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>, RepositoryError>;
}

/// In-memory repository for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryRepository {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    alert_log: RwLock<Vec<(String, AlertRecord)>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit alert records, across all sessions.
    pub async fn alert_log_len(&self) -> usize {
        self.alert_log.read().await.len()
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn create(&self, record: SessionRecord) -> Result<(), RepositoryError> {
        self.sessions
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: &SessionStatus,
        completed: &[TestType],
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;
        record.status = status.clone();
        record.completed = completed.to_vec();
        record.updated_at = at;
        Ok(())
    }

    async fn append_measurement(
        &self,
        session_id: &str,
        measurement: &MeasurementRecord,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;
        record
            .measurements
            .entry(measurement.test_type())
            .or_default()
            .push(measurement.clone());
        record.updated_at = measurement.timestamp;
        Ok(())
    }

    async fn append_alert(
        &self,
        session_id: &str,
        alert: &AlertRecord,
    ) -> Result<(), RepositoryError> {
        {
            let mut sessions = self.sessions.write().await;
            let record = sessions
                .get_mut(session_id)
                .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;
            record.alerts.push(alert.clone());
            record.updated_at = alert.timestamp;
        }
        self.alert_log
            .write()
            .await
            .push((session_id.to_string(), alert.clone()));
        Ok(())
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>, RepositoryError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// A fire-and-forget notification event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// User or role the notification is addressed to
    pub recipient: String,

    /// Short headline
    pub title: String,

    /// Human-readable body
    pub message: String,

    /// Structured context for downstream delivery
    pub data: Value,
}

/// Accepts alert/notification events. Email, push and escalation routing
/// are the sink's concern, not the gateway's.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hand off a notification. Must not block the caller on delivery.
    async fn notify(&self, notification: Notification);
}

/// Notifier that only logs, for dev and tests.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::info!(
            recipient = %notification.recipient,
            title = %notification.title,
            "notification: {}",
            notification.message
        );
    }
}

/// Webhook notifier with bounded retries and exponential backoff.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    backoff: Duration,
}

impl WebhookNotifier {
    /// Create a webhook notifier.
    pub fn new(url: String, timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            max_retries,
            backoff,
        }
    }

    async fn deliver(
        client: reqwest::Client,
        url: String,
        notification: Notification,
        max_retries: u32,
        backoff: Duration,
    ) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match client.post(&url).json(&notification).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(url = %url, attempts, "notification delivered");
                    return;
                }
                Ok(response) => {
                    tracing::warn!(
                        url = %url,
                        status = response.status().as_u16(),
                        attempts,
                        "notification delivery rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(url = %url, attempts, error = %e, "notification delivery failed");
                }
            }
            if attempts > max_retries {
                tracing::error!(
                    url = %url,
                    title = %notification.title,
                    "notification dropped after {} attempts",
                    attempts
                );
                return;
            }
            tokio::time::sleep(backoff * 2u32.pow(attempts - 1)).await;
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) {
        // Delivery runs in its own task so session transitions never wait
        // on the sink.
        let client = self.client.clone();
        let url = self.url.clone();
        let max_retries = self.max_retries;
        let backoff = self.backoff;
        tokio::spawn(Self::deliver(client, url, notification, max_retries, backoff));
    }
}

// ---------------------------------------------------------------------------
// Prerequisites
// ---------------------------------------------------------------------------

/// Why session creation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrerequisiteError {
    #[error("vehicle {vehicle_id} already has a session in flight")]
    VehicleBusy { vehicle_id: String },

    #[error("center {center_id} is not active")]
    CenterInactive { center_id: String },

    #[error("operator {operator_id} is not authorized to conduct tests")]
    OperatorNotAuthorized { operator_id: String },

    #[error("prerequisites rejected: {0}")]
    Rejected(String),
}

/// External eligibility check consulted before a session is created.
#[async_trait]
pub trait PrerequisiteChecker: Send + Sync {
    async fn check(
        &self,
        vehicle_id: &str,
        center_id: &str,
        operator_id: &str,
    ) -> Result<(), PrerequisiteError>;
}

/// Checker that accepts everything, for dev and tests.
#[derive(Default)]
pub struct AllowAllPrerequisites;

#[async_trait]
impl PrerequisiteChecker for AllowAllPrerequisites {
    async fn check(&self, _: &str, _: &str, _: &str) -> Result<(), PrerequisiteError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Equipment status
// ---------------------------------------------------------------------------

/// Operational state of one piece of lane equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentState {
    Operational,
    Degraded,
    Faulty,
}

impl EquipmentState {
    pub fn is_operational(&self) -> bool {
        matches!(self, EquipmentState::Operational)
    }
}

/// Health report for one piece of equipment at a center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentHealth {
    /// Equipment unit name, e.g. "brake_bench"
    pub unit: String,

    /// Current operational state
    pub status: EquipmentState,

    /// Free-form detail from the status source
    #[serde(default)]
    pub detail: Option<String>,
}

/// Equipment status query failures.
#[derive(Debug, thiserror::Error)]
pub enum EquipmentError {
    #[error("equipment status source unreachable: {0}")]
    Unreachable(String),

    #[error("malformed equipment status payload: {0}")]
    Malformed(String),
}

/// Exposes "get equipment health for center X", polled by the gateway.
#[async_trait]
pub trait EquipmentStatusSource: Send + Sync {
    async fn equipment_health(
        &self,
        center_id: &str,
    ) -> Result<Vec<EquipmentHealth>, EquipmentError>;
}

/// HTTP-backed equipment status source.
pub struct HttpEquipmentSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEquipmentSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EquipmentStatusSource for HttpEquipmentSource {
    async fn equipment_health(
        &self,
        center_id: &str,
    ) -> Result<Vec<EquipmentHealth>, EquipmentError> {
        let url = format!("{}/centers/{}/equipment", self.base_url, center_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EquipmentError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EquipmentError::Unreachable(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }
        response
            .json::<Vec<EquipmentHealth>>()
            .await
            .map_err(|e| EquipmentError::Malformed(e.to_string()))
    }
}

/// In-memory equipment source whose reports can be changed at runtime,
/// for tests and dev deployments without a status service.
#[derive(Default)]
pub struct MemoryEquipmentSource {
    centers: RwLock<HashMap<String, Vec<EquipmentHealth>>>,
}

impl MemoryEquipmentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reports for a center.
    pub async fn set(&self, center_id: &str, units: Vec<EquipmentHealth>) {
        self.centers
            .write()
            .await
            .insert(center_id.to_string(), units);
    }
}

#[async_trait]
impl EquipmentStatusSource for MemoryEquipmentSource {
    async fn equipment_health(
        &self,
        center_id: &str,
    ) -> Result<Vec<EquipmentHealth>, EquipmentError> {
        Ok(self
            .centers
            .read()
            .await
            .get(center_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testlane_core::{AlertKind, Measurement};

    fn now() -> DateTime<Utc> {
        "2026-03-01T10:00:00Z".parse().unwrap()
    }

    fn record() -> SessionRecord {
        SessionRecord {
            id: "sess_1".to_string(),
            vehicle_id: "veh_1".to_string(),
            center_id: "center_1".to_string(),
            operator_id: "op_1".to_string(),
            status: SessionStatus::InProgress,
            sequence: vec![TestType::Speed, TestType::Brake],
            completed: Vec::new(),
            measurements: HashMap::new(),
            alerts: Vec::new(),
            created_at: now(),
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn test_memory_repository_round_trip() {
        let repo = MemoryRepository::new();
        repo.create(record()).await.unwrap();

        let measurement = MeasurementRecord::new(Measurement::Speed { speed: 61.0 }, now());
        repo.append_measurement("sess_1", &measurement).await.unwrap();

        let alert = AlertRecord::warning(AlertKind::DataGap, json!({}), now());
        repo.append_alert("sess_1", &alert).await.unwrap();

        let stored = repo.fetch("sess_1").await.unwrap().unwrap();
        assert_eq!(stored.measurements[&TestType::Speed].len(), 1);
        assert_eq!(stored.alerts.len(), 1);
        assert_eq!(repo.alert_log_len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_repository_unknown_session() {
        let repo = MemoryRepository::new();
        let alert = AlertRecord::warning(AlertKind::DataGap, json!({}), now());
        let err = repo.append_alert("missing", &alert).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_memory_equipment_source() {
        let source = MemoryEquipmentSource::new();
        assert!(source.equipment_health("center_1").await.unwrap().is_empty());

        source
            .set(
                "center_1",
                vec![EquipmentHealth {
                    unit: "brake_bench".to_string(),
                    status: EquipmentState::Degraded,
                    detail: Some("calibration overdue".to_string()),
                }],
            )
            .await;

        let units = source.equipment_health("center_1").await.unwrap();
        assert_eq!(units.len(), 1);
        assert!(!units[0].status.is_operational());
    }

    #[test]
    fn test_equipment_health_deserialization() {
        let units: Vec<EquipmentHealth> = serde_json::from_str(
            r#"[{"unit": "roller", "status": "operational"},
                {"unit": "sound_meter", "status": "faulty", "detail": "no signal"}]"#,
        )
        .unwrap();
        assert_eq!(units[0].status, EquipmentState::Operational);
        assert_eq!(units[1].status, EquipmentState::Faulty);
        assert_eq!(units[1].detail.as_deref(), Some("no signal"));
    }
}
