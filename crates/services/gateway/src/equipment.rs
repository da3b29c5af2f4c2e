//! Per-session equipment watcher
//!
//! Polls the equipment status source for the session's center and folds
//! non-operational findings into the session's alert stream. Findings are
//! reported on state changes, not on every poll, so a bench that stays
//! degraded for minutes produces one alert, not one per tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::ports::{EquipmentHealth, EquipmentState, EquipmentStatusSource};
use crate::session::SessionManager;

/// Periodic equipment health poller for one session.
pub struct EquipmentWatcher {
    manager: Arc<SessionManager>,
    source: Arc<dyn EquipmentStatusSource>,
    session_id: String,
    center_id: String,
    poll: Duration,
    shutdown: broadcast::Receiver<()>,
    /// Last state seen per unit, to report transitions only
    last_seen: HashMap<String, EquipmentState>,
}

impl EquipmentWatcher {
    /// Create a watcher for a session at a center.
    pub fn new(
        manager: Arc<SessionManager>,
        source: Arc<dyn EquipmentStatusSource>,
        session_id: String,
        center_id: String,
        poll: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            manager,
            source,
            session_id,
            center_id,
            poll,
            shutdown,
            last_seen: HashMap::new(),
        }
    }

    /// Run the polling loop until the session ends.
    pub async fn run(mut self) {
        tracing::debug!(
            session_id = %self.session_id,
            center_id = %self.center_id,
            "equipment watcher started"
        );
        let mut ticker = tokio::time::interval(self.poll);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.recv() => break,
            }

            if !self.poll_once().await {
                break;
            }
        }

        tracing::debug!(session_id = %self.session_id, "equipment watcher stopped");
    }

    /// One poll of the status source. Returns `false` once the session is
    /// gone and the loop should end.
    async fn poll_once(&mut self) -> bool {
        let units = match self.source.equipment_health(&self.center_id).await {
            Ok(units) => units,
            Err(e) => {
                // A failed poll is itself an equipment finding: the lane is
                // running blind on equipment health.
                tracing::warn!(
                    session_id = %self.session_id,
                    center_id = %self.center_id,
                    error = %e,
                    "equipment status poll failed"
                );
                let finding = EquipmentHealth {
                    unit: "status_source".to_string(),
                    status: EquipmentState::Degraded,
                    detail: Some(e.to_string()),
                };
                return self.report_transition(finding).await;
            }
        };

        for unit in units {
            if !self.report_transition(unit).await {
                return false;
            }
        }
        true
    }

    async fn report_transition(&mut self, unit: EquipmentHealth) -> bool {
        let changed = self
            .last_seen
            .insert(unit.unit.clone(), unit.status)
            .map_or(
                // First sighting only reports when unhealthy.
                !unit.status.is_operational(),
                |previous| previous != unit.status,
            );
        if !changed {
            return true;
        }
        if unit.status.is_operational() {
            tracing::info!(
                session_id = %self.session_id,
                unit = %unit.unit,
                "equipment recovered"
            );
            return true;
        }
        self.manager.report_equipment(&self.session_id, &unit).await
    }
}
