//! Per-session supervision task
//!
//! One supervisor runs per active session. It wakes on a fixed tick and on
//! every accepted measurement, and delegates the actual checks (inactivity
//! timeout, data gaps, alert escalation) to the session manager, which owns
//! the registry lock. The loop ends when the session reaches a terminal
//! state or the shutdown signal fires; both paths are idempotent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

use crate::session::SessionManager;

/// Long-lived monitoring task for one session.
pub struct SessionSupervisor {
    manager: Arc<SessionManager>,
    session_id: String,
    wake: Arc<Notify>,
    tick: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl SessionSupervisor {
    /// Create a supervisor for a session.
    pub fn new(
        manager: Arc<SessionManager>,
        session_id: String,
        wake: Arc<Notify>,
        tick: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            manager,
            session_id,
            wake,
            tick,
            shutdown,
        }
    }

    /// Run the supervision loop until the session ends.
    pub async fn run(mut self) {
        tracing::debug!(session_id = %self.session_id, "session supervisor started");
        let mut ticker = tokio::time::interval(self.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = self.shutdown.recv() => break,
            }

            if !self.manager.supervisor_pass(&self.session_id).await {
                break;
            }
        }

        tracing::debug!(session_id = %self.session_id, "session supervisor stopped");
    }
}
