//! Streaming connection hub
//!
//! Registry of live client connections per session. The hub owns admission
//! control, the bounded replay buffer, per-connection heartbeats and the
//! broadcast fan-out. Connections are never persisted; a session outlives
//! any of its connections and a connection never outlives its session.
//!
//! Delivery is best-effort and isolated: a failed delivery removes that
//! connection only and never delays or aborts the remaining deliveries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::auth::Identity;
use crate::clock::Clock;
use crate::config::HubSettings;
use crate::metrics::global_metrics;
use crate::protocol::ServerEvent;

/// Why a connection was refused.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("session already has the maximum of {limit} concurrent clients")]
    SessionFull { limit: usize },

    #[error("client channel closed during admission")]
    ChannelClosed,
}

/// One live streaming client attached to a session.
struct ClientConnection {
    user_id: String,
    connected_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    tx: mpsc::Sender<ServerEvent>,
    heartbeat_task: Option<JoinHandle<()>>,
}

/// Per-session connection set and replay buffer.
#[derive(Default)]
struct SessionChannel {
    clients: HashMap<String, ClientConnection>,
    buffer: VecDeque<ServerEvent>,
}

/// Registry of streaming connections, keyed by session.
pub struct ConnectionHub {
    sessions: RwLock<HashMap<String, SessionChannel>>,
    settings: HubSettings,
    clock: Arc<dyn Clock>,
}

impl ConnectionHub {
    /// Create a hub with the given limits and clock.
    pub fn new(settings: HubSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
            clock,
        }
    }

    /// Admit a new client to a session.
    ///
    /// On success the client immediately receives `connection_established`
    /// followed by the session's buffered events, in order, before any new
    /// broadcast. The caller's channel must have capacity for at least the
    /// buffer size plus one; deliveries never block.
    pub async fn admit(
        self: &Arc<Self>,
        session_id: &str,
        identity: &Identity,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<String, AdmissionError> {
        let mut sessions = self.sessions.write().await;
        let channel = sessions.entry(session_id.to_string()).or_default();

        if channel.clients.len() >= self.settings.max_clients_per_session {
            return Err(AdmissionError::SessionFull {
                limit: self.settings.max_clients_per_session,
            });
        }

        let client_id = format!(
            "client_{}_{}",
            identity.user_id,
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );

        // Replay happens under the registry lock so no broadcast can
        // interleave before the client has caught up.
        tx.try_send(ServerEvent::ConnectionEstablished {
            client_id: client_id.clone(),
            session_id: session_id.to_string(),
        })
        .map_err(|_| AdmissionError::ChannelClosed)?;
        for event in channel.buffer.iter() {
            tx.try_send(event.clone())
                .map_err(|_| AdmissionError::ChannelClosed)?;
        }

        let now = self.clock.now();
        channel.clients.insert(
            client_id.clone(),
            ClientConnection {
                user_id: identity.user_id.clone(),
                connected_at: now,
                last_heartbeat: now,
                tx,
                heartbeat_task: None,
            },
        );
        drop(sessions);

        let handle = tokio::spawn(Self::run_heartbeat(
            Arc::clone(self),
            session_id.to_string(),
            client_id.clone(),
        ));
        let mut sessions = self.sessions.write().await;
        match sessions
            .get_mut(session_id)
            .and_then(|channel| channel.clients.get_mut(&client_id))
        {
            Some(connection) => connection.heartbeat_task = Some(handle),
            // The session was closed between the two locks.
            None => handle.abort(),
        }

        global_metrics().connection_opened();
        tracing::info!(
            session_id = %session_id,
            client_id = %client_id,
            user_id = %identity.user_id,
            "client connected"
        );
        Ok(client_id)
    }

    /// Record a heartbeat (client ping or pong) for a connection.
    pub async fn heartbeat(&self, session_id: &str, client_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(connection) = sessions
            .get_mut(session_id)
            .and_then(|channel| channel.clients.get_mut(client_id))
        {
            connection.last_heartbeat = self.clock.now();
        }
    }

    /// Broadcast an event to every connection on a session.
    ///
    /// The event is appended to the session's bounded replay buffer first.
    /// A delivery failure on one connection removes only that connection.
    pub async fn broadcast(&self, session_id: &str, event: ServerEvent) {
        let mut sessions = self.sessions.write().await;
        let channel = sessions.entry(session_id.to_string()).or_default();

        channel.buffer.push_back(event.clone());
        while channel.buffer.len() > self.settings.message_buffer_size {
            channel.buffer.pop_front();
        }

        let mut dropped = Vec::new();
        for (client_id, connection) in channel.clients.iter() {
            if connection.tx.try_send(event.clone()).is_err() {
                dropped.push(client_id.clone());
            } else {
                global_metrics().event_broadcast();
            }
        }

        for client_id in dropped {
            if let Some(connection) = channel.clients.remove(&client_id) {
                if let Some(task) = connection.heartbeat_task {
                    task.abort();
                }
                global_metrics().connection_closed();
                tracing::warn!(
                    session_id = %session_id,
                    client_id = %client_id,
                    "delivery failed, connection removed"
                );
            }
        }
    }

    /// Send an event to one connection only (replies, error frames).
    pub async fn send_to(&self, session_id: &str, client_id: &str, event: ServerEvent) {
        let mut sessions = self.sessions.write().await;
        let Some(channel) = sessions.get_mut(session_id) else {
            return;
        };
        let failed = match channel.clients.get(client_id) {
            Some(connection) => connection.tx.try_send(event).is_err(),
            None => false,
        };
        if failed {
            if let Some(connection) = channel.clients.remove(client_id) {
                if let Some(task) = connection.heartbeat_task {
                    task.abort();
                }
                global_metrics().connection_closed();
                tracing::warn!(
                    session_id = %session_id,
                    client_id = %client_id,
                    "delivery failed, connection removed"
                );
            }
        }
    }

    /// Remove a single connection, aborting its heartbeat task.
    ///
    /// Returns whether the connection existed. The session, its buffer and
    /// its other connections are unaffected.
    pub async fn remove(&self, session_id: &str, client_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(channel) = sessions.get_mut(session_id) else {
            return false;
        };
        let Some(connection) = channel.clients.remove(client_id) else {
            return false;
        };
        if let Some(task) = connection.heartbeat_task {
            task.abort();
        }
        global_metrics().connection_closed();
        tracing::info!(
            session_id = %session_id,
            client_id = %client_id,
            user_id = %connection.user_id,
            "client disconnected"
        );
        true
    }

    /// Close a session: remove every connection and discard the buffer.
    ///
    /// Used on terminal session transitions. Idempotent.
    pub async fn close(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(channel) = sessions.remove(session_id) else {
            return;
        };
        let count = channel.clients.len();
        for (_, connection) in channel.clients {
            if let Some(task) = connection.heartbeat_task {
                task.abort();
            }
            global_metrics().connection_closed();
        }
        tracing::info!(
            session_id = %session_id,
            connections = count,
            "session stream closed, buffer discarded"
        );
    }

    /// Number of live connections on a session.
    pub async fn connection_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|channel| channel.clients.len())
            .unwrap_or(0)
    }

    /// Number of buffered events for a session.
    pub async fn buffered_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|channel| channel.buffer.len())
            .unwrap_or(0)
    }

    /// Age of a connection, if it exists.
    pub async fn connected_since(&self, session_id: &str, client_id: &str) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|channel| channel.clients.get(client_id))
            .map(|connection| connection.connected_at)
    }

    /// Per-connection heartbeat loop.
    ///
    /// Pings on a fixed interval; a connection that has not heartbeated
    /// within the timeout is force-closed. Other connections and the
    /// session itself are unaffected.
    async fn run_heartbeat(hub: Arc<ConnectionHub>, session_id: String, client_id: String) {
        loop {
            tokio::time::sleep(hub.settings.heartbeat_interval).await;

            let view = {
                let sessions = hub.sessions.read().await;
                sessions
                    .get(&session_id)
                    .and_then(|channel| channel.clients.get(&client_id))
                    .map(|connection| (connection.tx.clone(), connection.last_heartbeat))
            };
            let Some((tx, last_heartbeat)) = view else {
                break;
            };

            if hub.clock.now() - last_heartbeat > hub.settings.heartbeat_timeout {
                tracing::warn!(
                    session_id = %session_id,
                    client_id = %client_id,
                    "heartbeat timed out, closing connection"
                );
                hub.remove(&session_id, &client_id).await;
                break;
            }

            if tx.try_send(ServerEvent::Ping).is_err() {
                hub.remove(&session_id, &client_id).await;
                break;
            }
        }
    }
}
