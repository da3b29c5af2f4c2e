//! Test-Session Gateway
//!
//! Live coordination of vehicle-inspection test sessions. Equipment pushes
//! measurement frames over a WebSocket; the gateway validates them against
//! engineering thresholds, screens for anomalies, persists them, and fans
//! the updates out to every observer attached to the session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          testlane-gateway                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  ┌──────────────────┐                                                │
//! │  │  HTTP API Server │ ← POST /api/sessions                           │
//! │  │  (axum)          │ ← GET  /api/sessions/:id/stream (WebSocket)    │
//! │  └────────┬─────────┘                                                │
//! │           │ creates                                                  │
//! │           ▼                                                          │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐  │
//! │  │  SessionManager  │──▶│  Validator +     │──▶│  ConnectionHub   │  │
//! │  │  (sessions map)  │   │  AnomalyDetector │   │  (fan-out +      │  │
//! │  └────────┬─────────┘   │  (testlane-core) │   │   heartbeats)    │  │
//! │           │ spawns      └──────────────────┘   └──────────────────┘  │
//! │           ▼                                                          │
//! │  ┌──────────────────┐   ┌──────────────────┐                         │
//! │  │ SessionSupervisor│   │ EquipmentWatcher │   per active session    │
//! │  │ (timeouts, gaps, │   │ (center health   │                         │
//! │  │  escalation)     │   │  polling)        │                         │
//! │  └──────────────────┘   └──────────────────┘                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Persistence, identity, notification delivery and the equipment status
//! feed live behind the narrow traits in [`ports`]; everything is injected
//! at construction time.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod equipment;
pub mod hub;
pub mod metrics;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod supervisor;
