//! Session management endpoints
//!
//! Handles creating, querying, advancing, resuming and cancelling sessions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use testlane_core::SequenceTemplate;

use super::AppState;
use crate::session::{SessionError, SessionSnapshot};

/// Request body for creating a session.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Vehicle under inspection
    pub vehicle_id: String,

    /// Testing center running the session
    pub center_id: String,

    /// Operator conducting the tests
    pub operator_id: String,

    /// Sequence template name
    #[serde(default = "default_template")]
    pub sequence: String,
}

fn default_template() -> String {
    "standard".to_string()
}

/// Response body for session creation.
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// The created session
    #[serde(flatten)]
    pub session: SessionSnapshot,

    /// WebSocket URL clients attach to
    pub stream_url: String,
}

/// Request body for advancing the sequence.
#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    /// The test type being completed; must be the current test
    pub test_type: String,
}

/// Request body for cancelling a session.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Cancellation reason
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "cancelled by operator".to_string()
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Map a session error onto an HTTP status and a stable error code.
fn error_response(err: &SessionError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match err {
        SessionError::NotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
        SessionError::Prerequisite(_) => (StatusCode::CONFLICT, "prerequisites_not_met"),
        SessionError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
        SessionError::Sequence(_) => (StatusCode::CONFLICT, "sequence_violation"),
        SessionError::Paused(_) => (StatusCode::CONFLICT, "session_paused"),
        SessionError::NotPaused(_) => (StatusCode::CONFLICT, "session_not_paused"),
        SessionError::NotActive { .. } => (StatusCode::GONE, "session_not_active"),
        SessionError::Monitoring(_) => (StatusCode::INTERNAL_SERVER_ERROR, "monitoring_error"),
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

/// Create a new test session
///
/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let Some(template) = SequenceTemplate::parse(&req.sequence) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: "unknown_sequence_template".to_string(),
                message: format!("unknown sequence template: {}", req.sequence),
            }),
        )
            .into_response();
    };

    match state
        .manager
        .create_session(&req.vehicle_id, &req.center_id, &req.operator_id, template)
        .await
    {
        Ok(session) => {
            let stream_url = format!(
                "ws://{}:{}/api/sessions/{}/stream",
                state.config.server.public_host,
                state.config.server.http_port,
                session.session_id
            );
            (
                StatusCode::CREATED,
                Json(CreateSessionResponse {
                    session,
                    stream_url,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

/// Get session status
///
/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.status(&session_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Complete the current test and move to the next one
///
/// POST /api/sessions/:id/advance
pub async fn advance_test(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<AdvanceRequest>,
) -> impl IntoResponse {
    match state.manager.advance(&session_id, &req.test_type).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Resume a paused session
///
/// POST /api/sessions/:id/resume
pub async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.resume(&session_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Cancel a session
///
/// DELETE /api/sessions/:id
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Option<Json<CancelRequest>>,
) -> impl IntoResponse {
    let reason = req.map(|Json(r)| r.reason).unwrap_or_else(default_cancel_reason);
    match state.manager.cancel(&session_id, &reason).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PrerequisiteError;
    use crate::session::SequenceError;
    use testlane_core::TestType;

    #[test]
    fn test_default_create_request_template() {
        let req: CreateSessionRequest = serde_json::from_str(
            r#"{"vehicle_id": "veh-1", "center_id": "center-1", "operator_id": "op-1"}"#,
        )
        .unwrap();
        assert_eq!(req.sequence, "standard");
    }

    #[test]
    fn test_error_mapping() {
        let (status, _) = error_response(&SessionError::NotFound("sess_1".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = error_response(&SessionError::Sequence(SequenceError::AlreadyCompleted(
            TestType::Speed,
        )));
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = error_response(&SessionError::Prerequisite(
            PrerequisiteError::VehicleBusy {
                vehicle_id: "veh-1".to_string(),
            },
        ));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.0.error, "prerequisites_not_met");
    }
}
