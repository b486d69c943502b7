use super::state::AppState;
use crate::error::SessionError;
use crate::session::{SessionState, SessionStatus};
use crate::transcript::Message;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartVoiceResponse {
    pub session_id: String,
    pub state: SessionState,
    pub remaining_quota: u32,
}

#[derive(Debug, Serialize)]
pub struct StopVoiceResponse {
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A `SessionError` rendered with its HTTP status
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            SessionError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            SessionError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            SessionError::InvalidState(_) => StatusCode::CONFLICT,
            SessionError::SessionOpenFailed(_) | SessionError::ChannelError(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/start
/// Open a voice session
pub async fn start_voice(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let session_id = state.session.start().await?;
    let status = state.session.status();

    info!("Voice session started: {}", session_id);

    Ok((
        StatusCode::OK,
        Json(StartVoiceResponse {
            session_id,
            state: status.state,
            remaining_quota: status.remaining_quota,
        }),
    ))
}

/// POST /voice/stop
/// Close the current voice session (no-op while idle)
pub async fn stop_voice(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.session.stop().await?;

    Ok((
        StatusCode::OK,
        Json(StopVoiceResponse {
            state: state.session.status().state,
            message: "Voice session stopped".to_string(),
        }),
    ))
}

/// GET /voice/status
pub async fn voice_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.status())
}

/// POST /chat/text
/// Send one text turn and return the agent's reply
pub async fn send_text(
    State(state): State<AppState>,
    Json(req): Json<SendTextRequest>,
) -> Result<Response, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "text must not be empty".to_string(),
            }),
        )
            .into_response());
    }

    let reply = state.session.send_text_turn(text).await?;
    Ok(Json(reply).into_response())
}

/// GET /chat/history
pub async fn chat_history(State(state): State<AppState>) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.session.history().await?))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
