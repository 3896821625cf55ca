//! Route handlers and the seam to the connection manager.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Path, RawQuery, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Json, Response};
use outrelay_conn::{ConnError, ConnManager};
use outrelay_core::SessionId;
use tracing::{debug, info, warn};

use crate::extract::extract_line;
use crate::health::{self, HealthResponse};
use crate::server::AppState;

/// Operations the HTTP routes dispatch to.
#[async_trait]
pub trait LineHandler: Send + Sync + 'static {
    /// Relay one raw line; `Ok(true)` if this opened the session.
    async fn send(&self, id: &SessionId, raw_line: &str) -> Result<bool, ConnError>;
    /// Close the session.
    fn close_conn(&self, id: &SessionId) -> Result<(), ConnError>;
    /// Restart the session's keepalive window.
    fn keep_alive(&self, id: &SessionId) -> Result<(), ConnError>;
    /// Number of open sessions.
    fn open_sessions(&self) -> usize;
}

#[async_trait]
impl LineHandler for ConnManager {
    async fn send(&self, id: &SessionId, raw_line: &str) -> Result<bool, ConnError> {
        ConnManager::send(self, id, raw_line).await
    }

    fn close_conn(&self, id: &SessionId) -> Result<(), ConnError> {
        ConnManager::close_conn(self, id)
    }

    fn keep_alive(&self, id: &SessionId) -> Result<(), ConnError> {
        ConnManager::keep_alive(self, id)
    }

    fn open_sessions(&self) -> usize {
        ConnManager::open_sessions(self)
    }
}

/// HTTP status for a manager error.
pub fn status_for(err: &ConnError) -> StatusCode {
    match err {
        ConnError::InvalidLine(_) => StatusCode::BAD_REQUEST,
        ConnError::NoConnection { .. } | ConnError::NotOpen => StatusCode::NOT_FOUND,
        ConnError::SendFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Empty body on success, the status's reason phrase otherwise.
fn reply(status: StatusCode) -> Response {
    if status.is_success() {
        status.into_response()
    } else {
        (status, status.canonical_reason().unwrap_or_default()).into_response()
    }
}

/// Caller's address, when the listener recorded it.
#[derive(Debug, Clone, Copy)]
pub struct Remote(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for Remote {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => addr.fmt(f),
            None => f.write_str("unknown"),
        }
    }
}

/// GET /line/{id}?<line>
pub(crate) async fn line(
    State(state): State<AppState>,
    remote: Remote,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let id = SessionId::from(id);
    let raw = match extract_line(query.as_deref()) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%remote, session = %id, error = %err, "error extracting line");
            return reply(StatusCode::BAD_REQUEST);
        }
    };

    match state.handler.send(&id, &raw).await {
        Ok(opened) => {
            if opened {
                info!(%remote, session = %id, "opened new connection");
            }
            debug!(%remote, session = %id, line = %raw, "sent line");
            reply(StatusCode::OK)
        }
        Err(err) => {
            warn!(%remote, session = %id, error = %err, "error sending line");
            reply(status_for(&err))
        }
    }
}

/// GET /close/{id}
pub(crate) async fn close(
    State(state): State<AppState>,
    remote: Remote,
    Path(id): Path<String>,
) -> Response {
    let id = SessionId::from(id);
    match state.handler.close_conn(&id) {
        Ok(()) => {
            info!(%remote, session = %id, "closed connection");
            reply(StatusCode::OK)
        }
        Err(err) => {
            warn!(%remote, session = %id, error = %err, "error closing connection");
            reply(status_for(&err))
        }
    }
}

/// GET /keepalive/{id}
pub(crate) async fn keepalive(
    State(state): State<AppState>,
    remote: Remote,
    Path(id): Path<String>,
) -> Response {
    let id = SessionId::from(id);
    match state.handler.keep_alive(&id) {
        Ok(()) => {
            debug!(%remote, session = %id, "keepalive");
            reply(StatusCode::OK)
        }
        Err(err) => {
            warn!(%remote, session = %id, error = %err, "error handling keepalive");
            reply(status_for(&err))
        }
    }
}

/// GET /health
pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.handler.open_sessions(),
    ))
}
