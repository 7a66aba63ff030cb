//! HTTP surface.
//!
//! Same `axum::Router` + shared-state + `tower_http::cors::CorsLayer` shape
//! used elsewhere in this codebase for webhook bridges, generalised here
//! into the full chat-session REST surface, with the orchestrator and
//! session store passed in as shared state.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::GovRagError;
use crate::formatter::SourceLocator;
use crate::orchestrator::{ChatOrchestrator, ChatTurnRequest, StreamEvent};
use crate::session::SessionStore;
use crate::types::{Session, TurnMetadata};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub sessions: Arc<SessionStore>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health_check))
        .route("/api/chat/sessions", post(create_session).get(list_sessions))
        .route("/api/chat/sessions/:id", get(get_session))
        .route("/api/chat/sessions/:id/messages", post(send_message).delete(clear_messages))
        .route("/api/chat/sessions/:id/messages/stream", post(stream_message))
        .route("/api/chat/sessions/:id/interrupt", post(interrupt_session))
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "govrag-core chat API is running"
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    title: Option<String>,
    document_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session: Session,
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Json<SessionResponse> {
    let (title, doc_ids) = body
        .map(|b| (b.0.title, b.0.document_ids.unwrap_or_default()))
        .unwrap_or((None, Vec::new()));
    let session = state.sessions.create_with_doc_ids(title, doc_ids).await;
    Json(SessionResponse { session })
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SessionListResponse {
    sessions: Vec<Session>,
    page: usize,
    page_size: usize,
}

async fn list_sessions(State(state): State<AppState>, Query(params): Query<PageParams>) -> Json<SessionListResponse> {
    let page = params.page.unwrap_or(0);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 200);
    let sessions = state.sessions.list(page, page_size).await;
    Json(SessionListResponse { sessions, page, page_size })
}

async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .sessions
        .fetch(id)
        .await
        .ok_or(GovRagError::SessionNotFound { session_id: id.to_string() })?;
    Ok(Json(SessionResponse { session }))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    query: String,
    #[serde(default)]
    doc_ids: Vec<String>,
    #[serde(default)]
    reset_context: bool,
}

#[derive(Debug, Serialize)]
struct SendMessageResponse {
    answer: String,
    sources: Vec<SourceLocator>,
    metadata: TurnMetadata,
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let req = ChatTurnRequest {
        session_id: id,
        query: body.query,
        doc_ids: body.doc_ids,
        reset_context: body.reset_context,
    };
    let cancel = CancellationToken::new();
    let resp = state.orchestrator.handle_turn(req, cancel).await?;
    Ok(Json(SendMessageResponse { answer: resp.answer, sources: resp.sources, metadata: resp.metadata }))
}

async fn clear_messages(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.clear_turns(id).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn interrupt_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<serde_json::Value> {
    state.orchestrator.interrupt(id);
    Json(json!({ "ok": true }))
}

/// Newline-delimited JSON streaming body for `POST .../messages/stream`
///: `{status}`, `{content}`, `{complete, answer, sources,
/// metadata}`, or a single terminal `{error, message}`.
async fn stream_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let req = ChatTurnRequest {
        session_id: id,
        query: body.query,
        doc_ids: body.doc_ids,
        reset_context: body.reset_context,
    };
    let cancel = CancellationToken::new();
    let rx = state.orchestrator.clone().handle_turn_streaming(req, cancel).await?;

    let body = axum::body::Body::from_stream(NdjsonStream { receiver: rx });
    Ok(Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(body)
        .unwrap())
}

struct NdjsonStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl Stream for NdjsonStream {
    type Item = Result<Bytes, std::convert::Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                let mut line = serde_json::to_vec(&ndjson_value(&event)).unwrap_or_default();
                line.push(b'\n');
                Poll::Ready(Some(Ok(Bytes::from(line))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn ndjson_value(event: &StreamEvent) -> serde_json::Value {
    match event {
        StreamEvent::Status(status) => json!({ "status": status }),
        StreamEvent::Content(content) => json!({ "content": content }),
        StreamEvent::Complete { answer, sources, metadata } => {
            json!({ "complete": true, "answer": answer, "sources": sources, "metadata": metadata })
        }
        StreamEvent::Error { error, message } => json!({ "error": error, "message": message }),
    }
}

/// Maps `GovRagError` to a stable client code / HTTP status / the
/// Korean user-facing message, except `InsufficientEvidence` which is
/// success-shaped and never reaches this conversion (the orchestrator
/// returns it as an `Ok` answer, not an `Err`).
struct ApiError(GovRagError);

impl From<GovRagError> for ApiError {
    fn from(e: GovRagError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GovRagError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            GovRagError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            GovRagError::SessionBusy { .. } => StatusCode::CONFLICT,
            GovRagError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            GovRagError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GovRagError::Cancelled => StatusCode::BAD_REQUEST,
            GovRagError::ModelUnavailable { .. } | GovRagError::RetrievalUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GovRagError::InsufficientEvidence => StatusCode::OK,
            GovRagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.code(), "message": self.0.user_message() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_value_renders_expected_shapes() {
        let status = ndjson_value(&StreamEvent::Status("retrieving".into()));
        assert_eq!(status["status"], "retrieving");

        let content = ndjson_value(&StreamEvent::Content("hello".into()));
        assert_eq!(content["content"], "hello");

        let error = ndjson_value(&StreamEvent::Error { error: "timeout".into(), message: "시간 초과".into() });
        assert_eq!(error["error"], "timeout");
    }
}
