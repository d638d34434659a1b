use crate::rate_limit::{self, RateLimiter};
use answerpipe_core::Error;
use answerpipe_local::{AnswerEngine, AnswerRequest};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const CHAT_ROUTE: &str = "/api/chat";

pub const NO_USABLE_CONTENT_MESSAGE: &str = "Unable to extract content from the provided URLs. Please check if the URLs are accessible and contain readable content.";
pub const GENERIC_ERROR_MESSAGE: &str =
    "An error occurred while processing your request. Please try again later.";

#[derive(Clone)]
pub struct AppState {
    pub engine: AnswerEngine,
}

/// `POST /api/chat` behind the per-IP rate limiter.
pub fn router(engine: AnswerEngine, limiter: Arc<dyn RateLimiter>) -> Router {
    Router::new()
        .route(CHAT_ROUTE, post(chat))
        .layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Status and JSON body for a failed request. Never includes more than a short cause string.
pub fn error_body(err: &Error) -> (StatusCode, serde_json::Value) {
    match err {
        Error::InvalidRequest(m) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": m }),
        ),
        Error::NoUsableContent => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": NO_USABLE_CONTENT_MESSAGE }),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "error": GENERIC_ERROR_MESSAGE,
                "details": other.to_string(),
            }),
        ),
    }
}

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = error_body(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "error in chat route");
        } else {
            tracing::info!(error = %self.0, "rejected chat request");
        }
        (status, Json(body)).into_response()
    }
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let req: AnswerRequest = serde_json::from_slice(&body)
        .map_err(|e| Error::Decode(e.to_string()))?;
    let out = state.engine.answer(req).await?;
    Ok((StatusCode::OK, Json(out)).into_response())
}
