//! HTTP ingress: rate limiting, task creation and lookup.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info_span, warn};

use bobbin_core::app::{Pipeline, RateLimiter, TaskService};
use bobbin_core::domain::{CorrelationId, ErrorKind, PipelineError, TaskId};

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub service: TaskService,
    pub limiter: Option<RateLimiter>,
    pub trust_client_id_header: bool,
}

impl AppState {
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self {
            service: pipeline.task_service().clone(),
            limiter: pipeline.rate_limiter().cloned(),
            trust_client_id_header: pipeline.config().http.trust_client_id_header,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task))
        .route("/tasks/:id", get(get_task))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub payload: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error response carrying the correlation id of the request.
struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
    correlation_id: CorrelationId,
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retry_after: None,
            correlation_id: correlation_id.clone(),
        }
    }

    fn from_pipeline(err: PipelineError, correlation_id: &CorrelationId) -> Self {
        let (status, retry_after) = match &err {
            PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            PipelineError::RateLimited { retry_after, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after))
            }
            other => {
                warn!(error = %other, kind = other.kind().as_str(), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        // internals stay in the log
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR
            && err.kind() == ErrorKind::Infrastructure
        {
            "internal error".to_string()
        } else {
            err.to_string()
        };
        Self {
            status,
            message,
            retry_after,
            correlation_id: correlation_id.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(ErrorBody { error: self.message })).into_response();
        if let Some(retry_after) = self.retry_after {
            // whole seconds, never 0
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        with_correlation(response, &self.correlation_id)
    }
}

fn with_correlation(mut response: Response, correlation_id: &CorrelationId) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

fn correlation_from(headers: &HeaderMap) -> CorrelationId {
    CorrelationId::from_header(
        headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
    )
}

/// The peer IP, else `anonymous`. `X-Client-Id` wins only when the
/// deployment trusts the proxy that sets it.
fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>, trust_header: bool) -> String {
    let from_header = || {
        headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    trust_header
        .then(from_header)
        .flatten()
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn health() -> &'static str {
    "ok"
}

async fn create_task(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Response {
    let correlation_id = correlation_from(&headers);
    let client = client_identity(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_client_id_header,
    );
    let span = info_span!("http.create_task", %correlation_id, client = %client);

    async {
        if let Some(limiter) = &state.limiter
            && let Err(err) = limiter.try_acquire(&client).await
        {
            return ApiError::from_pipeline(err, &correlation_id).into_response();
        }

        let Json(request) = match body {
            Ok(body) => body,
            Err(rejection) => {
                return ApiError::bad_request(rejection.body_text(), &correlation_id)
                    .into_response();
            }
        };

        match state.service.create_task(&request.payload, &correlation_id).await {
            Ok(task) => with_correlation(
                (StatusCode::CREATED, Json(task)).into_response(),
                &correlation_id,
            ),
            Err(err) => ApiError::from_pipeline(err, &correlation_id).into_response(),
        }
    }
    .instrument(span)
    .await
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let correlation_id = correlation_from(&headers);

    let id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(err) => {
            return ApiError::bad_request(format!("{err}"), &correlation_id).into_response();
        }
    };

    match state.service.get_task(id).await {
        Ok(task) => with_correlation(Json(task).into_response(), &correlation_id),
        Err(err) => ApiError::from_pipeline(err, &correlation_id).into_response(),
    }
}
