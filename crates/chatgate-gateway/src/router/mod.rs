//! HTTP routes for Chatgate Gateway

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{
        header::{ACCESS_CONTROL_ALLOW_HEADERS, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chatgate_runtime::CompletionStream;
use futures::TryStreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::API_KEY_ENV;
use crate::error::GatewayError;
use crate::metrics::{self, REQUESTS_TOTAL};
use crate::proxy::CompletionProxy;

/// Shared, read-only state of the gateway
#[derive(Clone)]
pub struct AppState {
    proxy: Option<Arc<CompletionProxy>>,
}

impl AppState {
    pub fn new(proxy: Arc<CompletionProxy>) -> Self {
        Self { proxy: Some(proxy) }
    }

    /// State for a process started without the upstream credential: every
    /// chat request fails until it is configured.
    pub fn without_credential() -> Self {
        Self { proxy: None }
    }
}

/// Request headers browser clients may send
const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Build the main router for the gateway
pub fn build_routes(state: AppState) -> Router {
    // The CORS layer answers every OPTIONS request itself, so no route
    // handles preflight.
    Router::new()
        .route("/", post(chat))
        .route("/v1/chat", post(chat))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_export))
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(cors_layer())
        .with_state(state)
}

/// CORS policy for browser chat clients
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            CONTENT_TYPE,
        ])
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_export() -> Result<String, GatewayError> {
    Ok(metrics::export()?)
}

/// Chat endpoint: streams the upstream completion back as an event stream
async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let span = info_span!("chat", request_id = %Uuid::new_v4());

    let result = match state.proxy.as_ref() {
        Some(proxy) => proxy.handle(&body).instrument(span.clone()).await,
        None => Err(GatewayError::application(format!(
            "Missing environment variable {API_KEY_ENV}"
        ))),
    };

    span.in_scope(|| match result {
        Ok(stream) => {
            REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
            event_stream(stream, span.clone())
        }
        Err(err) => {
            REQUESTS_TOTAL.with_label_values(&[err.kind()]).inc();
            err.into_response()
        }
    })
}

/// Relays upstream bytes as they arrive. If the caller goes away the body is
/// dropped, which drops the upstream stream and releases its connection.
fn event_stream(stream: CompletionStream, span: tracing::Span) -> Response {
    let relayed = stream.inspect_err(move |e| {
        span.in_scope(|| warn!(error = %e, "Upstream stream failed mid-response"));
    });

    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(relayed),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = build_routes(AppState::without_credential());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_credential_fails_every_chat_request() {
        let app = build_routes(AppState::without_credential());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_HEADERS], ALLOWED_HEADERS);
    }

    #[tokio::test]
    async fn metrics_endpoint_exports_text() {
        metrics::init_metrics();
        let app = build_routes(AppState::without_credential());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
