//! Forward-auth HTTP server.
//!
//! Reverse proxies (nginx `auth_request`, Traefik `ForwardAuth`, Envoy
//! `ext_authz` in HTTP mode) call `/check` before forwarding a request.
//! The original request is described by `X-Forwarded-*` headers; a `200`
//! admits it and any other response is returned to the client as-is.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use super::client_ip::client_address;
use super::middleware::AdmissionState;
use super::response::rejection_response;
use crate::error::{GuardError, Result};
use crate::ratelimit::{Decision, RequestDescriptor};

const X_FORWARDED_METHOD: &str = "x-forwarded-method";
const X_FORWARDED_URI: &str = "x-forwarded-uri";
const X_ENDPOINT: &str = "x-quotaguard-endpoint";
const X_ACTION: &str = "x-quotaguard-action";

/// Build the forward-auth router.
pub fn router(state: AdmissionState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(stats))
        .route("/check", any(check))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn stats(State(state): State<AdmissionState>) -> Response {
    let stats = state.guard().stats();
    Json(serde_json::json!({
        "checked": stats.checked,
        "rejected": stats.rejected,
        "store_failures": stats.store_failures,
        "rules": state.guard().rules().len(),
    }))
    .into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Describe the proxied request from the forwarded headers.
pub fn forwarded_descriptor(
    headers: &HeaderMap,
    fallback_method: &str,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> RequestDescriptor {
    let method = header(headers, X_FORWARDED_METHOD).unwrap_or(fallback_method);
    let uri = header(headers, X_FORWARDED_URI).unwrap_or("/");
    let path = uri.split(['?', '#']).next().unwrap_or_default();

    let mut descriptor = RequestDescriptor::new(method.to_ascii_uppercase(), path);
    descriptor.client_address = client_address(headers, peer, trust_proxy_headers);
    if let Some(endpoint) = header(headers, X_ENDPOINT) {
        descriptor =
            descriptor.with_endpoint(endpoint, header(headers, X_ACTION).map(str::to_string));
    }
    descriptor
}

#[instrument(skip_all)]
async fn check(State(state): State<AdmissionState>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let headers = request.headers();
    let descriptor = forwarded_descriptor(
        headers,
        request.method().as_str(),
        peer,
        state.trust_proxy_headers(),
    );

    match state.guard().check(&descriptor).await {
        Decision::Admit => StatusCode::OK.into_response(),
        Decision::Reject(violation) => {
            rejection_response(headers, state.rejection_message(), &violation)
        }
    }
}

/// HTTP server for the forward-auth service.
pub struct GuardServer {
    /// Address to bind to
    addr: SocketAddr,
    state: AdmissionState,
}

impl GuardServer {
    pub fn new(addr: SocketAddr, state: AdmissionState) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting forward-auth server");

        axum::serve(
            listener,
            router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GuardError::Server(e.to_string())
        })
    }
}
