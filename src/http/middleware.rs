//! Axum middleware running the admission guard in front of a service.

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::instrument;

use super::client_ip::client_address;
use super::response::rejection_response;
use crate::ratelimit::{AdmissionGuard, Decision, RequestDescriptor};

/// Maps a request to its logical endpoint and action identifiers.
pub type EndpointResolver = Arc<dyn Fn(&Request) -> Option<(String, Option<String>)> + Send + Sync>;

/// Shared state for [`admission_middleware`].
#[derive(Clone)]
pub struct AdmissionState {
    guard: Arc<AdmissionGuard>,
    trust_proxy_headers: bool,
    rejection_message: Arc<str>,
    resolver: Option<EndpointResolver>,
}

impl AdmissionState {
    pub fn new(guard: Arc<AdmissionGuard>) -> Self {
        Self {
            guard,
            trust_proxy_headers: false,
            rejection_message: Arc::from("Rate limit exceeded. Try again later."),
            resolver: None,
        }
    }

    pub fn with_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn with_rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = Arc::from(message.into());
        self
    }

    pub fn with_endpoint_resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn guard(&self) -> &Arc<AdmissionGuard> {
        &self.guard
    }

    pub fn rejection_message(&self) -> &str {
        &self.rejection_message
    }

    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    /// Build the guard's view of `request`.
    pub fn describe(&self, request: &Request) -> RequestDescriptor {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let mut descriptor = RequestDescriptor::new(request.method().as_str(), request.uri().path());
        descriptor.client_address = client_address(request.headers(), peer, self.trust_proxy_headers);
        if let Some((endpoint, action)) = self.resolver.as_ref().and_then(|r| r(request)) {
            descriptor = descriptor.with_endpoint(endpoint, action);
        }
        descriptor
    }
}

/// Resolver using the matched route template as the endpoint identifier.
///
/// Only available when the middleware is installed with `route_layer`.
pub fn matched_route_endpoint() -> EndpointResolver {
    Arc::new(|request: &Request| {
        request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| (path.as_str().to_string(), None))
    })
}

/// Axum middleware for request admission.
///
/// Install with `axum::middleware::from_fn_with_state(state, admission_middleware)`.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let descriptor = state.describe(&request);
    match state.guard.check(&descriptor).await {
        Decision::Admit => next.run(request).await,
        Decision::Reject(violation) => {
            rejection_response(request.headers(), &state.rejection_message, &violation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{MemoryCounterStore, QuotaEvaluator, Rule, RuleSet};
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::middleware::from_fn_with_state;
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    fn state(rules: Vec<Rule>) -> AdmissionState {
        let store = Arc::new(MemoryCounterStore::new());
        let backend = Arc::new(QuotaEvaluator::new(store));
        let guard = AdmissionGuard::new(RuleSet::compile(rules).unwrap(), backend);
        AdmissionState::new(Arc::new(guard)).with_proxy_headers(true)
    }

    fn app(state: AdmissionState) -> Router {
        Router::new()
            .route("/api/login", post(|| async { "welcome" }))
            .route("/api/products/:sku", get(|| async { "product" }))
            .layer(from_fn_with_state(state, admission_middleware))
    }

    fn login_request() -> axum::http::Request<Body> {
        axum::http::Request::post("/api/login")
            .header("x-forwarded-for", "203.0.113.7")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_blocks_after_quota() {
        let app = app(state(vec![Rule::new()
            .with_methods(["POST"])
            .for_url_path("api/login")
            .per_minute(2)]));

        for _ in 0..2 {
            let response = app.clone().oneshot(login_request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(login_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unmatched_routes_pass() {
        let app = app(state(vec![Rule::new()
            .with_methods(["POST"])
            .for_url_path("api/login")
            .per_second(1)]));

        for _ in 0..3 {
            let request = axum::http::Request::get("/api/products/abc")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_matched_route_resolver() {
        let state = state(vec![Rule::new()
            .with_methods(["GET"])
            .for_any_action_of("/api/products/:sku")
            .per_minute(1)])
        .with_endpoint_resolver(matched_route_endpoint());

        let app = Router::new()
            .route("/api/products/:sku", get(|| async { "product" }))
            .route_layer(from_fn_with_state(state, admission_middleware));

        let request = |sku: &str| {
            axum::http::Request::get(format!("/api/products/{}", sku))
                .header("x-forwarded-for", "203.0.113.7")
                .header(header::REFERER, "/catalog")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request("a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request("b")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/catalog");
    }
}
