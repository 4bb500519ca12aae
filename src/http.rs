//! HTTP side of the front end: the route table handlers register into, and the
//! axum adapter that turns each request into an [`AsyncExchange`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::Instrument;

use crate::front_end::FrontEndError;
use crate::front_end::context::CLAIMED_IDENTITY_HEADER;
use crate::front_end::exchange::{AsyncExchange, AuthContext, HttpRequest, HttpResponse};
use crate::metrics_prometheus::PrometheusRegistry;

/// Handler for one (method, path). `Err` means the exchange was not finished
/// and the adapter answers with the error itself.
pub type ResourceHandler = Arc<dyn Fn(AsyncExchange) -> Result<(), FrontEndError> + Send + Sync>;

pub trait ResourceRegistry {
    fn register_resource_handler(&mut self, method: Method, path: &str, handler: ResourceHandler);
}

pub trait AuthContextResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> AuthContext;
}

/// Trusts the claimed identity header as the authorized domain. Suitable only
/// behind a proxy that has already authenticated the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughAuthResolver;

impl AuthContextResolver for PassThroughAuthResolver {
    fn resolve(&self, headers: &HeaderMap) -> AuthContext {
        AuthContext {
            authorized_domain: extract_header(headers, CLAIMED_IDENTITY_HEADER),
        }
    }
}

#[derive(Clone, Default)]
pub struct HttpRouteTable {
    routes: HashMap<(Method, String), ResourceHandler>,
}

impl std::fmt::Debug for HttpRouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<String> = self
            .routes
            .keys()
            .map(|(method, path)| format!("{method} {path}"))
            .collect();
        routes.sort();
        f.debug_struct("HttpRouteTable")
            .field("routes", &routes)
            .finish()
    }
}

impl HttpRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn contains(&self, method: &Method, path: &str) -> bool {
        self.routes
            .contains_key(&(method.clone(), path.to_string()))
    }

    fn handler(&self, method: &Method, path: &str) -> Option<ResourceHandler> {
        self.routes
            .get(&(method.clone(), path.to_string()))
            .cloned()
    }
}

impl ResourceRegistry for HttpRouteTable {
    fn register_resource_handler(&mut self, method: Method, path: &str, handler: ResourceHandler) {
        if self
            .routes
            .insert((method.clone(), path.to_string()), handler)
            .is_some()
        {
            tracing::warn!(%method, path, "replaced an existing resource handler");
        }
    }
}

#[derive(Clone)]
pub struct FrontEndHttpState {
    routes: Arc<HttpRouteTable>,
    auth: Arc<dyn AuthContextResolver>,
    max_body_bytes: usize,
    prometheus: Option<Arc<PrometheusRegistry>>,
}

impl FrontEndHttpState {
    pub fn new(routes: HttpRouteTable) -> Self {
        Self {
            routes: Arc::new(routes),
            auth: Arc::new(PassThroughAuthResolver),
            max_body_bytes: 8 * 1024 * 1024,
            prometheus: None,
        }
    }

    pub fn with_auth_resolver(mut self, auth: Arc<dyn AuthContextResolver>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes.max(1);
        self
    }

    pub fn with_prometheus_registry(mut self, registry: Arc<PrometheusRegistry>) -> Self {
        self.prometheus = Some(registry);
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

pub fn router(state: FrontEndHttpState) -> Router {
    let mut router = Router::new();
    if state.prometheus.is_some() {
        router = router.route("/metrics/prometheus", get(metrics_prometheus));
    }
    router.fallback(dispatch).with_state(state)
}

async fn metrics_prometheus(State(state): State<FrontEndHttpState>) -> Response {
    let Some(registry) = state.prometheus.as_ref() else {
        return error_response(
            StatusCode::NOT_FOUND,
            "not_configured",
            "prometheus metrics not enabled",
        );
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    (StatusCode::OK, headers, registry.render()).into_response()
}

async fn dispatch(State(state): State<FrontEndHttpState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let span = tracing::info_span!("front_end.request", method = %parts.method, path = %path);

    async move {
        let Some(handler) = state.routes.handler(&parts.method, &path) else {
            return error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("no handler for {} {path}", parts.method),
            );
        };

        let body = match to_bytes(body, state.max_body_bytes).await {
            Ok(body) => body,
            Err(err) => {
                let reason = format!("failed to read request body: {err}");
                let err = FrontEndError::invalid_request(reason);
                return exchange_response(Err(err), HttpResponse::default());
            }
        };

        let request = HttpRequest {
            method: parts.method,
            auth_context: state.auth.resolve(&parts.headers),
            headers: parts.headers,
            path,
            body,
        };
        let (exchange, completion) = AsyncExchange::new(request);
        if let Err(err) = handler(exchange) {
            tracing::debug!(error = %err, "request rejected before dispatch");
            return exchange_response(Err(err), HttpResponse::default());
        }

        match completion.wait().await {
            Some(outcome) => exchange_response(outcome.result, outcome.response),
            None => {
                tracing::error!("exchange dropped without completion");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "exchange_dropped",
                    "request was accepted but never completed",
                )
            }
        }
    }
    .instrument(span)
    .await
}

fn exchange_response(result: Result<(), FrontEndError>, response: HttpResponse) -> Response {
    let HttpResponse { mut headers, body } = response;
    match result {
        Ok(()) => (StatusCode::OK, headers, body).into_response(),
        Err(err) if body.is_empty() => {
            let status = err.status();
            let error = ErrorResponse {
                error: ErrorDetail {
                    code: err.code(),
                    message: err.to_string(),
                },
            };
            (status, headers, Json(error)).into_response()
        }
        Err(err) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            (err.status(), headers, body).into_response()
        }
    }
}

fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }),
    )
        .into_response()
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_resolver_uses_claimed_identity() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            PassThroughAuthResolver.resolve(&headers),
            AuthContext::default()
        );

        headers.insert(
            CLAIMED_IDENTITY_HEADER,
            HeaderValue::from_static(" adtech.test "),
        );
        let auth = PassThroughAuthResolver.resolve(&headers);
        assert_eq!(auth.authorized_domain.as_deref(), Some("adtech.test"));
    }

    #[test]
    fn registering_twice_replaces_the_handler() {
        let mut table = HttpRouteTable::new();
        table.register_resource_handler(Method::POST, "/a", Arc::new(|_| Ok(())));
        table.register_resource_handler(
            Method::POST,
            "/a",
            Arc::new(|_| Err(FrontEndError::NotFound)),
        );
        assert_eq!(table.len(), 1);
        assert!(table.contains(&Method::POST, "/a"));
        assert!(!table.contains(&Method::GET, "/a"));
    }

    #[test]
    fn error_without_body_renders_error_json() {
        let response = exchange_response(
            Err(FrontEndError::NoKeysAvailable),
            HttpResponse::default(),
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
