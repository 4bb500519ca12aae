//! Request/response envelope shared by the handlers and the HTTP adapter.
//!
//! An [`AsyncExchange`] owns the sending half of a one-shot channel. Finishing
//! consumes the exchange, so the completion can fire at most once; dropping an
//! unfinished exchange never fires it.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use tokio::sync::oneshot;

use super::FrontEndError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub authorized_domain: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub auth_context: AuthContext,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            auth_context: AuthContext::default(),
            body: Bytes::new(),
        }
    }

    /// Adds a header, ignoring names or values that are not valid header text.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            return self;
        };
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_authorized_domain(mut self, domain: impl Into<String>) -> Self {
        self.auth_context.authorized_domain = Some(domain.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Trimmed header value; missing, non-UTF-8 and blank values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct ExchangeOutcome {
    pub result: Result<(), FrontEndError>,
    pub response: HttpResponse,
}

pub struct AsyncExchange {
    request: Arc<HttpRequest>,
    response: HttpResponse,
    completion: oneshot::Sender<ExchangeOutcome>,
}

impl std::fmt::Debug for AsyncExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncExchange")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("response", &self.response)
            .finish()
    }
}

impl AsyncExchange {
    pub fn new(request: HttpRequest) -> (Self, ExchangeCompletion) {
        let (sender, receiver) = oneshot::channel();
        let exchange = Self {
            request: Arc::new(request),
            response: HttpResponse::default(),
            completion: sender,
        };
        (exchange, ExchangeCompletion(receiver))
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// Records the outgoing result and fires the completion.
    pub fn finish(self, result: Result<(), FrontEndError>) {
        let outcome = ExchangeOutcome {
            result,
            response: self.response,
        };
        if self.completion.send(outcome).is_err() {
            tracing::debug!(
                path = %self.request.path,
                "exchange finished after the caller stopped waiting"
            );
        }
    }
}

/// Receiving half of an exchange.
#[derive(Debug)]
pub struct ExchangeCompletion(oneshot::Receiver<ExchangeOutcome>);

impl ExchangeCompletion {
    /// Waits for the exchange to finish. `None` means the exchange was dropped
    /// without being finished.
    pub async fn wait(self) -> Option<ExchangeOutcome> {
        self.0.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finish_delivers_result_and_response() {
        let request = HttpRequest::new(Method::POST, "/v1/transactions:begin");
        let (mut exchange, completion) = AsyncExchange::new(request);
        exchange.response_mut().body = Bytes::from_static(b"done");
        exchange.finish(Ok(()));

        let outcome = completion.wait().await.expect("completed");
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.response.body, Bytes::from_static(b"done"));
    }

    #[tokio::test]
    async fn dropped_exchange_never_completes() {
        let request = HttpRequest::new(Method::POST, "/v1/transactions:prepare");
        let (exchange, completion) = AsyncExchange::new(request);
        drop(exchange);
        assert!(completion.wait().await.is_none());
    }

    #[test]
    fn header_lookup_trims_and_skips_blank_values() {
        let request = HttpRequest::new(Method::POST, "/")
            .with_header("x-gscp-transaction-origin", "  origin.test ")
            .with_header("x-gscp-claimed-identity", "   ");
        assert_eq!(
            request.header("x-gscp-transaction-origin"),
            Some("origin.test")
        );
        assert_eq!(request.header("x-gscp-claimed-identity"), None);
        assert_eq!(request.header("user-agent"), None);
    }

    #[test]
    fn with_header_skips_invalid_names() {
        let request = HttpRequest::new(Method::POST, "/")
            .with_header("X-GSCP-Transaction-Origin", "origin.test")
            .with_header("bad header", "dropped")
            .with_header("", "dropped");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(
            request.header("x-gscp-transaction-origin"),
            Some("origin.test")
        );
    }
}
