//! Transaction front end: accepts consume-budget calls over HTTP and bridges
//! them onto the asynchronous budget backend.

pub mod codec;
pub mod consume_budget;
pub mod context;
pub mod exchange;
pub mod legacy;
pub mod metrics;
mod prepare;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use thiserror::Error;

use crate::config::{ConfigProvider, REMOTE_CLAIMED_IDENTITY_KEY};
use crate::http::ResourceRegistry;
use crate::metrics_prometheus::MetricsSink;

use codec::{JsonTransactionCodec, TransactionCodec};
use exchange::AsyncExchange;
use metrics::FrontEndMetrics;

pub use codec::CodecError;
pub use consume_budget::{
    BudgetConsumer, BudgetConsumptionEntry, ConsumeBudgetsError, ConsumeBudgetsRequest,
    ConsumeBudgetsResponse, PendingConsumption,
};
pub use exchange::{AuthContext, ExchangeCompletion, ExchangeOutcome, HttpRequest, HttpResponse};
pub use metrics::MetricLabelSet;

pub const HEALTH_CHECK_PATH: &str = "/v1/transactions:health-check";
pub const CONSUME_BUDGET_PATH: &str = "/v1/transactions:consume-budget";
pub const BEGIN_TRANSACTION_PATH: &str = "/v1/transactions:begin";
pub const PREPARE_TRANSACTION_PATH: &str = "/v1/transactions:prepare";
pub const COMMIT_TRANSACTION_PATH: &str = "/v1/transactions:commit";
pub const NOTIFY_TRANSACTION_PATH: &str = "/v1/transactions:notify";
pub const ABORT_TRANSACTION_PATH: &str = "/v1/transactions:abort";
pub const END_TRANSACTION_PATH: &str = "/v1/transactions:end";
pub const TRANSACTION_STATUS_PATH: &str = "/v1/transactions:status";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrontEndError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
    #[error("front end initialization failed: {reason}")]
    InitializationFailed { reason: String },
    #[error("no budget keys available in the request")]
    NoKeysAvailable,
    #[error("budget exhausted at indices {budget_exhausted_indices:?}")]
    BudgetExhausted { budget_exhausted_indices: Vec<usize> },
    #[error("backend failure ({status}): {message}")]
    BackendFailure { status: StatusCode, message: String },
    #[error("transaction status not found")]
    NotFound,
}

impl FrontEndError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn initialization_failed(reason: impl Into<String>) -> Self {
        Self::InitializationFailed {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } | Self::NoKeysAvailable => StatusCode::BAD_REQUEST,
            Self::InitializationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BudgetExhausted { .. } => StatusCode::CONFLICT,
            Self::BackendFailure { status, .. } => *status,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::NoKeysAvailable => "no_keys_available",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::BackendFailure { .. } => "backend_failure",
            Self::NotFound => "not_found",
        }
    }
}

pub struct FrontEndService {
    remote_coordinator_claimed_identity: String,
    budget_consumer: Arc<dyn BudgetConsumer>,
    codec: Arc<dyn TransactionCodec>,
    metrics: FrontEndMetrics,
}

impl std::fmt::Debug for FrontEndService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontEndService")
            .field(
                "remote_coordinator_claimed_identity",
                &self.remote_coordinator_claimed_identity,
            )
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl FrontEndService {
    pub fn builder() -> FrontEndServiceBuilder {
        FrontEndServiceBuilder::default()
    }

    pub fn remote_coordinator_claimed_identity(&self) -> &str {
        &self.remote_coordinator_claimed_identity
    }
}

pub struct FrontEndServiceBuilder {
    budget_consumer: Option<Arc<dyn BudgetConsumer>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    codec: Arc<dyn TransactionCodec>,
}

impl Default for FrontEndServiceBuilder {
    fn default() -> Self {
        Self {
            budget_consumer: None,
            metrics_sink: None,
            codec: Arc::new(JsonTransactionCodec),
        }
    }
}

type LegacyHandler = fn(AsyncExchange) -> Result<(), FrontEndError>;

impl FrontEndServiceBuilder {
    pub fn with_budget_consumer(mut self, consumer: Arc<dyn BudgetConsumer>) -> Self {
        self.budget_consumer = Some(consumer);
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn TransactionCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Reads configuration, registers histograms, and installs every route.
    ///
    /// A missing claimed identity or budget backend fails initialization; no
    /// route is registered in that case.
    #[allow(deprecated)]
    pub fn init(
        self,
        config: &dyn ConfigProvider,
        registry: &mut dyn ResourceRegistry,
    ) -> Result<Arc<FrontEndService>, FrontEndError> {
        use legacy::{
            abort_transaction, begin_transaction, commit_transaction, end_transaction,
            get_transaction_status, notify_transaction,
        };

        let remote_coordinator_claimed_identity = config
            .get(REMOTE_CLAIMED_IDENTITY_KEY)
            .map_err(|err| FrontEndError::initialization_failed(err.to_string()))?;

        let Some(budget_consumer) = self.budget_consumer else {
            let err = FrontEndError::initialization_failed("budget consumer is not configured");
            tracing::error!(error = %err, "front end initialization failed");
            return Err(err);
        };

        let service = Arc::new(FrontEndService {
            remote_coordinator_claimed_identity,
            budget_consumer,
            codec: self.codec,
            metrics: FrontEndMetrics::new(self.metrics_sink.as_deref()),
        });

        for path in [CONSUME_BUDGET_PATH, PREPARE_TRANSACTION_PATH] {
            let service = Arc::clone(&service);
            registry.register_resource_handler(
                Method::POST,
                path,
                Arc::new(move |exchange| service.prepare_transaction(exchange)),
            );
        }

        let legacy_routes: [(Method, &str, LegacyHandler); 7] = [
            (Method::POST, HEALTH_CHECK_PATH, begin_transaction),
            (Method::POST, BEGIN_TRANSACTION_PATH, begin_transaction),
            (Method::POST, COMMIT_TRANSACTION_PATH, commit_transaction),
            (Method::POST, NOTIFY_TRANSACTION_PATH, notify_transaction),
            (Method::POST, ABORT_TRANSACTION_PATH, abort_transaction),
            (Method::POST, END_TRANSACTION_PATH, end_transaction),
            (Method::GET, TRANSACTION_STATUS_PATH, get_transaction_status),
        ];
        for (method, path, handler) in legacy_routes {
            registry.register_resource_handler(method, path, Arc::new(handler));
        }

        tracing::info!(
            remote_coordinator_claimed_identity = %service.remote_coordinator_claimed_identity,
            metrics = service.metrics.is_enabled(),
            "front end initialized"
        );
        Ok(service)
    }
}
