//! Contract between the front end and the budget-consumption backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::FrontEndError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConsumptionEntry {
    pub budget_key_name: String,
    pub time_bucket: u64,
    pub token_count: u32,
}

/// Entries keep their parse order; exhaustion is reported by position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeBudgetsRequest {
    pub authorized_domain: String,
    pub transaction_origin: String,
    pub budgets: Vec<BudgetConsumptionEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeBudgetsResponse {
    pub budget_exhausted_indices: BTreeSet<usize>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConsumeBudgetsError {
    #[error("budget exhausted for {} budget(s)", .0.budget_exhausted_indices.len())]
    BudgetExhausted(ConsumeBudgetsResponse),
    #[error("budget consumption failed ({status}): {message}")]
    Failure { status: StatusCode, message: String },
}

impl ConsumeBudgetsError {
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Failure {
            status,
            message: message.into(),
        }
    }
}

impl From<ConsumeBudgetsError> for FrontEndError {
    fn from(err: ConsumeBudgetsError) -> Self {
        match err {
            ConsumeBudgetsError::BudgetExhausted(response) => FrontEndError::BudgetExhausted {
                budget_exhausted_indices: response.budget_exhausted_indices.into_iter().collect(),
            },
            ConsumeBudgetsError::Failure { status, message } => {
                FrontEndError::BackendFailure { status, message }
            }
        }
    }
}

/// Consumption already accepted by the backend, resolving to its outcome.
pub type PendingConsumption = BoxFuture<'static, Result<(), ConsumeBudgetsError>>;

pub trait BudgetConsumer: Send + Sync {
    /// Schedules consumption and returns without waiting for it.
    ///
    /// `Err` rejects the dispatch outright; nothing was scheduled and no outcome
    /// will follow.
    fn consume_budgets(
        &self,
        request: Arc<ConsumeBudgetsRequest>,
    ) -> Result<PendingConsumption, ConsumeBudgetsError>;
}
