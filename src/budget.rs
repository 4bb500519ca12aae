//! Local budget-consumption backend keyed by (budget key, time bucket).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::front_end::consume_budget::{
    BudgetConsumer, ConsumeBudgetsError, ConsumeBudgetsRequest, ConsumeBudgetsResponse,
    PendingConsumption,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_tokens_per_time_bucket")]
    pub tokens_per_time_bucket: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budgets_per_request: Option<usize>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            tokens_per_time_bucket: default_tokens_per_time_bucket(),
            max_budgets_per_request: None,
        }
    }
}

fn default_tokens_per_time_bucket() -> u64 {
    1
}

type BudgetKey = (String, u64);

#[derive(Clone, Debug, Default)]
pub struct InMemoryBudgetConsumer {
    config: BudgetConfig,
    spent: Arc<Mutex<HashMap<BudgetKey, u64>>>,
}

impl InMemoryBudgetConsumer {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            spent: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn spent(&self, budget_key_name: &str, time_bucket: u64) -> u64 {
        self.spent
            .lock()
            .await
            .get(&(budget_key_name.to_string(), time_bucket))
            .copied()
            .unwrap_or(0)
    }
}

impl BudgetConsumer for InMemoryBudgetConsumer {
    fn consume_budgets(
        &self,
        request: Arc<ConsumeBudgetsRequest>,
    ) -> Result<PendingConsumption, ConsumeBudgetsError> {
        if let Some(max) = self.config.max_budgets_per_request {
            if request.budgets.len() > max {
                return Err(ConsumeBudgetsError::failure(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!(
                        "request carries {} budgets, limit is {max}",
                        request.budgets.len()
                    ),
                ));
            }
        }

        let limit = self.config.tokens_per_time_bucket;
        let spent = Arc::clone(&self.spent);
        Ok(Box::pin(async move {
            let mut spent = spent.lock().await;
            consume_all_or_nothing(&mut spent, &request, limit)
        }))
    }
}

/// Consumes every entry or none. On exhaustion reports each index whose key
/// would go over the limit once this request's demand for that key is added.
fn consume_all_or_nothing(
    spent: &mut HashMap<BudgetKey, u64>,
    request: &ConsumeBudgetsRequest,
    limit: u64,
) -> Result<(), ConsumeBudgetsError> {
    let mut demand: HashMap<BudgetKey, u64> = HashMap::new();
    for budget in &request.budgets {
        let entry = demand
            .entry((budget.budget_key_name.clone(), budget.time_bucket))
            .or_insert(0);
        *entry = entry.saturating_add(u64::from(budget.token_count));
    }

    let budget_exhausted_indices: BTreeSet<usize> = request
        .budgets
        .iter()
        .enumerate()
        .filter(|(_, budget)| {
            let key = (budget.budget_key_name.clone(), budget.time_bucket);
            let already = spent.get(&key).copied().unwrap_or(0);
            let wanted = demand.get(&key).copied().unwrap_or(0);
            already.saturating_add(wanted) > limit
        })
        .map(|(idx, _)| idx)
        .collect();

    if !budget_exhausted_indices.is_empty() {
        let response = ConsumeBudgetsResponse {
            budget_exhausted_indices,
        };
        return Err(ConsumeBudgetsError::BudgetExhausted(response));
    }

    for (key, tokens) in demand {
        let entry = spent.entry(key).or_insert(0);
        *entry = entry.saturating_add(tokens);
    }
    Ok(())
}
