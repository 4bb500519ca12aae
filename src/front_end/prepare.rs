use std::sync::Arc;

use tracing::{Instrument, Level};
use uuid::Uuid;

use super::consume_budget::{ConsumeBudgetsError, ConsumeBudgetsRequest};
use super::context::{extract_transaction_id, obtain_transaction_origin};
use super::exchange::AsyncExchange;
use super::legacy::insert_backward_compatible_headers;
use super::metrics::MetricLabelSet;
use super::{FrontEndError, FrontEndService};

/// State carried from dispatch to the consume-budget completion.
struct PrepareContinuation {
    exchange: AsyncExchange,
    transaction_id: Uuid,
    request: Arc<ConsumeBudgetsRequest>,
}

impl FrontEndService {
    /// Parses the budget list and dispatches consumption to the backend.
    ///
    /// `Ok` means the backend accepted the work and the exchange will be
    /// finished once it completes. `Err` means nothing was dispatched and the
    /// exchange was dropped unfinished; the caller answers with the error.
    pub fn prepare_transaction(
        self: &Arc<Self>,
        exchange: AsyncExchange,
    ) -> Result<(), FrontEndError> {
        tracing::debug!("start prepare transaction");
        let labels = MetricLabelSet::for_prepare(
            exchange.request(),
            &self.remote_coordinator_claimed_identity,
        );

        let transaction_id = extract_transaction_id(exchange.request())?;
        let transaction_origin = obtain_transaction_origin(exchange.request());
        let authorized_domain = exchange
            .request()
            .auth_context
            .authorized_domain
            .clone()
            .unwrap_or_default();

        let budgets = self.codec.parse_consume_budgets(
            &authorized_domain,
            &transaction_origin,
            &exchange.request().body,
        )?;

        if budgets.is_empty() {
            return Err(FrontEndError::NoKeysAvailable);
        }
        self.metrics
            .record_keys_per_transaction(budgets.len(), &labels);

        if tracing::enabled!(Level::DEBUG) {
            tracing::debug!(
                %transaction_id,
                total_keys = budgets.len(),
                "starting transaction"
            );
            for budget in &budgets {
                tracing::debug!(
                    %transaction_id,
                    budget_key = %budget.budget_key_name,
                    time_bucket = budget.time_bucket,
                    token_count = budget.token_count,
                    "budget requested"
                );
            }
        }

        let request = Arc::new(ConsumeBudgetsRequest {
            authorized_domain,
            transaction_origin,
            budgets,
        });
        let pending = self.budget_consumer.consume_budgets(Arc::clone(&request))?;

        let continuation = PrepareContinuation {
            exchange,
            transaction_id,
            request,
        };
        let service = Arc::clone(self);
        tokio::spawn(
            async move {
                let outcome = pending.await;
                service.on_consume_budgets_complete(continuation, outcome);
            }
            .in_current_span(),
        );
        Ok(())
    }

    fn on_consume_budgets_complete(
        &self,
        continuation: PrepareContinuation,
        outcome: Result<(), ConsumeBudgetsError>,
    ) {
        let PrepareContinuation {
            mut exchange,
            transaction_id,
            request,
        } = continuation;
        let labels = MetricLabelSet::for_prepare(
            exchange.request(),
            &self.remote_coordinator_claimed_identity,
        );

        match outcome {
            Ok(()) => {
                self.metrics
                    .record_successful_budgets_consumed(request.budgets.len(), &labels);
                insert_backward_compatible_headers(exchange.response_mut());
                exchange.finish(Ok(()));
            }
            Err(ConsumeBudgetsError::BudgetExhausted(response)) => {
                let indices = &response.budget_exhausted_indices;
                tracing::warn!(
                    %transaction_id,
                    exhausted = indices.len(),
                    "failed to consume budget due to budget exhausted"
                );
                match self.codec.serialize_exhausted_indices(indices) {
                    Ok(body) => exchange.response_mut().body = body,
                    // Logged only: the exhaustion stays the reported result.
                    Err(err) => tracing::error!(
                        %transaction_id,
                        error = %err,
                        "serialization of the transaction response failed"
                    ),
                }
                self.metrics
                    .record_budgets_exhausted(indices.len(), &labels);
                exchange.finish(Err(ConsumeBudgetsError::BudgetExhausted(response).into()));
            }
            Err(err) => {
                tracing::error!(%transaction_id, error = %err, "failed to consume budget");
                exchange.finish(Err(err.into()));
            }
        }
    }
}
