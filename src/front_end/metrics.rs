use std::sync::Arc;

use crate::metrics_prometheus::{HistogramDescriptor, HistogramInstrument, MetricsSink};

use super::context::{CLAIMED_IDENTITY_HEADER, USER_AGENT_HEADER};
use super::exchange::HttpRequest;

pub const LABEL_TRANSACTION_PHASE: &str = "transaction_phase";
pub const LABEL_REPORTING_ORIGIN: &str = "reporting_origin";
pub const LABEL_CLAIMED_IDENTITY: &str = "pbs_claimed_identity";
pub const LABEL_CLIENT_VERSION: &str = "client_version";
pub const LABEL_AUTH_DOMAIN: &str = "pbs_auth_domain";

/// The only phase name reported; retired phases never record metrics.
pub const PHASE_PREPARE: &str = "prepare";
pub const REPORTING_ORIGIN_COORDINATOR: &str = "coordinator";
pub const REPORTING_ORIGIN_OPERATOR: &str = "operator";
pub const UNKNOWN_LABEL_VALUE: &str = "unknown";

// Expected mean around 75 keys per transaction with a tail up to ~20k.
pub const KEYS_BOUNDARIES: &[f64] = &[
    1.0, 1.5, 2.3, 3.4, 5.1, 7.6, 11.4, 17.1, 25.6, 38.4, 57.7, 86.5, 129.7, 194.6, 291.9, 437.9,
    656.8, 985.3, 1477.9, 2216.8, 3325.3, 4987.9, 7481.8, 11222.7, 16864.1, 25251.2,
];

pub const BUDGET_EXHAUSTED_BOUNDARIES: &[f64] = &[
    1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0,
];

pub const KEYS_PER_TRANSACTION: HistogramDescriptor = HistogramDescriptor {
    name: "pbs_front_end_keys_per_transaction",
    help: "Number of keys/budgets per transaction/job.",
    boundaries: KEYS_BOUNDARIES,
};

pub const SUCCESSFUL_BUDGETS_CONSUMED: HistogramDescriptor = HistogramDescriptor {
    name: "pbs_front_end_successful_budgets_consumed",
    help: "Number of successful budgets consumed in a transaction/job.",
    boundaries: KEYS_BOUNDARIES,
};

pub const BUDGETS_EXHAUSTED: HistogramDescriptor = HistogramDescriptor {
    name: "pbs_front_end_budgets_exhausted",
    help: "Number of budgets exhausted.",
    boundaries: BUDGET_EXHAUSTED_BOUNDARIES,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricLabelSet {
    pub phase: &'static str,
    pub reporting_origin: String,
    pub claimed_identity: String,
    pub client_version: String,
    pub auth_domain: Option<String>,
}

impl MetricLabelSet {
    /// Derives labels from the incoming request only, so the dispatching
    /// handler and its continuation always produce the same set.
    pub fn for_prepare(request: &HttpRequest, remote_coordinator_claimed_identity: &str) -> Self {
        let claimed_identity = request.header(CLAIMED_IDENTITY_HEADER);
        let reporting_origin = if claimed_identity == Some(remote_coordinator_claimed_identity) {
            REPORTING_ORIGIN_COORDINATOR
        } else {
            REPORTING_ORIGIN_OPERATOR
        };
        Self {
            phase: PHASE_PREPARE,
            reporting_origin: reporting_origin.to_string(),
            claimed_identity: claimed_identity.unwrap_or(UNKNOWN_LABEL_VALUE).to_string(),
            client_version: request
                .header(USER_AGENT_HEADER)
                .unwrap_or(UNKNOWN_LABEL_VALUE)
                .to_string(),
            auth_domain: request.auth_context.authorized_domain.clone(),
        }
    }

    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![
            (LABEL_TRANSACTION_PHASE, self.phase),
            (LABEL_REPORTING_ORIGIN, self.reporting_origin.as_str()),
            (LABEL_CLAIMED_IDENTITY, self.claimed_identity.as_str()),
            (LABEL_CLIENT_VERSION, self.client_version.as_str()),
        ];
        if let Some(auth_domain) = self.auth_domain.as_deref() {
            pairs.push((LABEL_AUTH_DOMAIN, auth_domain));
        }
        pairs
    }
}

/// Histograms recorded by the prepare path. Each instrument is absent when no
/// sink was configured, and recording becomes a no-op.
#[derive(Clone, Default)]
pub struct FrontEndMetrics {
    keys_per_transaction: Option<Arc<dyn HistogramInstrument>>,
    successful_budgets_consumed: Option<Arc<dyn HistogramInstrument>>,
    budgets_exhausted: Option<Arc<dyn HistogramInstrument>>,
}

impl std::fmt::Debug for FrontEndMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontEndMetrics")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl FrontEndMetrics {
    pub fn new(sink: Option<&dyn MetricsSink>) -> Self {
        let Some(sink) = sink else {
            return Self::default();
        };
        Self {
            keys_per_transaction: Some(sink.get_or_create_histogram(&KEYS_PER_TRANSACTION)),
            successful_budgets_consumed: Some(
                sink.get_or_create_histogram(&SUCCESSFUL_BUDGETS_CONSUMED),
            ),
            budgets_exhausted: Some(sink.get_or_create_histogram(&BUDGETS_EXHAUSTED)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.keys_per_transaction.is_some()
    }

    pub fn record_keys_per_transaction(&self, keys: usize, labels: &MetricLabelSet) {
        record(self.keys_per_transaction.as_ref(), keys, labels);
    }

    pub fn record_successful_budgets_consumed(&self, budgets: usize, labels: &MetricLabelSet) {
        record(self.successful_budgets_consumed.as_ref(), budgets, labels);
    }

    pub fn record_budgets_exhausted(&self, budgets: usize, labels: &MetricLabelSet) {
        record(self.budgets_exhausted.as_ref(), budgets, labels);
    }
}

fn record(
    instrument: Option<&Arc<dyn HistogramInstrument>>,
    value: usize,
    labels: &MetricLabelSet,
) {
    if let Some(instrument) = instrument {
        instrument.record(u64::try_from(value).unwrap_or(u64::MAX), &labels.pairs());
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;

    fn request() -> HttpRequest {
        HttpRequest::new(Method::POST, "/v1/transactions:prepare")
    }

    #[test]
    fn labels_default_to_unknown_and_operator() {
        let labels = MetricLabelSet::for_prepare(&request(), "remote-coordinator");
        assert_eq!(labels.phase, PHASE_PREPARE);
        assert_eq!(labels.reporting_origin, REPORTING_ORIGIN_OPERATOR);
        assert_eq!(labels.claimed_identity, UNKNOWN_LABEL_VALUE);
        assert_eq!(labels.client_version, UNKNOWN_LABEL_VALUE);
        assert_eq!(labels.auth_domain, None);
        assert_eq!(labels.pairs().len(), 4);
    }

    #[test]
    fn remote_coordinator_identity_marks_coordinator_origin() {
        let request = request()
            .with_header(CLAIMED_IDENTITY_HEADER, "remote-coordinator")
            .with_header(USER_AGENT_HEADER, "aggregation-service/2.1")
            .with_authorized_domain("adtech.test");
        let labels = MetricLabelSet::for_prepare(&request, "remote-coordinator");
        assert_eq!(labels.reporting_origin, REPORTING_ORIGIN_COORDINATOR);
        assert_eq!(labels.claimed_identity, "remote-coordinator");
        assert_eq!(labels.client_version, "aggregation-service/2.1");
        assert_eq!(
            labels.pairs().last(),
            Some(&(LABEL_AUTH_DOMAIN, "adtech.test"))
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let request = request()
            .with_header(CLAIMED_IDENTITY_HEADER, "someone-else")
            .with_authorized_domain("adtech.test");
        assert_eq!(
            MetricLabelSet::for_prepare(&request, "remote-coordinator"),
            MetricLabelSet::for_prepare(&request.clone(), "remote-coordinator"),
        );
    }

    #[test]
    fn exhausted_boundaries_are_powers_of_two() {
        for (idx, bound) in BUDGET_EXHAUSTED_BOUNDARIES.iter().enumerate() {
            assert_eq!(*bound, f64::from(1u32 << idx));
        }
        assert_eq!(KEYS_BOUNDARIES.len(), 26);
    }
}
