pub mod budget;
pub mod config;
mod error;
pub mod front_end;
pub mod http;
pub mod metrics_prometheus;
pub mod telemetry;

pub use budget::{BudgetConfig, InMemoryBudgetConsumer};
pub use config::{ConfigProvider, FrontEndConfig, MetricsConfig, REMOTE_CLAIMED_IDENTITY_KEY};
pub use error::{PbsError, Result};
pub use front_end::{
    BudgetConsumer, BudgetConsumptionEntry, ConsumeBudgetsError, ConsumeBudgetsRequest,
    ConsumeBudgetsResponse, FrontEndError, FrontEndService, FrontEndServiceBuilder,
    PendingConsumption,
};
pub use http::{
    AuthContextResolver, FrontEndHttpState, HttpRouteTable, PassThroughAuthResolver,
    ResourceHandler, ResourceRegistry, router,
};
pub use metrics_prometheus::{MetricsSink, PrometheusMetricsConfig, PrometheusRegistry};
