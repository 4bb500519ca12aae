use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pbs_front_end::metrics_prometheus::MetricsSink;
use pbs_front_end::telemetry::{TracingOptions, init_tracing};
use pbs_front_end::{
    FrontEndConfig, FrontEndHttpState, FrontEndService, HttpRouteTable, InMemoryBudgetConsumer,
    PrometheusMetricsConfig, PrometheusRegistry, REMOTE_CLAIMED_IDENTITY_KEY, router,
};

#[derive(Debug, Parser)]
#[command(
    name = "pbs-front-end",
    about = "Privacy budget service transaction front end"
)]
struct Cli {
    /// Config file (.toml, .json, or .yaml with the config-yaml feature).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, alias = "addr")]
    listen: Option<String>,
    /// Overrides `google_scp_pbs_remote_claimed_identity`.
    #[arg(long)]
    remote_claimed_identity: Option<String>,
    #[arg(long)]
    json_logs: bool,
    #[arg(long)]
    prometheus_metrics: bool,
    #[arg(long)]
    otel: bool,
    #[arg(long)]
    otel_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _telemetry = init_tracing(&TracingOptions {
        service_name: "pbs-front-end".to_string(),
        json_logs: cli.json_logs,
        otel: cli.otel || cli.otel_endpoint.is_some(),
        otel_endpoint: cli.otel_endpoint.clone(),
    })?;

    let mut config = match cli.config.as_deref() {
        Some(path) => FrontEndConfig::load(path)?,
        None => FrontEndConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(identity) = cli.remote_claimed_identity {
        config
            .settings
            .insert(REMOTE_CLAIMED_IDENTITY_KEY.to_string(), identity);
    }
    if cli.prometheus_metrics {
        config.metrics.prometheus = true;
    }
    config.validate()?;

    let prometheus = config.metrics.prometheus.then(|| {
        Arc::new(PrometheusRegistry::new(PrometheusMetricsConfig {
            max_series: config.metrics.max_series,
        }))
    });

    let consumer = Arc::new(InMemoryBudgetConsumer::new(config.budget.clone()));
    let mut builder = FrontEndService::builder().with_budget_consumer(consumer);
    if let Some(registry) = prometheus.as_ref() {
        let sink: Arc<dyn MetricsSink> = registry.clone();
        builder = builder.with_metrics_sink(sink);
    }

    let mut routes = HttpRouteTable::new();
    builder.init(&config, &mut routes)?;

    let mut state = FrontEndHttpState::new(routes).with_max_body_bytes(config.max_body_bytes);
    if let Some(registry) = prometheus {
        state = state.with_prometheus_registry(registry);
    }

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(listen = %config.listen, "pbs front end listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
