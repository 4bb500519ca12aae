use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Clone, Debug, Default)]
pub struct TracingOptions {
    pub service_name: String,
    pub json_logs: bool,
    pub otel: bool,
    pub otel_endpoint: Option<String>,
}

/// Keeps the span exporter alive; dropping it flushes pending spans.
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider.take() {
            let _ = provider.shutdown();
        }
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn fmt_layer<S>(json_logs: bool) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    }
}

#[cfg(feature = "otel")]
pub fn init_tracing(
    options: &TracingOptions,
) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    use opentelemetry::global;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig as _};
    use opentelemetry_sdk::Resource;

    if !options.otel {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer(options.json_logs))
            .try_init()?;
        return Ok(TelemetryGuard::default());
    }

    let mut exporter = SpanExporter::builder().with_http();
    if let Some(endpoint) = options.otel_endpoint.as_deref() {
        exporter = exporter.with_endpoint(endpoint.to_string());
    }
    let exporter = exporter.build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_service_name(options.service_name.clone())
                .build(),
        )
        .build();
    global::set_tracer_provider(provider.clone());

    let tracer = provider.tracer(options.service_name.clone());
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(options.json_logs))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    Ok(TelemetryGuard {
        provider: Some(provider),
    })
}

#[cfg(not(feature = "otel"))]
pub fn init_tracing(
    options: &TracingOptions,
) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    if options.otel {
        return Err("otel requires `--features otel`".into());
    }
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(options.json_logs))
        .try_init()?;
    Ok(TelemetryGuard::default())
}
