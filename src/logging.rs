//! Tracing subscriber setup.
//!
//! JSON output in production, pretty output elsewhere, optional daily-rotated
//! log files and an optional OTLP span exporter.

use anyhow::{Context, Result};
use opentelemetry::{
    KeyValue,
    trace::{TraceError, TracerProvider as _},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use strum::EnumString;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "storefront";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for log files when `output` is [`LogOutput::File`]
    pub log_dir: PathBuf,
    pub log_file_prefix: String,
    pub service_name: String,
    pub service_version: String,
    /// Deployment environment ("development", "staging", "production")
    pub environment: String,
    pub enable_otel: bool,
    pub otlp_endpoint: Option<String>,
    /// Daily rotation of log files
    pub enable_rotation: bool,
    /// Trace sampling ratio, clamped to 0.0..=1.0
    pub otel_sampling_rate: f64,
    pub otlp_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

/// Parses an environment variable, ignoring it when unset or malformed.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string());
        let production = is_production(&environment);

        Self {
            format: if production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: SERVICE_NAME.to_string(),
            service_name: SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            enable_otel: false,
            otlp_endpoint: None,
            enable_rotation: true,
            otel_sampling_rate: if production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `LOG_*` and `OTEL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(format) = env_parse("LOG_FORMAT") {
            config.format = format;
        }
        if let Some(output) = env_parse("LOG_OUTPUT") {
            config.output = output;
        }
        if let Ok(log_dir) = env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(endpoint) =
            env::var("OTEL_EXPORTER_OTLP_ENDPOINT").or_else(|_| env::var("OTLP_ENDPOINT"))
        {
            config.enable_otel = true;
            config.otlp_endpoint = Some(endpoint);
        } else if env::var("ENABLE_OTEL").is_ok() {
            config.enable_otel = true;
        }

        if let Some(rate) = env_parse::<f64>("OTEL_SAMPLING_RATE") {
            config.otel_sampling_rate = rate.clamp(0.0, 1.0);
        }
        if let Some(timeout) = env_parse("OTEL_EXPORTER_OTLP_TIMEOUT") {
            config.otlp_timeout_secs = timeout;
        }

        config
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                self.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("environment", self.environment.clone()),
            KeyValue::new("service.namespace", "commerce"),
        ])
    }

    fn sampler(&self) -> Sampler {
        match self.otel_sampling_rate {
            rate if rate >= 1.0 => Sampler::AlwaysOn,
            rate if rate <= 0.0 => Sampler::AlwaysOff,
            rate => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate))),
        }
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        let pair = match self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File => {
                std::fs::create_dir_all(&self.log_dir).with_context(|| {
                    format!("failed to create log directory {:?}", self.log_dir)
                })?;
                let appender = if self.enable_rotation {
                    tracing_appender::rolling::daily(&self.log_dir, &self.log_file_prefix)
                } else {
                    tracing_appender::rolling::never(&self.log_dir, &self.log_file_prefix)
                };
                tracing_appender::non_blocking(appender)
            }
        };
        Ok(pair)
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes buffered log lines on drop; hold it until the
/// process exits.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if is_production(&config.environment) {
            "info"
        } else {
            "debug"
        };
        EnvFilter::new(format!("{level},hyper=info,tower=info"))
    });

    let (writer, guard) = config.writer()?;

    let otel_layer = match (config.enable_otel, config.otlp_endpoint.as_ref()) {
        (true, Some(_)) => match init_tracer_provider(&config) {
            Ok(provider) => {
                let tracer = provider.tracer(SERVICE_NAME);
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            Err(error) => {
                eprintln!(
                    "Warning: failed to initialize OTLP exporter: {error}. Continuing without distributed tracing."
                );
                None
            }
        },
        (true, None) => {
            eprintln!(
                "Warning: OpenTelemetry enabled but no OTLP endpoint configured. \
                 Set OTEL_EXPORTER_OTLP_ENDPOINT to export traces."
            );
            None
        }
        (false, _) => None,
    };

    let registry = tracing_subscriber::registry().with(otel_layer);

    let installed = match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_filter(env_filter);
            registry.with(fmt_layer).try_init()
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(env_filter);
            registry.with(fmt_layer).try_init()
        }
    };
    installed.context("failed to install tracing subscriber")?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otel = config.enable_otel,
        "logging initialized"
    );

    Ok(Some(guard))
}

fn init_tracer_provider(config: &LoggingConfig) -> Result<TracerProvider, TraceError> {
    let endpoint = config
        .otlp_endpoint
        .as_ref()
        .ok_or_else(|| TraceError::Other("no OTLP endpoint configured".into()))?;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .and_then(|tracer| {
            tracer
                .provider()
                .ok_or_else(|| TraceError::Other("tracer provider dropped".into()))
        })
}

/// Flushes pending spans to the collector.
pub fn shutdown_telemetry() {
    tracing::info!("shutting down telemetry");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Span wrapping one request against a session's cart.
pub fn session_span(session_id: &str, operation: &'static str) -> tracing::Span {
    tracing::info_span!(
        "session_request",
        session.id = session_id,
        session.operation = operation,
        service = SERVICE_NAME,
    )
}

/// Span wrapping a checkout, from validation to the sink's acknowledgement.
pub fn checkout_span(session_id: &str) -> tracing::Span {
    tracing::info_span!(
        "checkout",
        session.id = session_id,
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION")
    )
}
