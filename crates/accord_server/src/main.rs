use std::{collections::HashSet, time::Duration};

use accord_core::{
    governance::{
        config::{DEFAULT_NOTIFICATION_CAPACITY, GovernanceConfig},
        infrastructure::naming::DataType,
        init_engine,
        services::notification::NotificationService,
    },
    transport::http::{DEFAULT_HTTP_PORT, router},
};
use anyhow::Context;
use clap::Parser;
use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, logs::SdkLoggerProvider};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Upper bound of a configurable default consent duration, in days.
const MAX_TTL_DAYS: u64 = 100 * 365;

#[derive(Parser, Debug)]
#[command(name = "accord_server")]
#[command(about = "Accord consent governance server")]
struct AccordServerArgs {
    /// Server address to bind to
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Server port to bind to
    #[arg(short, long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Period of the eager expiry sweep in seconds, 0 disables it
    #[arg(long, default_value_t = 0)]
    sweep_interval_secs: u64,

    /// Capacity of the notification channel
    #[arg(long, default_value_t = DEFAULT_NOTIFICATION_CAPACITY)]
    notification_capacity: usize,

    /// Default consent duration for academic data, in days
    #[arg(long, default_value_t = 365, value_parser = ttl_days)]
    academic_ttl_days: u64,

    /// Default consent duration for personal data, in days
    #[arg(long, default_value_t = 180, value_parser = ttl_days)]
    personal_ttl_days: u64,

    /// Default consent duration for contact details, in days
    #[arg(long, default_value_t = 90, value_parser = ttl_days)]
    contact_ttl_days: u64,

    /// Only the subject may resolve requests, administrators may not
    #[arg(long, default_value_t = false)]
    no_admin_delegation: bool,

    /// OTLP gRPC endpoint receiving exported logs
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

/// Parses a default consent duration in days, which must be positive.
fn ttl_days(value: &str) -> Result<u64, String> {
    let days: u64 = value.parse().map_err(|error| format!("invalid number of days: {error}"))?;
    if (1..=MAX_TTL_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(format!("expected between 1 and {MAX_TTL_DAYS} days"))
    }
}

impl AccordServerArgs {
    fn governance_config(&self) -> GovernanceConfig {
        GovernanceConfig {
            academic_ttl: Duration::from_secs(self.academic_ttl_days * DAY_SECS),
            personal_ttl: Duration::from_secs(self.personal_ttl_days * DAY_SECS),
            contact_ttl: Duration::from_secs(self.contact_ttl_days * DAY_SECS),
            admin_delegated: if self.no_admin_delegation {
                HashSet::new()
            } else {
                DataType::ALL.into_iter().collect()
            },
            notification_capacity: self.notification_capacity,
            sweep_interval: (self.sweep_interval_secs > 0)
                .then(|| Duration::from_secs(self.sweep_interval_secs)),
        }
    }
}

/// Installs the fmt subscriber, bridged to OTLP when an endpoint is given.
fn init_tracing(otlp_endpoint: Option<&str>) -> anyhow::Result<Option<SdkLoggerProvider>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = otlp_endpoint
        .map(|endpoint| -> anyhow::Result<SdkLoggerProvider> {
            let exporter = LogExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
                .context("failed to build the OTLP log exporter")?;
            Ok(SdkLoggerProvider::builder()
                .with_resource(
                    Resource::builder()
                        .with_service_name("accord")
                        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
                        .build(),
                )
                .with_batch_exporter(exporter)
                .build())
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).compact().with_target(true))
        .with(provider.as_ref().map(OpenTelemetryTracingBridge::new))
        .init();

    Ok(provider)
}

/// Drains governance events into the log, standing in for an external sink.
fn spawn_notification_sink(notifications: &NotificationService) -> JoinHandle<()> {
    let mut events = notifications.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => info!(?event, "[notifications] governance event"),
                Err(error) => warn!(%error, "[notifications] sink lagging behind"),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AccordServerArgs::parse();
    let provider = init_tracing(args.otlp_endpoint.as_deref())?;

    let config = args.governance_config();
    let sweep_interval = config.sweep_interval;
    let (governance, notifications, ledger) = init_engine(config);

    let sweep = sweep_interval.map(|period| ledger.spawn_expiry_sweep(period));
    let sink = spawn_notification_sink(&notifications);

    let address = format!("{}:{}", args.address, args.port);
    let listener =
        TcpListener::bind(&address).await.with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "accord server listening");

    axum::serve(listener, router(governance))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(sweep) = sweep {
        sweep.abort();
    }
    sink.abort();
    if let Some(provider) = provider
        && let Err(error) = provider.shutdown()
    {
        eprintln!("failed to flush exported logs: {error}");
    }
    Ok(())
}
