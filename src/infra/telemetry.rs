use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "gambit_export_jobs_total",
            Unit::Count,
            "Render job transitions, labelled by event (enqueued, claimed, succeeded, failed)."
        );
        describe_counter!(
            "gambit_export_cards_rendered_total",
            Unit::Count,
            "Total number of cards rasterized by the daemon."
        );
        describe_histogram!(
            "gambit_export_render_ms",
            Unit::Milliseconds,
            "Compose plus capture latency per card in milliseconds."
        );
        describe_gauge!(
            "gambit_export_daemon_backoff_ms",
            Unit::Milliseconds,
            "Current daemon poll backoff in milliseconds."
        );
    });
}
