use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless:
/// the second subscriber is simply not installed.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()
    };

    if installed.is_ok() {
        tracing::debug!(json = config.json, "patchwork telemetry initialized");
    }
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a span with common coordination attributes
pub fn create_coordination_span(
    operation: &str,
    agent_id: Option<&str>,
    task_id: Option<&str>,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "agent_coordination",
        operation = operation,
        agent.id = agent_id,
        task.id = task_id,
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_unique_uuids() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn init_is_idempotent() {
        let config = ObservabilityConfig {
            log_level: "warn".to_string(),
            json: false,
        };
        assert!(init_telemetry(&config).is_ok());
        assert!(init_telemetry(&config).is_ok());
    }
}
