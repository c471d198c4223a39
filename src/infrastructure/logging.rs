use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::domain::DomainError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Parse filter directives, naming where they came from on failure
fn parse_directives(source: &str, directives: &str) -> Result<EnvFilter, DomainError> {
    EnvFilter::try_new(directives).map_err(|e| {
        DomainError::configuration(format!(
            "Invalid log filter '{}' in {}: {}",
            directives, source, e
        ))
    })
}

/// The filter for `config`; a non-empty `RUST_LOG` replaces the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, DomainError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            parse_directives(EnvFilter::DEFAULT_ENV, &directives)
        }
        _ => parse_directives("logging.level", &config.level),
    }
}

fn build_layer(format: &LogFormat, filter: EnvFilter) -> BoxedLayer {
    // stderr keeps stdout free for command output
    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);

    match format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_target(true).with_filter(filter).boxed(),
    }
}

/// Install the global subscriber
///
/// Fails with a configuration error on a malformed filter or when a
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), DomainError> {
    let filter = build_filter(config)?;

    tracing_subscriber::registry()
        .with(build_layer(&config.format, filter))
        .try_init()
        .map_err(|e| {
            DomainError::configuration(format!("Failed to install log subscriber: {}", e))
        })?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        assert!(parse_directives("logging.level", "debug").is_ok());
        assert!(parse_directives("logging.level", "info,pmp_key_manager=trace").is_ok());
    }

    #[test]
    fn test_malformed_level_is_configuration_error() {
        let err = parse_directives("logging.level", "info,pmp_key_manager=loud").unwrap_err();

        assert!(matches!(err, DomainError::Configuration { .. }));
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_build_layer_for_each_format() {
        let _json = build_layer(&LogFormat::Json, EnvFilter::new("info"));
        let _pretty = build_layer(&LogFormat::Pretty, EnvFilter::new("info"));
    }
}
