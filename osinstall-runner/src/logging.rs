//! Tracing setup for fleet runs.
//!
//! Every device worker logs inside a `device_worker` span carrying `device`
//! and `run_id`. The JSON format copies those span fields onto each line so
//! one device's install can be cut out of a shared fleet log. The pretty
//! format adds a line when a worker span closes, with its total busy time.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use osinstall_core::config::GeneralConfig;

/// Crates that log at `general.log_level`; everything else stays at `warn`.
const OSINSTALL_TARGETS: [&str; 3] = ["osinstall_core", "osinstall_engine", "osinstall_runner"];

/// Output format selected by `general.log_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line with the current span's fields
    Json,
    /// Multi-line human-readable output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Pretty => write!(f, "pretty"),
        }
    }
}

/// Filter directives used when `RUST_LOG` is not set.
///
/// Transport and runtime crates are held at `warn` so per-chunk debug
/// output from a device binding does not drown the install log.
pub fn default_directives(level: &str) -> String {
    let mut directives = vec!["warn".to_owned()];
    directives.extend(OSINSTALL_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

fn build_filter(config: &GeneralConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives(&config.log_level))
            .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", config.log_level, e)),
    }
}

/// Initialize the global tracing subscriber.
///
/// Must be called once, before any device worker starts. `RUST_LOG`
/// takes precedence over `general.log_level`.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format: LogFormat = config.log_format.parse()?;
    let registry = tracing_subscriber::registry().with(build_filter(config)?);

    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize {} tracing subscriber: {}", format, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("JSON".parse::<LogFormat>().is_err());
    }

    #[test]
    fn default_directives_scope_level_to_own_crates() {
        assert_eq!(
            default_directives("debug"),
            "warn,osinstall_core=debug,osinstall_engine=debug,osinstall_runner=debug"
        );
        assert!(EnvFilter::try_new(default_directives("info")).is_ok());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let config = GeneralConfig {
            log_level: "info".to_owned(),
            log_format: "xml".to_owned(),
        };
        let err = init_tracing(&config).unwrap_err();
        assert!(err.to_string().contains("unknown log format 'xml'"));
    }
}
