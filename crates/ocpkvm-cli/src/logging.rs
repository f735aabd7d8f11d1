use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable colored output (for interactive CLI use).
    #[default]
    Human,
    /// Structured JSON output (for log collection).
    Json,
}

impl LogFormat {
    /// Parse from CLI string argument. Unknown values fall back to human.
    pub fn from_str_arg(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Human,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at program startup. Respects `RUST_LOG` env var for filtering.
/// Default filter: `ocpkvm=info` (show info+ from ocpkvm, warnings from dependencies).
pub fn init(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    match format {
        LogFormat::Human => {
            let subscriber = fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(subscriber)
                .init();
        }
        LogFormat::Json => {
            let subscriber = fmt::layer().json().with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(subscriber)
                .init();
        }
    }
}

/// Crate targets are `ocpkvm_core`, `ocpkvm_provision` and so on, so each
/// gets its own directive.
fn default_filter() -> String {
    [
        "ocpkvm=info",
        "ocpkvm_core=info",
        "ocpkvm_runtime=info",
        "ocpkvm_provision=info",
        "ocpkvm_cli=info",
        "warn",
    ]
    .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_arg() {
        assert_eq!(LogFormat::from_str_arg("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_arg("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_arg("human"), LogFormat::Human);
        assert_eq!(LogFormat::from_str_arg("anything"), LogFormat::Human);
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(default_filter()).is_ok());
    }
}
