use serde::Deserialize;
use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,sea_orm=warn";

/// Process-wide logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub environment: String,
    pub api_version: String,
    pub json: bool,
    pub default_directives: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            environment: "local".to_string(),
            api_version: env!("CARGO_PKG_VERSION").to_string(),
            json: true,
            default_directives: DEFAULT_DIRECTIVES.to_string(),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `default_directives`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(settings: &LogSettings) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if settings.json {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_ansi(false)
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_ansi(false))
            .try_init()
    };

    installed.is_ok()
}

/// Span carrying the per-execution fields every log line should have.
pub fn execution_span(settings: &LogSettings, execution_id: &str, username: Option<&str>) -> Span {
    tracing::info_span!(
        "execution",
        execution_id = %execution_id,
        username = %username.unwrap_or("-"),
        environment = %settings.environment,
        api_version = %settings.api_version,
    )
}
