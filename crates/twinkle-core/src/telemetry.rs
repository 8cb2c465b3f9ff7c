//! Log output for the `twinkle-eval` binary.
//!
//! Logs go to stderr; stdout is reserved for the report the CLI prints.
//! `RUST_LOG` overrides the default filter entirely.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Shape of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for collecting logs of many ranks.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Filter used when `RUST_LOG` is unset. The HTTP stack stays at `warn` so
/// per-request chatter from the model client does not drown the run.
pub fn default_filter(level: Level) -> String {
    format!("{},hyper=warn,reqwest=warn,h2=warn,rustls=warn", level.as_str().to_lowercase())
}

/// Install the global subscriber. Only the first call in a process wins.
pub fn init_tracing(format: LogFormat, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output = match format {
        LogFormat::Text => output.boxed(),
        LogFormat::Json => output.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .ok();
}
