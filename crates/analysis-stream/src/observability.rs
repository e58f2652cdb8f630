//! Process-wide tracing setup for stream clients and their front ends.
//!
//! Stream client events are emitted inside a `stream_client` span carrying
//! `client_id` and, once a job is bound, `job_id`. The JSON output keeps the
//! current span on every line so records from concurrent clients can be
//! separated.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

/// Used when neither `ANALYSIS_LOG_LEVEL` nor `RUST_LOG` is set: our crates
/// at `info`, dependencies (tungstenite, hyper, rustls) at `warn`.
pub const DEFAULT_FILTER: &str = "warn,analysis_stream=info,analysis=info";
const DEFAULT_LOG_FILE: &str = "analysis-stream.jsonl";
const OWN_TARGETS: [&str; 2] = ["analysis_stream", "analysis"];
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Resolved logging settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub filter: String,
    /// JSONL output file; `None` logs compactly to stderr.
    pub json_log_path: Option<PathBuf>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: DEFAULT_FILTER.to_string(),
            json_log_path: None,
        }
    }
}

impl ObservabilitySettings {
    /// Reads settings from the process environment.
    ///
    /// - `ANALYSIS_OBSERVABILITY_ENABLED` / `ANALYSIS_OBSERVABILITY`: on/off flag (default on).
    /// - `ANALYSIS_LOG_LEVEL`: a bare level applies to this crate and the CLI only;
    ///   full directives are used as given.
    /// - `RUST_LOG`: fallback directives.
    /// - `ANALYSIS_JSON_LOG_PATH`: JSONL file, or a directory ending in `/`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let enabled = ["ANALYSIS_OBSERVABILITY_ENABLED", "ANALYSIS_OBSERVABILITY"]
            .into_iter()
            .find_map(&value)
            .map_or(true, |flag| parse_flag(&flag).unwrap_or(true));

        let filter = match value("ANALYSIS_LOG_LEVEL") {
            Some(level) => scoped_filter(&level),
            None => value("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        };

        let json_log_path = value("ANALYSIS_JSON_LOG_PATH").map(|raw| {
            if raw.ends_with('/') {
                Path::new(&raw).join(DEFAULT_LOG_FILE)
            } else {
                PathBuf::from(raw)
            }
        });

        Self {
            enabled,
            filter,
            json_log_path,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Expands a bare level to directives for our own targets.
fn scoped_filter(level: &str) -> String {
    let lower = level.to_ascii_lowercase();
    if !LEVELS.contains(&lower.as_str()) {
        return level.to_string();
    }
    let mut directives = String::from("warn");
    for target in OWN_TARGETS {
        directives.push_str(&format!(",{target}={lower}"));
    }
    directives
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file)
}

/// Installs the global subscriber from the environment, once per process.
pub fn init_observability() {
    init_with(ObservabilitySettings::from_env());
}

/// Installs the global subscriber from explicit settings. Later calls, and
/// calls after another subscriber was installed, are no-ops.
pub fn init_with(settings: ObservabilitySettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|err| {
            eprintln!("invalid log filter {:?} ({err}); using {DEFAULT_FILTER}", settings.filter);
            EnvFilter::new(DEFAULT_FILTER)
        });

        match settings.json_log_path.as_deref() {
            Some(path) => {
                let (dir, file) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(tracing_appender::rolling::never(dir, file));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
