use std::time::Duration;

use crate::errors::StreamError;
use crate::event::JobId;

const DEFAULT_WS_BASE_URL: &str = "ws://127.0.0.1:8000";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";

/// Reconnect schedule applied after an abnormal close.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReconnectPolicy {
    /// Fixed wait before each new connection attempt.
    pub delay: Duration,
    /// Consecutive failed attempts allowed before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2_000),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed-delay policy without a retry cap.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Caps consecutive reconnect attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn can_retry(&self, attempts_done: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_done < max)
    }
}

/// Configuration shared by the stream client and the collaborator API client.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Base URL of the event-stream server (`ws://` or `wss://`).
    pub ws_base_url: String,
    /// Base URL of the request/response API.
    pub api_base_url: String,
    /// Reconnect schedule.
    pub reconnect: ReconnectPolicy,
    /// Bounded buffer between transport sessions and the client task.
    pub event_buffer_capacity: usize,
    /// Optional limit on a single connection attempt.
    pub connect_timeout: Option<Duration>,
    /// Timeout for collaborator HTTP requests.
    pub request_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WS_BASE_URL, DEFAULT_API_BASE_URL)
    }
}

impl StreamConfig {
    /// Creates a config with default reconnect and buffer settings.
    pub fn new(ws_base_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            api_base_url: api_base_url.into(),
            reconnect: ReconnectPolicy::default(),
            event_buffer_capacity: 128,
            connect_timeout: None,
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `ANALYSIS_*` environment variables, falling back to
    /// defaults for unset ones.
    ///
    /// - `ANALYSIS_WS_URL`, `ANALYSIS_API_URL`: base URLs.
    /// - `ANALYSIS_RECONNECT_DELAY_MS`: fixed reconnect delay.
    /// - `ANALYSIS_MAX_RECONNECTS`: retry cap (unset means unlimited).
    /// - `ANALYSIS_CONNECT_TIMEOUT_MS`: per-attempt connect timeout.
    pub fn from_env() -> Result<Self, StreamError> {
        let mut config = Self::default();
        if let Some(url) = env_string("ANALYSIS_WS_URL") {
            config.ws_base_url = url;
        }
        if let Some(url) = env_string("ANALYSIS_API_URL") {
            config.api_base_url = url;
        }
        if let Some(ms) = env_parse::<u64>("ANALYSIS_RECONNECT_DELAY_MS")? {
            config.reconnect.delay = Duration::from_millis(ms);
        }
        if let Some(max) = env_parse::<u32>("ANALYSIS_MAX_RECONNECTS")? {
            config.reconnect.max_attempts = Some(max);
        }
        if let Some(ms) = env_parse::<u64>("ANALYSIS_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Some(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the reconnect policy.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Overrides the event buffer capacity.
    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    /// Sets a per-attempt connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Overrides the collaborator request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Checks URLs and buffer sizing.
    pub fn validate(&self) -> Result<(), StreamError> {
        let ws = self.ws_base_url.trim();
        if ws.is_empty() {
            return Err(StreamError::config("ws_base_url must not be empty"));
        }
        if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
            return Err(StreamError::config(format!(
                "ws_base_url must use ws:// or wss:// (got {ws})"
            )));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(StreamError::config("api_base_url must not be empty"));
        }
        if self.event_buffer_capacity == 0 {
            return Err(StreamError::config(
                "event_buffer_capacity must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Stream channel endpoint for one job.
    pub fn session_endpoint(&self, job_id: &JobId) -> String {
        format!(
            "{}/ws/sessions/{}",
            self.ws_base_url.trim_end_matches('/'),
            job_id
        )
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, StreamError> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| StreamError::config(format!("invalid value for {key}: {raw}"))),
        None => Ok(None),
    }
}
