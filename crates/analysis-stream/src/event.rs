use std::fmt;

/// Opaque identifier of one analysis job (the backend calls it a session).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Creates a job id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the job id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// One status message received on a job's stream channel.
///
/// The `session_id` routing field is kept for diagnostics only; a stream is
/// bound to a single job, so reduction ignores it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawEvent {
    /// Stage change and/or percentage update, optionally with a log message.
    Progress {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        step: Option<String>,
        #[serde(default, deserialize_with = "lenient_progress")]
        progress: Option<i32>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Preformatted log line.
    Log {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Terminal job failure.
    Error {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        trace: Option<String>,
    },
    /// Terminal job success.
    Complete {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Any tag this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl RawEvent {
    /// Parses one JSON-encoded wire message.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Returns the wire tag, mainly for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Log { .. } => "log",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true for `error` and `complete`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Complete { .. })
    }

    /// Shorthand for a progress event without routing id.
    pub fn progress(step: Option<&str>, progress: Option<i32>, message: Option<&str>) -> Self {
        Self::Progress {
            session_id: None,
            step: step.map(ToOwned::to_owned),
            progress,
            message: message.map(ToOwned::to_owned),
        }
    }

    /// Shorthand for a log event without routing id.
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            session_id: None,
            message: Some(message.into()),
        }
    }

    /// Shorthand for an error event without routing id.
    pub fn error(error: impl Into<String>, trace: Option<&str>) -> Self {
        Self::Error {
            session_id: None,
            error: Some(error.into()),
            trace: trace.map(ToOwned::to_owned),
        }
    }

    /// Shorthand for a complete event without routing id.
    pub fn complete() -> Self {
        Self::Complete { session_id: None }
    }
}

/// Accepts any JSON number for `progress`, truncating fractions and
/// saturating at the `i32` range. Non-numeric values count as absent so the
/// rest of the frame still applies.
fn lenient_progress<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize as _;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => match number.as_i64() {
            Some(int) => Some(int.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32),
            None => number.as_f64().map(|float| float as i32),
        },
        Some(other) => {
            tracing::debug!(value = %other, "ignoring non-numeric progress");
            None
        }
        None => None,
    })
}
