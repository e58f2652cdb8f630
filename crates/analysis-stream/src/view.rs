/// Consumer-facing state of one job run, produced only by the reducer.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ViewModel {
    /// Last known stage name; empty until the first progress event.
    pub step: String,
    /// Last reported percentage.
    pub progress: i32,
    /// Append-only log lines in arrival order.
    pub logs: Vec<String>,
    /// Job failure cause, set by an `error` event.
    pub error: Option<String>,
    /// Diagnostic detail accompanying `error`.
    pub trace: Option<String>,
    /// Set once by the first `complete` event.
    pub is_complete: bool,
    /// Whether the live transport session is currently open.
    pub is_connected: bool,
}

impl ViewModel {
    /// Returns true once the job completed or failed.
    pub fn is_terminal(&self) -> bool {
        self.is_complete || self.error.is_some()
    }

    /// Returns true when the job reported a failure.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Short status line for consumers that render a header.
    pub fn headline(&self) -> String {
        if self.error.is_some() {
            "Analysis failed".to_string()
        } else if self.is_complete {
            "Analysis complete".to_string()
        } else if self.step.is_empty() {
            "Initializing...".to_string()
        } else {
            format!("Step: {}", self.step)
        }
    }
}
