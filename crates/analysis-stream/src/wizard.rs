//! Application state for the analysis wizard.
//!
//! State is a plain value passed to whoever drives the wizard; every change
//! goes through `apply`, so transitions are testable without a UI.

/// Wizard page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WizardStep {
    #[default]
    RepoConfiguration,
    BranchSelection,
    /// Job created; the progress stream is shown.
    Analysis,
}

impl WizardStep {
    /// One-based page number.
    pub fn number(self) -> u8 {
        match self {
            Self::RepoConfiguration => 1,
            Self::BranchSelection => 2,
            Self::Analysis => 3,
        }
    }
}

/// Repository form fields collected on the first pages.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RepoDetails {
    pub session_name: String,
    pub repo_url: String,
    pub target_repo_url: String,
    /// Access token; skipped when the state is serialized.
    #[serde(skip)]
    pub pat: String,
    pub source_framework: String,
    pub target_framework: String,
    pub branches: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WizardState {
    pub step: WizardStep,
    pub repo: RepoDetails,
    pub session_id: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WizardAction {
    SetStep(WizardStep),
    SetRepoDetails(RepoDetails),
    /// Backend created the job; moves to the analysis page.
    SetSession(String),
    SetLoading(bool),
    SetError(Option<String>),
    Reset,
}

/// Applies one action.
pub fn apply(mut state: WizardState, action: WizardAction) -> WizardState {
    match action {
        WizardAction::SetStep(step) => state.step = step,
        WizardAction::SetRepoDetails(repo) => state.repo = repo,
        WizardAction::SetSession(session_id) => {
            state.session_id = Some(session_id);
            state.step = WizardStep::Analysis;
        }
        WizardAction::SetLoading(is_loading) => state.is_loading = is_loading,
        WizardAction::SetError(error) => state.error = error,
        WizardAction::Reset => return WizardState::default(),
    }
    state
}

impl WizardState {
    /// Job id to stream, available once the wizard reached the analysis page.
    pub fn stream_target(&self) -> Option<&str> {
        match self.step {
            WizardStep::Analysis => self.session_id.as_deref(),
            _ => None,
        }
    }
}
