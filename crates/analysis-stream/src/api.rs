//! Request/response calls consumers make around a streamed job.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::StreamConfig;
use crate::errors::{ApiError, StreamError};
use crate::event::JobId;

/// Final analysis result for a job.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisSummary {
    pub session_id: String,
    #[serde(default)]
    pub repo_root: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub build_system: Option<String>,
    #[serde(default)]
    pub dependency_graph: BTreeMap<String, FileDependency>,
    #[serde(default)]
    pub features: Vec<FeatureModel>,
    #[serde(default)]
    pub build_dependencies: Vec<BuildDependency>,
    #[serde(default)]
    pub driver_model: Option<DriverModel>,
    #[serde(default)]
    pub assertions: Vec<AssertionModel>,
    #[serde(default)]
    pub config_files: Vec<ConfigFile>,
}

impl AnalysisSummary {
    /// Total test methods across all features.
    pub fn test_count(&self) -> usize {
        self.features.iter().map(|f| f.tests.len()).sum()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileDependency {
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureModel {
    pub feature_name: String,
    pub file_path: String,
    #[serde(default)]
    pub tests: Vec<TestMethod>,
    #[serde(default)]
    pub lifecycle_hooks: Vec<serde_json::Value>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TestMethod {
    pub name: String,
    #[serde(default)]
    pub annotations: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BuildDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DriverModel {
    #[serde(default)]
    pub driver_type: Option<String>,
    #[serde(default)]
    pub initialization_pattern: Option<String>,
    #[serde(default)]
    pub thread_model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssertionModel {
    pub file_path: String,
    #[serde(default)]
    pub assertion_type: Option<String>,
    #[serde(default)]
    pub library: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConfigFile {
    pub file_path: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Detail record of the session that owns a job.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MigrationSession {
    pub session_id: String,
    pub source_repo: String,
    pub target_repo: String,
    pub source_framework: String,
    pub target_framework: String,
    pub status: String,
    pub created_at: String,
    #[serde(default)]
    pub last_run_at: Option<String>,
}

/// One feature row of a session.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureEntity {
    pub feature_id: String,
    pub feature_name: String,
    #[serde(default)]
    pub source_files: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub last_migrated_commit: Option<String>,
    #[serde(default)]
    pub validation_status: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
}

/// HTTP client for the analysis backend.
#[derive(Clone)]
pub struct AnalysisApi {
    client: reqwest::Client,
    config: StreamConfig,
}

impl AnalysisApi {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        if config.api_base_url.trim().is_empty() {
            return Err(StreamError::Config("api_base_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Runs the analysis for `job` (the backend answers once it finished).
    pub async fn start_analysis(&self, job: &JobId) -> Result<AnalysisSummary, ApiError> {
        self.send(self.client.post(self.config.api_url(&analysis_path(job))))
            .await
    }

    /// Fetches the stored result of a finished job.
    pub async fn fetch_result(&self, job: &JobId) -> Result<AnalysisSummary, ApiError> {
        self.send(self.client.get(self.config.api_url(&analysis_path(job))))
            .await
    }

    /// Fetches the session detail record.
    pub async fn fetch_session(&self, job: &JobId) -> Result<MigrationSession, ApiError> {
        self.send(self.client.get(self.config.api_url(&session_path(job))))
            .await
    }

    /// Fetches the session's feature rows.
    pub async fn fetch_features(&self, job: &JobId) -> Result<Vec<FeatureEntity>, ApiError> {
        let path = format!("{}/features", session_path(job));
        self.send(self.client.get(self.config.api_url(&path))).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        debug!(url = %response.url(), %status, "analysis api response");
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        decode_body(&body)
    }
}

fn analysis_path(job: &JobId) -> String {
    format!("/api/analysis/{job}")
}

fn session_path(job: &JobId) -> String {
    format!("/api/session/{job}")
}

fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}
