//! Live progress stream client for remote code-analysis jobs.
//!
//! A `StreamClient` follows one job at a time: it opens a transport session
//! for the job, folds every pushed event into a `ViewModel`, and reconnects
//! on a fixed delay after abnormal drops until the job reaches a terminal
//! state or the consumer disables it.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use analysis_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let config = StreamConfig::from_env()?;
//! let transport = Arc::new(WebSocketTransport::from_config(&config));
//! let client = StreamClient::spawn(transport, config)?;
//! client.enable("7f3c");
//!
//! let mut view = client.subscribe();
//! while view.changed().await.is_ok() {
//!     let current = view.borrow_and_update().clone();
//!     println!("{}", current.headline());
//!     if current.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Request/response calls around a job (start, result, session detail).
pub mod api;
/// Stream client handle and its actor task.
pub mod client;
/// Client configuration and reconnect policy.
pub mod config;
/// Public error types.
pub mod errors;
/// Wire events pushed by the backend and job identifiers.
pub mod event;
/// Process-wide tracing setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Pure view-model reducer.
pub mod reducer;
/// Reconnect state machine.
pub mod supervisor;
/// Transport session contract and the WebSocket implementation.
pub mod transport;
/// Consumer-facing view model.
pub mod view;
/// Wizard application state.
pub mod wizard;

pub use api::{AnalysisApi, AnalysisSummary, FeatureEntity, MigrationSession};
pub use client::StreamClient;
pub use config::{ReconnectPolicy, StreamConfig};
pub use errors::{ApiError, StreamError, TransportError};
pub use event::{JobId, RawEvent};
pub use observability::{ObservabilitySettings, init_observability};
pub use reducer::{reduce, reduce_all, reduce_connection};
pub use supervisor::{CloseOutcome, ConnectionPhase, Generation, ReconnectSupervisor};
pub use transport::{
    CloseCode, CloseRequest, EventSink, SessionEvent, SessionHandle, Transport, TransportEvent,
    WebSocketTransport,
};
pub use view::ViewModel;
pub use wizard::{RepoDetails, WizardAction, WizardState, WizardStep};
