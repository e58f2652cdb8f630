//! Common imports for typical stream client usage.
pub use crate::{
    AnalysisApi, ApiError, ConnectionPhase, JobId, RawEvent, ReconnectPolicy, StreamClient,
    StreamConfig, StreamError, ViewModel, WebSocketTransport,
};
