//! Pure state transitions for the job view model.
//!
//! The wire protocol has no retraction events, so every transition either
//! leaves the model untouched or appends to it. Once the job is terminal all
//! further raw events are ignored, which makes a replayed `complete` a no-op.

use crate::event::RawEvent;
use crate::view::ViewModel;

/// Step name forced by a `complete` event.
pub const COMPLETE_STEP: &str = "Complete";
/// Log line appended by a `complete` event.
pub const COMPLETE_LOG_LINE: &str = "✅ Analysis completed successfully";
/// Prefix of the log line appended by an `error` event.
pub const ERROR_LOG_PREFIX: &str = "❌ Error: ";
/// Fallback cause for an `error` event without one.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Folds one raw event into the view model.
pub fn reduce(mut view: ViewModel, event: &RawEvent) -> ViewModel {
    if view.is_terminal() {
        return view;
    }

    match event {
        RawEvent::Progress {
            step,
            progress,
            message,
            ..
        } => {
            if let Some(step) = step.as_deref().filter(|s| !s.is_empty()) {
                view.step = step.to_string();
            }
            if let Some(progress) = progress {
                view.progress = *progress;
            }
            if let Some(message) = message.as_deref().filter(|m| !m.is_empty()) {
                let line = format!("[{}] {}", view.step, message);
                view.logs.push(line);
            }
        }
        RawEvent::Log { message, .. } => {
            if let Some(message) = message.as_deref().filter(|m| !m.is_empty()) {
                view.logs.push(message.to_string());
            }
        }
        RawEvent::Error { error, trace, .. } => {
            let cause = error
                .as_deref()
                .filter(|e| !e.is_empty())
                .unwrap_or(UNKNOWN_ERROR)
                .to_string();
            view.logs.push(format!("{ERROR_LOG_PREFIX}{cause}"));
            view.error = Some(cause);
            view.trace = trace.clone().filter(|t| !t.is_empty());
        }
        RawEvent::Complete { .. } => {
            view.step = COMPLETE_STEP.to_string();
            view.progress = 100;
            view.is_complete = true;
            view.logs.push(COMPLETE_LOG_LINE.to_string());
        }
        RawEvent::Unknown => {}
    }
    view
}

/// Records an open/close notification from the live transport session.
pub fn reduce_connection(mut view: ViewModel, connected: bool) -> ViewModel {
    view.is_connected = connected;
    view
}

/// Folds a whole event sequence, starting from `view`.
pub fn reduce_all<'a>(
    view: ViewModel,
    events: impl IntoIterator<Item = &'a RawEvent>,
) -> ViewModel {
    events.into_iter().fold(view, reduce)
}
