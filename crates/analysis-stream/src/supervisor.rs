//! Reconnect state machine.
//!
//! The supervisor never touches the network or the clock. It hands out
//! session generations, decides which generation is live, and tells the
//! client what to do after a close. Every transport event is tagged with the
//! generation it came from; anything not matching the live one is stale.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::config::ReconnectPolicy;
use crate::transport::CloseCode;

/// Identity of one transport session within a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supervisor state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConnectionPhase {
    /// Not bound to a running job stream.
    Idle,
    /// A session was opened and has not reported `Opened` yet.
    Connecting,
    /// The live session is open.
    Connected,
    /// The live session dropped; a reconnect is scheduled.
    Retrying,
    /// The job finished or failed; no reconnects until reset.
    Terminal,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Retrying => "retrying",
            Self::Terminal => "terminal",
        };
        f.write_str(label)
    }
}

/// What the client should do after the live session closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The close came from a superseded session; ignore it.
    Stale,
    /// Schedule a new session after the delay.
    Retry(Duration),
    /// Remote closed normally or the retry budget ran out; stay idle.
    Parked,
    /// The job already reached a terminal state; nothing to do.
    Finished,
}

#[derive(Debug)]
pub struct ReconnectSupervisor {
    phase: ConnectionPhase,
    policy: ReconnectPolicy,
    last_generation: u64,
    live: Option<Generation>,
    attempts: u32,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            policy,
            last_generation: 0,
            live: None,
            attempts: 0,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Generation currently owning event delivery, if any.
    pub fn live(&self) -> Option<Generation> {
        self.live
    }

    /// Consecutive reconnects since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_live(&self, generation: Generation) -> bool {
        self.live == Some(generation)
    }

    /// `Idle -> Connecting`. Returns the generation to open, or `None` when the
    /// supervisor is already running or terminal.
    pub fn enable(&mut self) -> Option<Generation> {
        match self.phase {
            ConnectionPhase::Idle => Some(self.begin_session()),
            phase => {
                debug!(%phase, "enable ignored");
                None
            }
        }
    }

    /// `Connecting -> Connected` for the live generation.
    pub fn opened(&mut self, generation: Generation) -> bool {
        if !self.is_live(generation) {
            return false;
        }
        if self.phase == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::Connected;
            self.attempts = 0;
        }
        true
    }

    /// Records that the job reached `complete` or `error`.
    pub fn job_finished(&mut self) {
        self.phase = ConnectionPhase::Terminal;
    }

    /// Handles a close reported by a session.
    pub fn closed(&mut self, generation: Generation, code: CloseCode) -> CloseOutcome {
        if !self.is_live(generation) {
            return CloseOutcome::Stale;
        }
        self.live = None;

        match self.phase {
            ConnectionPhase::Terminal => CloseOutcome::Finished,
            _ if code.is_normal() => {
                self.phase = ConnectionPhase::Idle;
                CloseOutcome::Parked
            }
            _ if self.policy.can_retry(self.attempts) => {
                self.phase = ConnectionPhase::Retrying;
                self.attempts = self.attempts.saturating_add(1);
                CloseOutcome::Retry(self.policy.delay)
            }
            _ => {
                self.phase = ConnectionPhase::Idle;
                CloseOutcome::Parked
            }
        }
    }

    /// `Retrying -> Connecting` once the delay elapsed.
    pub fn retry_due(&mut self) -> Option<Generation> {
        match self.phase {
            ConnectionPhase::Retrying => Some(self.begin_session()),
            _ => None,
        }
    }

    /// Intentional tear-down. Returns the generation that was live so the
    /// caller can close it. A terminal run stays terminal.
    pub fn disable(&mut self) -> Option<Generation> {
        if self.phase != ConnectionPhase::Terminal {
            self.phase = ConnectionPhase::Idle;
        }
        self.attempts = 0;
        self.live.take()
    }

    /// Returns to `Idle` from any state, forgetting the live session.
    pub fn reset(&mut self) -> Option<Generation> {
        self.phase = ConnectionPhase::Idle;
        self.attempts = 0;
        self.live.take()
    }

    fn begin_session(&mut self) -> Generation {
        self.last_generation += 1;
        let generation = Generation(self.last_generation);
        self.live = Some(generation);
        self.phase = ConnectionPhase::Connecting;
        generation
    }
}
