use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    /// Created, worker not yet fetching.
    New,
    /// Fetching or processing events.
    Running,
    /// Caught up (or blocked on a failing event) until signaled.
    Waiting,
    /// Failed unexpectedly. Terminal.
    Error,
    /// Stopped on request or because its source or target went away.
    Stopped,
}

impl AgentState {
    /// Returns `true` once the worker thread has exited.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Stopped)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of an agent's progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Sequence number of the last processed event.
    pub cur_seq: u64,
    /// Highest sequence number known to exist in the source.
    pub max_seq: u64,
    pub state: AgentState,
}

impl AgentInfo {
    pub fn new(cur_seq: u64, max_seq: u64, state: AgentState) -> Self {
        Self {
            cur_seq,
            max_seq,
            state,
        }
    }

    /// Number of known events not yet processed.
    pub fn lag(&self) -> u64 {
        self.max_seq.saturating_sub(self.cur_seq)
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self::new(0, 0, AgentState::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_never_underflows() {
        assert_eq!(AgentInfo::new(3, 10, AgentState::Running).lag(), 7);
        assert_eq!(AgentInfo::new(10, 3, AgentState::Waiting).lag(), 0);
    }

    #[test]
    fn terminal_states() {
        assert!(AgentState::Error.is_terminal());
        assert!(AgentState::Stopped.is_terminal());
        assert!(!AgentState::Waiting.is_terminal());
        assert_eq!(AgentState::Waiting.to_string(), "waiting");
    }
}
