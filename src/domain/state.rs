use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a run ended (or why a start was refused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalReason {
    /// Submission confirmed by the page
    Success,
    /// Submission not confirmed and auto-decrement disabled
    SubmitFailed,
    /// A decrement would have taken some item below its floor
    MinValueReached,
    /// The page refused the decremented prices
    ApplyFailed,
    /// Start requested before any parameters were received
    NoSettings,
    /// Parameters present but inconsistent (misaligned floors, bad target time)
    InvalidSettings,
    /// The submit control could not be located on the page
    PageElementMissing,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::Success => "SUCCESS",
            TerminalReason::SubmitFailed => "SUBMIT_FAILED",
            TerminalReason::MinValueReached => "MIN_VALUE_REACHED",
            TerminalReason::ApplyFailed => "APPLY_FAILED",
            TerminalReason::NoSettings => "NO_SETTINGS",
            TerminalReason::InvalidSettings => "INVALID_SETTINGS",
            TerminalReason::PageElementMissing => "PAGE_ELEMENT_MISSING",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminalReason::Success)
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bid engine state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    /// No run in progress
    Idle,
    /// Start accepted, waiting out the start jitter
    Armed,
    /// Polling the wall clock for the target time
    WaitingForTarget,
    /// Submit clicked, waiting for the outcome check
    Submitting,
    /// Lowering prices before a resubmission
    Decrementing,
    /// Run finished; transient before the engine settles back to Idle
    Terminated(TerminalReason),
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "IDLE",
            EngineState::Armed => "ARMED",
            EngineState::WaitingForTarget => "WAITING_FOR_TARGET",
            EngineState::Submitting => "SUBMITTING",
            EngineState::Decrementing => "DECREMENTING",
            EngineState::Terminated(_) => "TERMINATED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: EngineState) -> bool {
        use EngineState::*;

        match (self, target) {
            // stop() is accepted from anywhere
            (_, Idle) => true,

            (Idle, Armed) => true,
            (Armed, WaitingForTarget) => true,
            (WaitingForTarget, Submitting) => true,

            // Outcome evaluation
            (Submitting, Decrementing) => true,
            (Submitting, Terminated(_)) => true,

            // Resubmission round or halt
            (Decrementing, Submitting) => true,
            (Decrementing, Terminated(_)) => true,

            _ => false,
        }
    }

    /// Is a run in progress (any timer may still be pending)?
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EngineState::Armed
                | EngineState::WaitingForTarget
                | EngineState::Submitting
                | EngineState::Decrementing
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Terminated(reason) => write!(f, "TERMINATED({})", reason),
            other => write!(f, "{}", other.as_str()),
        }
    }
}
