//! Local status reporting
//!
//! Status is the only place run outcomes surface; nothing here feeds back into
//! engine or session decisions.

use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::{EngineState, TerminalReason};

/// Everything the agent can show on its status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    WaitingForInfo,
    PageInfoFailed,
    Connecting,
    Connected,
    Registered,
    Disconnected,
    PricesApplied,
    PriceApplyFailed,
    Engine(EngineState),
    Rejected(TerminalReason),
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::WaitingForInfo => "WAITING FOR INFO",
            Status::PageInfoFailed => "PAGE INFO FAILED",
            Status::Connecting => "CONNECTING",
            Status::Connected => "CONNECTED",
            Status::Registered => "REGISTERED",
            Status::Disconnected => "DISCONNECTED",
            Status::PricesApplied => "PRICES APPLIED",
            Status::PriceApplyFailed => "PRICE APPLY FAIL",
            Status::Engine(state) => match state {
                EngineState::Idle => "IDLE",
                EngineState::Armed => "ARMED",
                EngineState::WaitingForTarget => "WAITING FOR TIME",
                EngineState::Submitting => "SUBMITTING",
                EngineState::Decrementing => "RESUBMITTING",
                EngineState::Terminated(reason) => reason_label(*reason),
            },
            Status::Rejected(reason) => reason_label(*reason),
        }
    }

    /// Failure statuses are logged louder
    pub fn is_failure(&self) -> bool {
        match self {
            Status::PageInfoFailed | Status::Disconnected | Status::PriceApplyFailed => true,
            Status::Engine(EngineState::Terminated(reason)) => !reason.is_success(),
            Status::Rejected(_) => true,
            _ => false,
        }
    }
}

fn reason_label(reason: TerminalReason) -> &'static str {
    match reason {
        TerminalReason::Success => "SUCCESS",
        TerminalReason::SubmitFailed => "SUBMIT FAIL",
        TerminalReason::MinValueReached => "MIN VAL REACHED",
        TerminalReason::ApplyFailed => "APPLY FAIL",
        TerminalReason::NoSettings => "NO SETTINGS",
        TerminalReason::InvalidSettings => "INVALID SETTINGS",
        TerminalReason::PageElementMissing => "PAGE ELEM FAILED",
    }
}

/// Sink for status updates
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: Status);
}

/// Renders status as log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&self, status: Status) {
        match status {
            Status::PageInfoFailed | Status::Rejected(_) => {
                error!(status = status.label(), "Panel: {}", status.label())
            }
            s if s.is_failure() => warn!(status = s.label(), "Panel: {}", s.label()),
            s => info!(status = s.label(), "Panel: {}", s.label()),
        }
    }
}

/// Keeps every reported status in order; used to inspect agent behavior.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    history: Mutex<Vec<Status>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<Status> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Status> {
        self.history.lock().ok().and_then(|h| h.last().copied())
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, status: Status) {
        LogReporter.report(status);
        if let Ok(mut history) = self.history.lock() {
            history.push(status);
        }
    }
}
