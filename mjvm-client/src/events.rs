// Session events
//
// The VM never pushes anything on its own; these are derived from status
// polling and socket state and delivered to the host through a channel.

use crate::commands::VmStatus;
use serde::Serialize;

/// Why the VM entered the stopped state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Breakpoint,
    Step,
    Pause,
    Exception,
}

impl StopReason {
    /// Reason for a stop observed in `status`, given what the client last asked for
    pub fn classify(status: VmStatus, requested: Option<StopReason>) -> Self {
        if status.has_exception() {
            Self::Exception
        } else {
            requested.unwrap_or(Self::Breakpoint)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakpoint => "breakpoint",
            Self::Step => "step",
            Self::Pause => "pause",
            Self::Exception => "exception",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DebugEvent {
    Stopped { reason: StopReason },
    /// VM is idle and waiting for a restart or file install
    Reset,
    /// Connection closed; the session is over
    Terminated,
}
