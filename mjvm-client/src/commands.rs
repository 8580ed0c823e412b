// MJVM debugger command definitions
//
// Command ids, response codes and status bits understood by the VM debug server.
// The numbering below is the protocol revision this client speaks; older VM
// builds used a shorter command table and different status bits.

use serde::Serialize;
use std::fmt;

/// Debugger command id (first byte of every outgoing frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Command {
    ReadStatus = 0,
    ReadStackTrace = 1,
    AddBreakpoint = 2,
    RemoveBreakpoint = 3,
    RemoveAllBreakpoints = 4,
    Run = 5,
    Stop = 6,
    Restart = 7,
    Terminate = 8,
    StepIn = 9,
    StepOver = 10,
    StepOut = 11,
    SetExceptionMode = 12,
    ReadExceptionInfo = 13,
    ReadLocal = 14,
    WriteLocal = 15,
    ReadField = 16,
    WriteField = 17,
    ReadArray = 18,
    ReadSizeAndType = 19,
    InstallFile = 20,
    WriteFileData = 21,
    CompleteInstall = 22,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        let command = match value {
            0 => Self::ReadStatus,
            1 => Self::ReadStackTrace,
            2 => Self::AddBreakpoint,
            3 => Self::RemoveBreakpoint,
            4 => Self::RemoveAllBreakpoints,
            5 => Self::Run,
            6 => Self::Stop,
            7 => Self::Restart,
            8 => Self::Terminate,
            9 => Self::StepIn,
            10 => Self::StepOver,
            11 => Self::StepOut,
            12 => Self::SetExceptionMode,
            13 => Self::ReadExceptionInfo,
            14 => Self::ReadLocal,
            15 => Self::WriteLocal,
            16 => Self::ReadField,
            17 => Self::WriteField,
            18 => Self::ReadArray,
            19 => Self::ReadSizeAndType,
            20 => Self::InstallFile,
            21 => Self::WriteFileData,
            22 => Self::CompleteInstall,
            _ => return None,
        };
        Some(command)
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Response code carried in byte 4 of every response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    Busy,
    Fail,
    Other(u8),
}

impl ResponseCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Busy,
            2 => Self::Fail,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Busy => 1,
            Self::Fail => 2,
            Self::Other(code) => code,
        }
    }
}

// Status bits reported by ReadStatus
pub mod status_bits {
    pub const STOP: u8 = 0x01;
    /// One-shot edge: set when the VM enters the stopped state, cleared once reported
    pub const STOP_SET: u8 = 0x02;
    pub const EXCEPTION: u8 = 0x04;
    pub const RESET: u8 = 0x80;
}

/// Decoded ReadStatus byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VmStatus(pub u8);

impl VmStatus {
    pub fn is_stopped(self) -> bool {
        self.0 & status_bits::STOP != 0
    }

    pub fn stop_set(self) -> bool {
        self.0 & status_bits::STOP_SET != 0
    }

    pub fn has_exception(self) -> bool {
        self.0 & status_bits::EXCEPTION != 0
    }

    pub fn is_reset(self) -> bool {
        self.0 & status_bits::RESET != 0
    }

    /// Status with the stop bits cleared, used after a successful run or step
    pub fn running(self) -> Self {
        Self(self.0 & !(status_bits::STOP | status_bits::STOP_SET | status_bits::EXCEPTION))
    }
}
