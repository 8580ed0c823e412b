// MJVM debugger client library
//
// Talks to the debug server embedded in an MJVM target:
// - Class-file parsing and symbol resolution against local class paths
// - Line and local-variable lookup
// - The command/response wire protocol
// - Session state, breakpoints, stepping and stack inspection
// - Object, array and string inspection
// - File install

pub mod breakpoint;
pub mod classfile;
pub mod commands;
pub mod config;
pub mod connection;
pub mod events;
pub mod inspect;
pub mod install;
pub mod lineinfo;
pub mod object;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod stack;
pub mod symbols;
pub mod transport;
pub mod types;
pub mod vm;

#[cfg(test)]
mod testing;

pub use breakpoint::Breakpoint;
pub use commands::{Command, ResponseCode, VmStatus};
pub use config::SessionConfig;
pub use connection::MjvmConnection;
pub use events::{DebugEvent, StopReason};
pub use lineinfo::LineInfo;
pub use protocol::{DebugError, DebugResult};
pub use session::{DebugSession, SessionState, StackFrame};
pub use types::{PrimitiveValue, Value, ValueInfo};
pub use vm::ExceptionInfo;
