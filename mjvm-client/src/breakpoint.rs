// Breakpoint command implementations

use crate::commands::Command;
use crate::connection::MjvmConnection;
use crate::lineinfo::LineInfo;
use crate::protocol::{put_const_utf8, CommandPacket, DebugResult};
use bytes::BufMut;
use std::path::PathBuf;

/// A breakpoint held in a session's active set.
///
/// `requested_line` is what the host asked for; `location` is where it
/// landed after snapping to executable code. The VM identifies it only by
/// the location tuple.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub source: PathBuf,
    pub requested_line: u32,
    pub location: LineInfo,
}

impl Breakpoint {
    pub fn line(&self) -> u32 {
        self.location.line
    }
}

fn location_packet(command: Command, location: &LineInfo) -> CommandPacket {
    let mut packet = CommandPacket::new(command);
    packet.data.put_u32_le(location.pc);
    put_const_utf8(&mut packet.data, location.class_name());
    put_const_utf8(&mut packet.data, &location.method_name);
    put_const_utf8(&mut packet.data, &location.descriptor);
    packet
}

impl MjvmConnection {
    /// Install a breakpoint at a resolved location (AddBreakpoint command)
    pub async fn add_breakpoint(&self, location: &LineInfo) -> DebugResult<()> {
        let reply = self
            .send_command(location_packet(Command::AddBreakpoint, location))
            .await?;
        reply.check_error()
    }

    /// Remove a breakpoint at a resolved location (RemoveBreakpoint command)
    pub async fn remove_breakpoint(&self, location: &LineInfo) -> DebugResult<()> {
        let reply = self
            .send_command(location_packet(Command::RemoveBreakpoint, location))
            .await?;
        reply.check_error()
    }

    /// Clear every breakpoint the VM holds (RemoveAllBreakpoints command)
    pub async fn remove_all_breakpoints(&self) -> DebugResult<()> {
        let reply = self
            .send_command(CommandPacket::new(Command::RemoveAllBreakpoints))
            .await?;
        reply.check_error()
    }
}
