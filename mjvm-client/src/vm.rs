// VM control command implementations
//
// Status, run/stop, restart/terminate and exception reporting

use crate::commands::{Command, VmStatus};
use crate::connection::MjvmConnection;
use crate::protocol::{put_const_utf8, CommandPacket, DebugResult};
use crate::reader::{read_const_utf8, read_nul_terminated, read_u16, read_u8};
use bytes::BufMut;
use serde::Serialize;

/// Details of the exception that stopped the VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
}

impl MjvmConnection {
    /// Read the VM status byte (ReadStatus command)
    pub async fn read_status(&self) -> DebugResult<VmStatus> {
        let reply = self.send_command(CommandPacket::new(Command::ReadStatus)).await?;
        reply.check_error()?;

        let mut data = reply.data();
        Ok(VmStatus(read_u8(&mut data)?))
    }

    /// Resume execution (Run command)
    pub async fn run(&self) -> DebugResult<()> {
        self.simple_command(Command::Run).await
    }

    /// Request a stop at the next instruction boundary (Stop command)
    pub async fn stop(&self) -> DebugResult<()> {
        self.simple_command(Command::Stop).await
    }

    /// Terminate all threads and start over at `main_class` (Restart command)
    pub async fn restart(&self, main_class: &str) -> DebugResult<()> {
        let mut packet = CommandPacket::new(Command::Restart);
        put_const_utf8(&mut packet.data, main_class);

        let reply = self.send_command(packet).await?;
        reply.check_error()
    }

    /// Terminate the program; with `end_debug` the VM also leaves debug mode
    pub async fn terminate(&self, end_debug: bool) -> DebugResult<()> {
        let mut packet = CommandPacket::new(Command::Terminate);
        packet.data.put_u8(end_debug as u8);

        let reply = self.send_command(packet).await?;
        reply.check_error()
    }

    /// Enable or disable stopping on thrown exceptions (SetExceptionMode command)
    pub async fn set_exception_mode(&self, enabled: bool) -> DebugResult<()> {
        let mut packet = CommandPacket::new(Command::SetExceptionMode);
        packet.data.put_u8(enabled as u8);

        let reply = self.send_command(packet).await?;
        reply.check_error()
    }

    /// Type and detail message of the pending exception (ReadExceptionInfo command)
    pub async fn read_exception_info(&self) -> DebugResult<ExceptionInfo> {
        let reply = self
            .send_command(CommandPacket::new(Command::ReadExceptionInfo))
            .await?;
        reply.check_error()?;

        let mut data = reply.data();
        let type_name = read_const_utf8(&mut data)?;
        // Character count, then a reserved half-word; the text runs to NUL
        read_u16(&mut data)?;
        read_u16(&mut data)?;
        let message = read_nul_terminated(&mut data)?;

        Ok(ExceptionInfo { type_name, message })
    }

    async fn simple_command(&self, command: Command) -> DebugResult<()> {
        let reply = self.send_command(CommandPacket::new(command)).await?;
        reply.check_error()
    }
}
