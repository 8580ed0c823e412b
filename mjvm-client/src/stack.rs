// Stack and stepping command implementations
//
// Frames are read one index at a time; each reply flags whether it is the
// outermost frame of the stack.

use crate::commands::Command;
use crate::connection::MjvmConnection;
use crate::protocol::{CommandPacket, DebugError, DebugResult};
use crate::reader::{read_const_utf8, read_u32};
use crate::types::{decode_value, is_wide, Value};
use bytes::BufMut;

const OUTERMOST_FLAG: u32 = 0x8000_0000;

/// One frame exactly as the VM reports it, before symbol resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub index: u32,
    pub is_outermost: bool,
    pub pc: u32,
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
}

impl MjvmConnection {
    /// Read frame `index`, 0 being the innermost (ReadStackTrace command)
    pub async fn read_stack_frame(&self, index: u32) -> DebugResult<RawFrame> {
        let mut packet = CommandPacket::new(Command::ReadStackTrace);
        packet.data.put_u32_le(index);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let tagged_index = read_u32(&mut data)?;
        let frame_index = tagged_index & !OUTERMOST_FLAG;
        if frame_index != index {
            return Err(DebugError::Protocol(format!(
                "Asked for frame {}, VM answered frame {}",
                index, frame_index
            )));
        }

        let pc = read_u32(&mut data)?;
        let class_name = read_const_utf8(&mut data)?;
        let method_name = read_const_utf8(&mut data)?;
        let descriptor = read_const_utf8(&mut data)?;

        Ok(RawFrame {
            index: frame_index,
            is_outermost: tagged_index & OUTERMOST_FLAG != 0,
            pc,
            class_name,
            method_name,
            descriptor,
        })
    }

    /// Step into calls, stopping after `run_length` bytecode bytes of the current line
    pub async fn step_in(&self, run_length: u32) -> DebugResult<()> {
        self.step_with_length(Command::StepIn, run_length).await
    }

    /// Step over calls, stopping after `run_length` bytecode bytes of the current line
    pub async fn step_over(&self, run_length: u32) -> DebugResult<()> {
        self.step_with_length(Command::StepOver, run_length).await
    }

    /// Run until the current method returns (StepOut command)
    pub async fn step_out(&self) -> DebugResult<()> {
        let reply = self.send_command(CommandPacket::new(Command::StepOut)).await?;
        reply.check_error()
    }

    /// Read local variable `slot` of frame `frame_index` (ReadLocal command)
    pub async fn read_local(&self, frame_index: u32, slot: u32, descriptor: &str) -> DebugResult<Value> {
        let mut packet = CommandPacket::new(Command::ReadLocal);
        packet.data.put_u8(is_wide(descriptor) as u8);
        packet.data.put_u32_le(frame_index);
        packet.data.put_u32_le(slot);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        decode_value(descriptor, reply.data())
    }

    async fn step_with_length(&self, command: Command, run_length: u32) -> DebugResult<()> {
        let mut packet = CommandPacket::new(command);
        // The VM refuses a zero-length step
        packet.data.put_u32_le(run_length.max(1));

        let reply = self.send_command(packet).await?;
        reply.check_error()
    }
}
