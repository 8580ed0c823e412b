// Heap object command implementations
//
// Fields by name, raw array element runs, and object size/type queries

use crate::commands::Command;
use crate::connection::MjvmConnection;
use crate::protocol::{put_const_utf8, CommandPacket, DebugError, DebugResult};
use crate::reader::{read_const_utf8, read_u32};
use crate::types::decode_value;
use crate::types::Value;
use bytes::BufMut;

/// Largest element count a ReadArray request can carry (24-bit field)
pub const MAX_ARRAY_READ: u32 = 0x00FF_FFFF;

/// Heap size and runtime type descriptor of an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeAndType {
    pub size: u32,
    pub type_name: String,
}

impl MjvmConnection {
    /// Read a field of `object` by name (ReadField command).
    /// `descriptor` is the declared type and selects the decoding.
    pub async fn read_field(&self, object: u32, name: &str, descriptor: &str) -> DebugResult<Value> {
        let mut packet = CommandPacket::new(Command::ReadField);
        packet.data.put_u32_le(object);
        put_const_utf8(&mut packet.data, name);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        decode_value(descriptor, reply.data())
    }

    /// Read the size and type of a heap object (ReadSizeAndType command)
    pub async fn read_size_and_type(&self, object: u32) -> DebugResult<SizeAndType> {
        let mut packet = CommandPacket::new(Command::ReadSizeAndType);
        packet.data.put_u32_le(object);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let size = read_u32(&mut data)?;
        let type_name = read_const_utf8(&mut data)?;
        Ok(SizeAndType { size, type_name })
    }

    /// Read up to `length` raw little-endian elements of `array` starting at
    /// `index` (ReadArray command). The VM clamps the run to the array end.
    pub async fn read_array(
        &self,
        array: u32,
        index: u32,
        length: u32,
        element_size: u32,
    ) -> DebugResult<Vec<u64>> {
        if length > MAX_ARRAY_READ {
            return Err(DebugError::Protocol(format!(
                "Array read of {} elements exceeds {}",
                length, MAX_ARRAY_READ
            )));
        }

        // Command byte and 24-bit length share the first word
        let mut packet = CommandPacket::new(Command::ReadArray);
        packet.data.put_uint_le(length as u64, 3);
        packet.data.put_u32_le(index);
        packet.data.put_u32_le(array);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let data = reply.data();
        let width = element_size as usize;
        if width == 0 || data.len() % width != 0 {
            return Err(DebugError::Protocol(format!(
                "Array payload of {} bytes is not a multiple of element size {}",
                data.len(),
                element_size
            )));
        }

        Ok(data
            .chunks_exact(width)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw[..width].copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect())
    }
}
