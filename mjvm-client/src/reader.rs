// Helper functions for reading MJVM wire data from response payloads
//
// All integers are little-endian. Strings use the const-UTF-8 layout
// [length:u16][crc or reserved:u16][bytes][NUL]; the second half-word is never
// verified on read.

use crate::protocol::{DebugError, DebugResult};
use bytes::Buf;

/// Read a u8
pub fn read_u8(buf: &mut &[u8]) -> DebugResult<u8> {
    if buf.remaining() < 1 {
        return Err(DebugError::Protocol("Not enough data for u8".to_string()));
    }
    Ok(buf.get_u8())
}

/// Read a little-endian u16
pub fn read_u16(buf: &mut &[u8]) -> DebugResult<u16> {
    if buf.remaining() < 2 {
        return Err(DebugError::Protocol("Not enough data for u16".to_string()));
    }
    Ok(buf.get_u16_le())
}

/// Read a little-endian u32
pub fn read_u32(buf: &mut &[u8]) -> DebugResult<u32> {
    if buf.remaining() < 4 {
        return Err(DebugError::Protocol("Not enough data for u32".to_string()));
    }
    Ok(buf.get_u32_le())
}

/// Read a little-endian u64
pub fn read_u64(buf: &mut &[u8]) -> DebugResult<u64> {
    if buf.remaining() < 8 {
        return Err(DebugError::Protocol("Not enough data for u64".to_string()));
    }
    Ok(buf.get_u64_le())
}

/// Take exactly `len` raw bytes
pub fn read_bytes<'a>(buf: &mut &'a [u8], len: usize) -> DebugResult<&'a [u8]> {
    if buf.remaining() < len {
        return Err(DebugError::Protocol(format!(
            "Not enough data: expected {} bytes, got {}",
            len,
            buf.remaining()
        )));
    }
    let (bytes, rest) = buf.split_at(len);
    *buf = rest;
    Ok(bytes)
}

/// Read a const-UTF-8 string (length + reserved half-word + bytes + NUL)
pub fn read_const_utf8(buf: &mut &[u8]) -> DebugResult<String> {
    let len = read_u16(buf)? as usize;
    read_u16(buf)?;
    let bytes = read_bytes(buf, len)?;
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|e| DebugError::Protocol(format!("Invalid UTF-8 in string: {}", e)))?;

    // Terminator is optional at the very end of a payload
    if buf.first() == Some(&0) {
        buf.advance(1);
    }
    Ok(text)
}

/// Read a UTF-8 string running up to (and consuming) a NUL byte or the end of the buffer
pub fn read_nul_terminated(buf: &mut &[u8]) -> DebugResult<String> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let bytes = read_bytes(buf, end)?;
    if !buf.is_empty() {
        buf.advance(1);
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|e| DebugError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::put_const_utf8;

    #[test]
    fn test_little_endian_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B];
        let mut buf = &data[..];

        assert_eq!(read_u8(&mut buf).unwrap(), 0x01);
        assert_eq!(read_u16(&mut buf).unwrap(), 0x0302);
        assert_eq!(read_u32(&mut buf).unwrap(), 0x07060504);
        assert!(read_u64(&mut buf).is_err());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_short_buffer_is_protocol_error() {
        let data = [0x01, 0x02];
        let mut buf = &data[..];

        match read_u32(&mut buf) {
            Err(DebugError::Protocol(msg)) => assert!(msg.contains("u32")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_const_utf8_consumes_terminator() {
        let mut data = Vec::new();
        put_const_utf8(&mut data, "Main");
        put_const_utf8(&mut data, "main");
        let mut buf = &data[..];

        assert_eq!(read_const_utf8(&mut buf).unwrap(), "Main");
        assert_eq!(read_const_utf8(&mut buf).unwrap(), "main");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_const_utf8_ignores_reserved_word() {
        let data = [3, 0, 0xAA, 0xBB, b'a', b'b', b'c'];
        let mut buf = &data[..];

        assert_eq!(read_const_utf8(&mut buf).unwrap(), "abc");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_const_utf8_truncated() {
        let data = [5, 0, 0, 0, b'a'];
        let mut buf = &data[..];
        assert!(read_const_utf8(&mut buf).is_err());
    }

    #[test]
    fn test_nul_terminated() {
        let data = b"java/lang/String\0rest";
        let mut buf = &data[..];

        assert_eq!(read_nul_terminated(&mut buf).unwrap(), "java/lang/String");
        assert_eq!(buf, b"rest");
    }
}
