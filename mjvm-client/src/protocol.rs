// MJVM debug protocol definitions and frame handling
//
// Outgoing command:  [cmd:u8][payload...]
// Incoming response: [cmd|0x80:u8][dataLength:u24][responseCode:u8][payload: dataLength bytes]
//
// Unlike the class file format, every multi-byte value on the wire is little-endian.

use crate::commands::{Command, ResponseCode};
use bytes::{BufMut, BytesMut};
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed class file: {0}")]
    MalformedClassFile(String),

    #[error("Could not find class file for \"{0}\"")]
    ClassNotFound(String),

    #[error("Method not found: {class}.{name}{descriptor}")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },

    #[error("Could not resolve source for {0}")]
    SourceUnresolvable(String),

    #[error("Line {line} in {file} has no executable code")]
    LineNotExecutable { file: String, line: u32 },

    #[error("Class hierarchy of {0} exceeds {1} levels")]
    HierarchyTooDeep(String, usize),

    #[error("Protocol desync: expected response to {expected}, got command byte {actual:#04x}")]
    ProtocolDesync { expected: Command, actual: u8 },

    #[error("Command {0} timed out")]
    CommandTimeout(Command),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("VM busy, {0} rejected")]
    Busy(Command),

    #[error("VM failed {0} (response code {1})")]
    CommandFailed(Command, u8),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

pub const RESPONSE_HEADER_SIZE: usize = 5;
pub const RESPONSE_FLAG: u8 = 0x80;

/// Largest payload a response header can declare (24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

#[derive(Debug, Clone)]
pub struct CommandPacket {
    pub command: Command,
    pub data: Vec<u8>,
}

impl CommandPacket {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            data: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1 + self.data.len());
        buf.put_u8(self.command.id());
        buf.put_slice(&self.data);
        buf.to_vec()
    }
}

/// Decoded response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Command byte with the reserved top bit masked off
    pub command: u8,
    pub data_length: usize,
    pub code: u8,
}

impl ResponseHeader {
    pub fn decode(header: &[u8; RESPONSE_HEADER_SIZE]) -> Self {
        let data_length =
            u32::from_le_bytes([header[1], header[2], header[3], 0]) as usize;
        Self {
            command: header[0] & !RESPONSE_FLAG,
            data_length,
            code: header[4],
        }
    }
}

/// A fully reassembled response, already matched to the command it answers
#[derive(Debug, Clone)]
pub struct ResponsePacket {
    pub command: Command,
    pub code: ResponseCode,
    pub data: Vec<u8>,
}

impl ResponsePacket {
    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }

    pub fn check_error(&self) -> DebugResult<()> {
        match self.code {
            ResponseCode::Ok => Ok(()),
            ResponseCode::Busy => Err(DebugError::Busy(self.command)),
            other => Err(DebugError::CommandFailed(self.command, other.as_u8())),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Encode a response frame the way the VM does
pub fn encode_response(command: Command, code: ResponseCode, data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_SIZE + data.len());
    buf.put_u8(command.id() | RESPONSE_FLAG);
    buf.put_uint_le(data.len() as u64, 3);
    buf.put_u8(code.as_u8());
    buf.put_slice(data);
    buf.to_vec()
}

/// 16-bit truncated sum of UTF-16 code units the VM uses to index its
/// constant-name tables
pub fn const_utf8_crc(text: &str) -> u16 {
    text.encode_utf16()
        .fold(0u16, |crc, unit| crc.wrapping_add(unit))
}

/// Append a const-UTF-8 string: [length:u16][crc:u16][bytes][NUL]
pub fn put_const_utf8(buf: &mut Vec<u8>, text: &str) {
    buf.put_u16_le(text.len() as u16);
    buf.put_u16_le(const_utf8_crc(text));
    buf.put_slice(text.as_bytes());
    buf.put_u8(0);
}
