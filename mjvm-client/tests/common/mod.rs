// Scripted MJVM debug server for integration tests
//
// Accepts one connection and answers commands from a shared VmState the
// test can seed and inspect. Commands carry no length prefix, so each one
// is delimited by parsing its known payload layout.

#![allow(dead_code)]

#[path = "../../src/testing.rs"]
pub mod testing;

use mjvm_client::commands::status_bits::{RESET, STOP, STOP_SET};
use mjvm_client::protocol::{encode_response, put_const_utf8};
use mjvm_client::{Command, ResponseCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct VmState {
    pub status: u8,
    /// Every command received, with its payload
    pub commands: Vec<(Command, Vec<u8>)>,
    /// Raw [pc][class][method][descriptor] payloads currently installed
    pub breakpoints: Vec<Vec<u8>>,
    /// ReadStackTrace payloads by frame index
    pub frames: Vec<Vec<u8>>,
    /// ReadLocal payloads keyed by (frame, slot)
    pub locals: HashMap<(u32, u32), Vec<u8>>,
    /// ReadField payloads keyed by (object, field name)
    pub fields: HashMap<(u32, String), Vec<u8>>,
    /// Array contents keyed by handle: (element width, raw little-endian bytes)
    pub arrays: HashMap<u32, (u32, Vec<u8>)>,
    /// ReadSizeAndType payloads keyed by handle
    pub sizes: HashMap<u32, Vec<u8>>,
    pub exception: Option<Vec<u8>>,
    pub install_name: Option<String>,
    pub installed: Vec<u8>,
    pub install_complete: bool,
    /// Commands that never get an answer
    pub silent: Vec<Command>,
    /// Write every response in two pieces
    pub split_responses: bool,
    /// Hold back the reply to the next such command for this long
    pub slow_once: Option<(Command, Duration)>,
}

impl VmState {
    pub fn stopped() -> Self {
        Self {
            status: STOP,
            ..Default::default()
        }
    }

    /// Commands received so far, status polls excluded
    pub fn command_log(&self) -> Vec<Command> {
        self.commands
            .iter()
            .map(|(command, _)| *command)
            .filter(|command| *command != Command::ReadStatus)
            .collect()
    }

    pub fn payloads(&self, command: Command) -> Vec<Vec<u8>> {
        self.commands
            .iter()
            .filter(|(c, _)| *c == command)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn handle(&mut self, command: Command, payload: &[u8]) -> Option<(ResponseCode, Vec<u8>)> {
        self.commands.push((command, payload.to_vec()));
        if self.silent.contains(&command) {
            return None;
        }

        let ok = |data: Vec<u8>| Some((ResponseCode::Ok, data));
        let fail = || Some((ResponseCode::Fail, Vec::new()));

        match command {
            Command::ReadStatus => {
                let status = self.status;
                self.status &= !STOP_SET;
                ok(vec![status])
            }
            Command::AddBreakpoint => {
                if !self.breakpoints.iter().any(|bp| bp == payload) {
                    self.breakpoints.push(payload.to_vec());
                }
                ok(Vec::new())
            }
            Command::RemoveBreakpoint => match self.breakpoints.iter().position(|bp| bp == payload) {
                Some(index) => {
                    self.breakpoints.remove(index);
                    ok(Vec::new())
                }
                None => fail(),
            },
            Command::RemoveAllBreakpoints => {
                self.breakpoints.clear();
                ok(Vec::new())
            }
            Command::Run => {
                // Any installed breakpoint is hit straight away
                self.status = if self.breakpoints.is_empty() { 0 } else { STOP | STOP_SET };
                ok(Vec::new())
            }
            Command::Stop => {
                self.status = STOP | STOP_SET;
                ok(Vec::new())
            }
            Command::StepIn | Command::StepOver | Command::StepOut => {
                if self.status & STOP == 0 {
                    return Some((ResponseCode::Busy, Vec::new()));
                }
                if command != Command::StepOut && u32_at(payload, 0) == 0 {
                    return Some((ResponseCode::Busy, Vec::new()));
                }
                self.status = STOP | STOP_SET;
                ok(Vec::new())
            }
            Command::Restart => {
                self.status = 0;
                ok(Vec::new())
            }
            Command::Terminate => {
                self.status = RESET;
                ok(Vec::new())
            }
            Command::SetExceptionMode => ok(Vec::new()),
            Command::ReadExceptionInfo => match &self.exception {
                Some(data) => ok(data.clone()),
                None => fail(),
            },
            Command::ReadStackTrace => {
                let index = u32_at(payload, 0) as usize;
                match self.frames.get(index) {
                    Some(frame) => ok(frame.clone()),
                    None => fail(),
                }
            }
            Command::ReadLocal => {
                let frame = u32_at(payload, 1);
                let slot = u32_at(payload, 5);
                match self.locals.get(&(frame, slot)) {
                    Some(data) => ok(data.clone()),
                    None => fail(),
                }
            }
            Command::ReadField => {
                let object = u32_at(payload, 0);
                let name = const_utf8_at(payload, 4);
                match self.fields.get(&(object, name)) {
                    Some(data) => ok(data.clone()),
                    None => fail(),
                }
            }
            Command::ReadArray => {
                let length = u32::from_le_bytes([payload[0], payload[1], payload[2], 0]) as usize;
                let index = u32_at(payload, 3) as usize;
                let handle = u32_at(payload, 7);
                match self.arrays.get(&handle) {
                    Some((width, bytes)) => {
                        let width = *width as usize;
                        let count = bytes.len() / width;
                        let end = count.min(index + length);
                        let start = index.min(end);
                        ok(bytes[start * width..end * width].to_vec())
                    }
                    None => fail(),
                }
            }
            Command::ReadSizeAndType => match self.sizes.get(&u32_at(payload, 0)) {
                Some(data) => ok(data.clone()),
                None => fail(),
            },
            Command::InstallFile => {
                if self.status & RESET == 0 {
                    return fail();
                }
                self.install_name = Some(const_utf8_at(payload, 0));
                self.installed.clear();
                self.install_complete = false;
                ok(Vec::new())
            }
            Command::WriteFileData => {
                self.installed.extend_from_slice(payload);
                ok(Vec::new())
            }
            Command::CompleteInstall => {
                self.install_complete = true;
                ok(Vec::new())
            }
            Command::WriteLocal | Command::WriteField => fail(),
        }
    }
}

pub struct MockVm {
    pub port: u16,
    pub state: Arc<Mutex<VmState>>,
    hang_up: Arc<Notify>,
}

impl MockVm {
    pub async fn start(state: VmState) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(state));
        let hang_up = Arc::new(Notify::new());

        let server_state = state.clone();
        let server_hang_up = hang_up.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf: Vec<u8> = Vec::new();
            let mut chunk = [0u8; 4096];

            loop {
                let read = tokio::select! {
                    read = socket.read(&mut chunk) => read,
                    _ = server_hang_up.notified() => return,
                };
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);

                while let Some(len) = command_length(&buf) {
                    let frame: Vec<u8> = buf.drain(..len).collect();
                    let Some(command) = Command::from_u8(frame[0]) else {
                        return;
                    };
                    let (reply, split, delay) = {
                        let mut state = server_state.lock().unwrap();
                        let delay = match state.slow_once {
                            Some((slow, delay)) if slow == command => {
                                state.slow_once = None;
                                Some(delay)
                            }
                            _ => None,
                        };
                        (state.handle(command, &frame[1..]), state.split_responses, delay)
                    };
                    let Some((code, data)) = reply else { continue };
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }

                    let response = encode_response(command, code, &data);
                    if split {
                        let (head, tail) = response.split_at(3);
                        socket.write_all(head).await.unwrap();
                        socket.flush().await.unwrap();
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        socket.write_all(tail).await.unwrap();
                    } else {
                        socket.write_all(&response).await.unwrap();
                    }
                }
            }
        });

        Self { port, state, hang_up }
    }

    /// Drop the client connection
    pub fn hang_up(&self) {
        self.hang_up.notify_one();
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut VmState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

/// Total length of the first complete command in `buf`, if there is one
fn command_length(buf: &[u8]) -> Option<usize> {
    let command = Command::from_u8(*buf.first()?)?;
    let payload = match command {
        Command::ReadStatus
        | Command::RemoveAllBreakpoints
        | Command::Run
        | Command::Stop
        | Command::StepOut
        | Command::ReadExceptionInfo
        | Command::CompleteInstall => Some(0),
        Command::Terminate | Command::SetExceptionMode => Some(1),
        Command::ReadStackTrace | Command::ReadSizeAndType | Command::StepIn | Command::StepOver => Some(4),
        Command::ReadLocal => Some(9),
        Command::ReadArray => Some(11),
        Command::AddBreakpoint | Command::RemoveBreakpoint => const_utf8_run(&buf[1..], 4, 3),
        Command::Restart | Command::InstallFile => const_utf8_run(&buf[1..], 0, 1),
        Command::ReadField => const_utf8_run(&buf[1..], 4, 1),
        // File data is the rest of the write
        Command::WriteFileData | Command::WriteLocal | Command::WriteField => Some(buf.len() - 1),
    }?;
    (buf.len() > payload).then_some(payload + 1)
}

/// Length of `prefix` fixed bytes followed by `count` const-UTF-8 strings
fn const_utf8_run(payload: &[u8], prefix: usize, count: usize) -> Option<usize> {
    let mut offset = prefix;
    for _ in 0..count {
        let len = u16::from_le_bytes([*payload.get(offset)?, *payload.get(offset + 1)?]) as usize;
        offset += 4 + len + 1;
    }
    (payload.len() >= offset).then_some(offset)
}

fn u32_at(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

fn const_utf8_at(payload: &[u8], offset: usize) -> String {
    let len = u16::from_le_bytes([payload[offset], payload[offset + 1]]) as usize;
    String::from_utf8(payload[offset + 4..offset + 4 + len].to_vec()).unwrap()
}

// Response payload builders

/// Route client logs through the test harness; RUST_LOG selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn frame_payload(index: u32, outermost: bool, pc: u32, class: &str, method: &str, descriptor: &str) -> Vec<u8> {
    let mut data = Vec::new();
    let tagged = if outermost { index | 0x8000_0000 } else { index };
    data.extend_from_slice(&tagged.to_le_bytes());
    data.extend_from_slice(&pc.to_le_bytes());
    put_const_utf8(&mut data, class);
    put_const_utf8(&mut data, method);
    put_const_utf8(&mut data, descriptor);
    data
}

pub fn location_payload(pc: u32, class: &str, method: &str, descriptor: &str) -> Vec<u8> {
    let mut data = pc.to_le_bytes().to_vec();
    put_const_utf8(&mut data, class);
    put_const_utf8(&mut data, method);
    put_const_utf8(&mut data, descriptor);
    data
}

pub fn int_payload(value: i32) -> Vec<u8> {
    let mut data = 4u32.to_le_bytes().to_vec();
    data.extend_from_slice(&value.to_le_bytes());
    data
}

pub fn object_payload(size: u32, handle: u32, type_name: &str) -> Vec<u8> {
    let mut data = size.to_le_bytes().to_vec();
    data.extend_from_slice(&handle.to_le_bytes());
    put_const_utf8(&mut data, type_name);
    data
}

pub fn size_and_type_payload(size: u32, type_name: &str) -> Vec<u8> {
    let mut data = size.to_le_bytes().to_vec();
    put_const_utf8(&mut data, type_name);
    data
}

/// Wait for `cond` to hold, polling the state
pub async fn wait_for(vm: &MockVm, cond: impl Fn(&VmState) -> bool) {
    for _ in 0..200 {
        if vm.with_state(|state| cond(state)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
