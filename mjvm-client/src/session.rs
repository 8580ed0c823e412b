// Debug session
//
// Ties a connection to the symbol table and keeps the client-side view of
// the VM: last observed status, active breakpoints per source file, the
// stack of the current stop and the heap references handed out for it.
// A background poller turns status changes into events.

use crate::breakpoint::Breakpoint;
use crate::classfile::LocalVariableEntry;
use crate::commands::VmStatus;
use crate::config::SessionConfig;
use crate::connection::MjvmConnection;
use crate::events::{DebugEvent, StopReason};
use crate::inspect::{expand, present_value, Inspector};
use crate::lineinfo::{line_for_pc, pc_for_line, LineInfo};
use crate::protocol::{DebugError, DebugResult};
use crate::symbols::SymbolTable;
use crate::types::{method_display_name, ValueInfo};
use crate::vm::ExceptionInfo;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Upper bound on frames read for one stack trace
pub const MAX_STACK_DEPTH: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Running,
    Stopped,
}

/// A resolved stack frame
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Depth from the innermost frame; also the VM's frame index
    pub frame_id: u32,
    pub location: LineInfo,
    pub is_outermost: bool,
    /// Locals in scope at the frame's pc
    pub locals: Vec<LocalVariableEntry>,
}

impl StackFrame {
    /// `Main.compute(int, String[])`
    pub fn display_name(&self) -> String {
        method_display_name(
            self.location.class_name(),
            &self.location.method_name,
            &self.location.descriptor,
        )
    }

    pub fn line(&self) -> u32 {
        self.location.line
    }

    pub fn source_path(&self) -> &Path {
        &self.location.source_path
    }
}

struct SessionInner {
    state: SessionState,
    status: VmStatus,
    /// Bumped by every command that changes the run state; a poll result
    /// read across a bump is stale
    revision: u64,
    requested_stop: Option<StopReason>,
    symbols: SymbolTable,
    breakpoints: HashMap<PathBuf, Vec<Breakpoint>>,
    stack_frames: Option<Vec<StackFrame>>,
    inspector: Inspector,
}

impl SessionInner {
    fn invalidate(&mut self) {
        self.stack_frames = None;
        self.inspector.clear();
    }

    fn resumed(&mut self, requested_stop: Option<StopReason>) {
        self.status = self.status.running();
        self.state = SessionState::Running;
        self.requested_stop = requested_stop;
        self.revision += 1;
        self.invalidate();
    }

    /// A Stop command went out; the VM reports the stop on a later poll
    fn stop_requested(&mut self) {
        self.requested_stop = Some(StopReason::Pause);
        self.revision += 1;
        self.invalidate();
    }

    fn ensure_stopped(&self) -> DebugResult<()> {
        match self.state {
            SessionState::Disconnected => Err(DebugError::ConnectionClosed),
            _ if self.status.is_stopped() => Ok(()),
            _ => Err(DebugError::InvalidState("VM is not stopped".to_string())),
        }
    }

    /// Fold a polled status into the session; returns the event it implies
    fn observe_status(&mut self, status: VmStatus) -> Option<DebugEvent> {
        let previous = self.status;
        self.status = status;

        if self.state == SessionState::Disconnected {
            return None;
        }

        if status.is_reset() && !previous.is_reset() {
            info!("VM reset");
            self.invalidate();
            self.state = SessionState::Stopped;
            return Some(DebugEvent::Reset);
        }

        let entered_stop = status.is_stopped() && (status.stop_set() || !previous.is_stopped());
        if entered_stop {
            let reason = StopReason::classify(status, self.requested_stop.take());
            info!("VM stopped ({})", reason.as_str());
            self.invalidate();
            self.state = SessionState::Stopped;
            return Some(DebugEvent::Stopped { reason });
        }

        if !status.is_stopped() && previous.is_stopped() {
            debug!("VM running");
            self.invalidate();
            self.state = SessionState::Running;
        }
        None
    }
}

pub struct DebugSession {
    connection: MjvmConnection,
    config: SessionConfig,
    inner: Arc<Mutex<SessionInner>>,
    events: Mutex<mpsc::Receiver<DebugEvent>>,
    poller: JoinHandle<()>,
}

impl DebugSession {
    /// Connect to the VM named in `config` and start polling its status
    pub async fn connect(config: SessionConfig) -> DebugResult<Self> {
        let connection =
            MjvmConnection::connect(&config.host, config.port, config.command_timeout()).await?;
        Self::with_connection(connection, config).await
    }

    /// Start a session over an established connection
    pub async fn with_connection(connection: MjvmConnection, config: SessionConfig) -> DebugResult<Self> {
        let symbols = SymbolTable::new(config.class_paths(), config.max_hierarchy_depth);
        let mut inner = SessionInner {
            state: SessionState::Connecting,
            status: VmStatus::default(),
            revision: 0,
            requested_stop: None,
            symbols,
            breakpoints: HashMap::new(),
            stack_frames: None,
            inspector: Inspector::new(),
        };

        let status = connection.read_status().await?;
        inner.status = status;
        inner.state = if status.is_stopped() || status.is_reset() {
            SessionState::Stopped
        } else {
            SessionState::Running
        };
        info!("Session started, VM status {:#04x}", status.0);

        let inner = Arc::new(Mutex::new(inner));
        let (event_tx, event_rx) = mpsc::channel(64);
        let poller = tokio::spawn(poll_status(
            connection.clone(),
            inner.clone(),
            event_tx,
            config.poll_interval(),
        ));

        Ok(Self {
            connection,
            config,
            inner,
            events: Mutex::new(event_rx),
            poller,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection(&self) -> &MjvmConnection {
        &self.connection
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn status(&self) -> VmStatus {
        self.inner.lock().await.status
    }

    /// Next event from the poller; None once the session is over
    pub async fn recv_event(&self) -> Option<DebugEvent> {
        self.events.lock().await.recv().await
    }

    pub async fn try_recv_event(&self) -> Option<DebugEvent> {
        self.events.lock().await.try_recv().ok()
    }

    // Execution control

    /// Resume; a no-op when the VM is already running
    pub async fn run(&self) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.status.is_stopped() {
            debug!("Run ignored, VM already running");
            return Ok(());
        }
        self.connection.run().await?;
        inner.resumed(None);
        Ok(())
    }

    /// Ask the VM to stop; a no-op when it is already stopped. The stop
    /// itself is reported later as a `Stopped { reason: Pause }` event.
    pub async fn stop(&self) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.status.is_stopped() {
            debug!("Stop ignored, VM already stopped");
            return Ok(());
        }
        self.connection.stop().await?;
        inner.stop_requested();
        Ok(())
    }

    pub async fn step_in(&self) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        let run_length = self.current_run_length(&mut inner).await?;
        self.connection.step_in(run_length).await?;
        inner.resumed(Some(StopReason::Step));
        Ok(())
    }

    pub async fn step_over(&self) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        let run_length = self.current_run_length(&mut inner).await?;
        self.connection.step_over(run_length).await?;
        inner.resumed(Some(StopReason::Step));
        Ok(())
    }

    pub async fn step_out(&self) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_stopped()?;
        self.connection.step_out().await?;
        inner.resumed(Some(StopReason::Step));
        Ok(())
    }

    /// Restart the program at `main_class` (internal name)
    pub async fn restart(&self, main_class: &str) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        self.connection.restart(main_class).await?;
        inner.status = VmStatus::default();
        inner.resumed(None);
        Ok(())
    }

    pub async fn terminate(&self, end_debug: bool) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        self.connection.terminate(end_debug).await?;
        inner.resumed(None);
        inner.state = SessionState::Stopped;
        Ok(())
    }

    pub async fn set_exception_breakpoints(&self, enabled: bool) -> DebugResult<()> {
        let _inner = self.inner.lock().await;
        self.connection.set_exception_mode(enabled).await
    }

    pub async fn exception_info(&self) -> DebugResult<ExceptionInfo> {
        let inner = self.inner.lock().await;
        inner.ensure_stopped()?;
        self.connection.read_exception_info().await
    }

    // Breakpoints

    /// Make the breakpoints of `source` exactly `lines`.
    ///
    /// Every new line is resolved before anything is sent, so an
    /// unresolvable line leaves the VM untouched. Removals go out before
    /// additions. A failing command aborts the rest; the active set then
    /// reflects what the VM acknowledged. Returns the breakpoints for
    /// `lines`, in order.
    pub async fn set_breakpoints(&self, source: &Path, lines: &[u32]) -> DebugResult<Vec<Breakpoint>> {
        let mut inner = self.inner.lock().await;
        let active = inner.breakpoints.get(source).cloned().unwrap_or_default();

        let mut wanted: Vec<u32> = Vec::new();
        for &line in lines {
            if !wanted.contains(&line) {
                wanted.push(line);
            }
        }

        let mut additions = Vec::new();
        for &line in &wanted {
            if active.iter().any(|bp| bp.requested_line == line) {
                continue;
            }
            let location = pc_for_line(&mut inner.symbols, source, line)?;
            debug!("Line {} of {} resolves to line {}", line, source.display(), location.line);
            additions.push(Breakpoint {
                source: source.to_path_buf(),
                requested_line: line,
                location,
            });
        }

        let (mut current, removals): (Vec<Breakpoint>, Vec<Breakpoint>) = active
            .into_iter()
            .partition(|bp| wanted.contains(&bp.requested_line));

        let result = self.reconcile(&mut current, removals, additions).await;
        inner.breakpoints.insert(source.to_path_buf(), current.clone());
        result?;

        info!("{} breakpoint(s) active in {}", current.len(), source.display());
        Ok(wanted
            .iter()
            .filter_map(|line| current.iter().find(|bp| bp.requested_line == *line).cloned())
            .collect())
    }

    async fn reconcile(
        &self,
        current: &mut Vec<Breakpoint>,
        removals: Vec<Breakpoint>,
        additions: Vec<Breakpoint>,
    ) -> DebugResult<()> {
        for (index, bp) in removals.iter().enumerate() {
            // Two requested lines can snap to one location
            let shared = current
                .iter()
                .chain(additions.iter())
                .chain(removals[index + 1..].iter())
                .any(|other| other.location == bp.location);
            if !shared {
                self.connection.remove_breakpoint(&bp.location).await?;
            }
        }

        for bp in additions {
            if !current.iter().any(|other| other.location == bp.location) {
                self.connection.add_breakpoint(&bp.location).await?;
            }
            current.push(bp);
        }
        Ok(())
    }

    /// Active breakpoints of `source`
    pub async fn breakpoints(&self, source: &Path) -> Vec<Breakpoint> {
        let inner = self.inner.lock().await;
        inner.breakpoints.get(source).cloned().unwrap_or_default()
    }

    pub async fn remove_all_breakpoints(&self) -> DebugResult<()> {
        let mut inner = self.inner.lock().await;
        self.connection.remove_all_breakpoints().await?;
        inner.breakpoints.clear();
        Ok(())
    }

    // Inspection

    /// Frames of the current stop, innermost first. Cached until the VM resumes.
    pub async fn stack_trace(&self) -> DebugResult<Vec<StackFrame>> {
        let mut inner = self.inner.lock().await;
        self.load_stack(&mut inner).await
    }

    /// Locals of frame `frame_id`, strings rendered as text and objects registered
    pub async fn locals(&self, frame_id: u32) -> DebugResult<Vec<ValueInfo>> {
        let mut inner = self.inner.lock().await;
        let frames = self.load_stack(&mut inner).await?;
        let frame = frames
            .get(frame_id as usize)
            .ok_or_else(|| DebugError::InvalidState(format!("No frame {}", frame_id)))?;

        let mut values = Vec::with_capacity(frame.locals.len());
        for local in &frame.locals {
            let value = self
                .connection
                .read_local(frame_id, local.index as u32, &local.descriptor)
                .await?;
            let info = ValueInfo::new(local.name.clone(), local.descriptor.clone(), value);
            let info = present_value(&self.connection, info).await?;
            values.push(inner.inspector.register(info));
        }
        Ok(values)
    }

    /// Children of a reference handed out by `locals` or an earlier expansion
    pub async fn variables(&self, reference: u32, start: u32, count: Option<u32>) -> DebugResult<Vec<ValueInfo>> {
        let mut inner = self.inner.lock().await;
        inner.ensure_stopped()?;
        let SessionInner {
            symbols, inspector, ..
        } = &mut *inner;
        expand(&self.connection, symbols, inspector, reference, start, count).await
    }

    // Install

    /// Send a file to the VM; `progress` gets (bytes sent, total) per chunk
    pub async fn install_file<F>(&self, file_name: &str, contents: &[u8], progress: F) -> DebugResult<()>
    where
        F: FnMut(usize, usize),
    {
        let _inner = self.inner.lock().await;
        self.connection
            .install_file(file_name, contents, self.config.install_chunk_size, progress)
            .await
    }

    /// Stop polling and close the socket
    pub async fn disconnect(&self) {
        self.poller.abort();
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Disconnected;
        inner.invalidate();
        inner.breakpoints.clear();
        self.connection.close();
        info!("Session disconnected");
    }

    async fn load_stack(&self, inner: &mut SessionInner) -> DebugResult<Vec<StackFrame>> {
        if let Some(frames) = &inner.stack_frames {
            return Ok(frames.clone());
        }
        inner.ensure_stopped()?;

        let mut frames = Vec::new();
        for index in 0..MAX_STACK_DEPTH {
            let frame = self.resolve_frame(inner, index).await?;
            let outermost = frame.is_outermost;
            frames.push(frame);
            if outermost {
                break;
            }
        }
        if frames.last().is_some_and(|f| !f.is_outermost) {
            warn!("Stack trace truncated at {} frames", MAX_STACK_DEPTH);
        }

        debug!("Read {} stack frames", frames.len());
        inner.stack_frames = Some(frames.clone());
        Ok(frames)
    }

    async fn resolve_frame(&self, inner: &mut SessionInner, index: u32) -> DebugResult<StackFrame> {
        let raw = self.connection.read_stack_frame(index).await?;
        let location = line_for_pc(
            &mut inner.symbols,
            &raw.class_name,
            &raw.method_name,
            &raw.descriptor,
            raw.pc,
        )?;
        Ok(StackFrame {
            frame_id: index,
            locals: location.live_locals(),
            location,
            is_outermost: raw.is_outermost,
        })
    }

    /// Run length of the innermost frame's current line
    async fn current_run_length(&self, inner: &mut SessionInner) -> DebugResult<u32> {
        inner.ensure_stopped()?;
        if let Some(top) = inner.stack_frames.as_ref().and_then(|frames| frames.first()) {
            return Ok(top.location.run_length);
        }
        let top = self.resolve_frame(inner, 0).await?;
        Ok(top.location.run_length)
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

async fn poll_status(
    connection: MjvmConnection,
    inner: Arc<Mutex<SessionInner>>,
    event_tx: mpsc::Sender<DebugEvent>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let revision = inner.lock().await.revision;
        let status = match connection.read_status().await {
            Ok(status) => status,
            Err(DebugError::ConnectionClosed) | Err(DebugError::Io(_)) => break,
            Err(e) => {
                debug!("Status poll failed: {}", e);
                if connection.is_closed() {
                    break;
                }
                continue;
            }
        };

        let event = {
            let mut inner = inner.lock().await;
            if inner.revision != revision {
                debug!("Discarding status read across a state change");
                continue;
            }
            inner.observe_status(status)
        };

        if let Some(event) = event {
            if event_tx.send(event).await.is_err() {
                return;
            }
        }
    }

    info!("VM connection closed");
    inner.lock().await.state = SessionState::Disconnected;
    event_tx.send(DebugEvent::Terminated).await.ok();
}
