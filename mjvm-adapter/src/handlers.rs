// Adapter request handlers
//
// Maps each host request onto a session operation and renders the
// library's plain data as JSON bodies

use crate::capabilities;
use crate::protocol::{Event, Request, Response};
use crate::session::{SessionManager, THREAD_ID};
use mjvm_client::types::simple_type_name;
use mjvm_client::{DebugSession, SessionConfig, StackFrame, Value, ValueInfo};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Variable references at or above this name a frame's locals scope;
/// below it they are inspector handles
pub const LOCALS_BASE: u64 = 0x4000_0000;

pub struct RequestHandler {
    session_manager: SessionManager,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceArgument {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SourceBreakpoint {
    line: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetBreakpointsArguments {
    source: SourceArgument,
    #[serde(default)]
    breakpoints: Vec<SourceBreakpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariablesArguments {
    variables_reference: u64,
    #[serde(default)]
    start: u32,
    count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallArguments {
    path: PathBuf,
    name: Option<String>,
}

impl RequestHandler {
    pub fn new(session_manager: SessionManager) -> Self {
        Self { session_manager }
    }

    pub async fn handle_request(&self, request: Request) -> Response {
        debug!("Handling {} (seq {})", request.command, request.seq);
        let args = request.arguments.clone();

        let result = match request.command.as_str() {
            "initialize" => Ok(capabilities::get_capabilities()),
            "attach" => self.handle_attach(args, false).await,
            "launch" => self.handle_attach(args, true).await,
            "setBreakpoints" => self.handle_set_breakpoints(args).await,
            "setExceptionBreakpoints" => self.handle_set_exception_breakpoints(args).await,
            "threads" => Ok(json!({"threads": [{"id": THREAD_ID, "name": "main"}]})),
            "continue" => self.handle_continue().await,
            "pause" => self.handle_pause().await,
            "next" => self.handle_next().await,
            "stepIn" => self.handle_step_in().await,
            "stepOut" => self.handle_step_out().await,
            "stackTrace" => self.handle_stack_trace().await,
            "scopes" => self.handle_scopes(args),
            "variables" => self.handle_variables(args).await,
            "exceptionInfo" => self.handle_exception_info().await,
            "restart" => self.handle_restart(args).await,
            "terminate" => self.handle_terminate().await,
            "disconnect" => self.handle_disconnect(args).await,
            "install" => self.handle_install(args).await,
            _ => Err(format!("Unknown command: {}", request.command)),
        };

        match result {
            Ok(body) => Response::success(&request, body),
            Err(message) => {
                warn!("{} failed: {}", request.command, message);
                Response::failure(request.seq, &request.command, message)
            }
        }
    }

    /// Close the current session, if any
    pub async fn shutdown(&self) {
        if self.session_manager.remove_session().await {
            info!("Closed active session");
        }
    }

    async fn session(&self) -> Result<Arc<DebugSession>, String> {
        self.session_manager
            .get_current_session()
            .await
            .ok_or_else(|| "No active debug session. Use attach first.".to_string())
    }

    async fn handle_attach(&self, args: JsonValue, launch: bool) -> Result<JsonValue, String> {
        let main_class = args
            .get("mainClass")
            .and_then(|v| v.as_str())
            .map(|s| s.replace('.', "/"));

        let config: SessionConfig = if args.is_null() {
            SessionConfig::default()
        } else {
            serde_json::from_value(args).map_err(|e| format!("Invalid session arguments: {}", e))?
        };
        let config = config.with_env_fallbacks();
        let (host, port) = (config.host.clone(), config.port);

        let session = self
            .session_manager
            .create_session(config)
            .await
            .map_err(|e| format!("Failed to connect to {}:{}: {}", host, port, e))?;
        info!("Attached to MJVM at {}:{}", host, port);

        if launch {
            if let Some(main_class) = main_class {
                session
                    .restart(&main_class)
                    .await
                    .map_err(|e| format!("Failed to start {}: {}", main_class, e))?;
            }
        }

        self.session_manager
            .outgoing()
            .send(Event::new("initialized", None).into())
            .await
            .ok();
        Ok(JsonValue::Null)
    }

    async fn handle_set_breakpoints(&self, args: JsonValue) -> Result<JsonValue, String> {
        let args: SetBreakpointsArguments =
            serde_json::from_value(args).map_err(|e| format!("Invalid setBreakpoints arguments: {}", e))?;
        let session = self.session().await?;

        let lines: Vec<u32> = args.breakpoints.iter().map(|bp| bp.line).collect();
        let breakpoints = session
            .set_breakpoints(&args.source.path, &lines)
            .await
            .map_err(|e| format!("Failed to set breakpoints in {}: {}", args.source.path.display(), e))?;

        let body: Vec<JsonValue> = breakpoints
            .iter()
            .map(|bp| {
                json!({
                    "verified": true,
                    "line": bp.line(),
                    "source": {"path": bp.location.source_path},
                })
            })
            .collect();
        Ok(json!({"breakpoints": body}))
    }

    async fn handle_set_exception_breakpoints(&self, args: JsonValue) -> Result<JsonValue, String> {
        let enabled = args
            .get("filters")
            .and_then(|v| v.as_array())
            .is_some_and(|filters| !filters.is_empty());
        let session = self.session().await?;

        session
            .set_exception_breakpoints(enabled)
            .await
            .map_err(|e| format!("Failed to set exception mode: {}", e))?;
        Ok(JsonValue::Null)
    }

    async fn handle_continue(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        session.run().await.map_err(|e| format!("Failed to resume: {}", e))?;
        Ok(json!({"allThreadsContinued": true}))
    }

    async fn handle_pause(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        session.stop().await.map_err(|e| format!("Failed to pause: {}", e))?;
        Ok(JsonValue::Null)
    }

    async fn handle_next(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        session.step_over().await.map_err(|e| format!("Failed to step over: {}", e))?;
        Ok(JsonValue::Null)
    }

    async fn handle_step_in(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        session.step_in().await.map_err(|e| format!("Failed to step in: {}", e))?;
        Ok(JsonValue::Null)
    }

    async fn handle_step_out(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        session.step_out().await.map_err(|e| format!("Failed to step out: {}", e))?;
        Ok(JsonValue::Null)
    }

    async fn handle_stack_trace(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        let frames = session
            .stack_trace()
            .await
            .map_err(|e| format!("Failed to read stack: {}", e))?;

        let body: Vec<JsonValue> = frames.iter().map(frame_json).collect();
        Ok(json!({"stackFrames": body, "totalFrames": frames.len()}))
    }

    fn handle_scopes(&self, args: JsonValue) -> Result<JsonValue, String> {
        let frame_id = args
            .get("frameId")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| "Missing 'frameId' parameter".to_string())?;

        Ok(json!({
            "scopes": [{
                "name": "Locals",
                "variablesReference": LOCALS_BASE + frame_id,
                "expensive": false,
            }]
        }))
    }

    async fn handle_variables(&self, args: JsonValue) -> Result<JsonValue, String> {
        let args: VariablesArguments =
            serde_json::from_value(args).map_err(|e| format!("Invalid variables arguments: {}", e))?;
        let session = self.session().await?;

        let values = if args.variables_reference >= LOCALS_BASE {
            let frame_id = (args.variables_reference - LOCALS_BASE) as u32;
            session.locals(frame_id).await
        } else {
            session
                .variables(args.variables_reference as u32, args.start, args.count)
                .await
        }
        .map_err(|e| format!("Failed to read variables: {}", e))?;

        let body: Vec<JsonValue> = values.iter().map(variable_json).collect();
        Ok(json!({"variables": body}))
    }

    async fn handle_exception_info(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        let info = session
            .exception_info()
            .await
            .map_err(|e| format!("Failed to read exception: {}", e))?;

        Ok(json!({
            "exceptionId": info.type_name.replace('/', "."),
            "description": info.message,
            "breakMode": "always",
        }))
    }

    async fn handle_restart(&self, args: JsonValue) -> Result<JsonValue, String> {
        let main_class = args
            .get("mainClass")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing 'mainClass' parameter".to_string())?
            .replace('.', "/");
        let session = self.session().await?;

        session
            .restart(&main_class)
            .await
            .map_err(|e| format!("Failed to restart: {}", e))?;
        Ok(JsonValue::Null)
    }

    async fn handle_terminate(&self) -> Result<JsonValue, String> {
        let session = self.session().await?;
        session
            .terminate(false)
            .await
            .map_err(|e| format!("Failed to terminate: {}", e))?;
        Ok(JsonValue::Null)
    }

    async fn handle_disconnect(&self, args: JsonValue) -> Result<JsonValue, String> {
        let terminate = args
            .get("terminateDebuggee")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if terminate {
            if let Some(session) = self.session_manager.get_current_session().await {
                if let Err(e) = session.terminate(true).await {
                    warn!("Terminate before disconnect failed: {}", e);
                }
            }
        }

        if self.session_manager.remove_session().await {
            Ok(JsonValue::Null)
        } else {
            Err("No active debug session to disconnect".to_string())
        }
    }

    async fn handle_install(&self, args: JsonValue) -> Result<JsonValue, String> {
        let args: InstallArguments =
            serde_json::from_value(args).map_err(|e| format!("Invalid install arguments: {}", e))?;
        let name = match args.name {
            Some(name) => name,
            None => args
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| format!("Cannot derive a file name from {}", args.path.display()))?
                .to_string(),
        };
        let contents = tokio::fs::read(&args.path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", args.path.display(), e))?;
        let session = self.session().await?;

        let outgoing = self.session_manager.outgoing().clone();
        let progress_name = name.clone();
        session
            .install_file(&name, &contents, |sent, total| {
                let event = Event::new(
                    "installProgress",
                    Some(json!({"file": progress_name, "sent": sent, "total": total})),
                );
                // Progress is advisory; drop it when the writer is behind
                outgoing.try_send(event.into()).ok();
            })
            .await
            .map_err(|e| format!("Failed to install {}: {}", name, e))?;

        Ok(json!({"file": name, "bytes": contents.len()}))
    }
}

fn frame_json(frame: &StackFrame) -> JsonValue {
    let source_name = frame
        .source_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    json!({
        "id": frame.frame_id,
        "name": frame.display_name(),
        "line": frame.line(),
        "column": 0,
        "source": {
            "name": source_name,
            "path": frame.source_path(),
        },
    })
}

fn variable_json(info: &ValueInfo) -> JsonValue {
    let mut variable = json!({
        "name": info.name,
        "value": info.value.display(),
        "type": simple_type_name(&info.descriptor),
        "variablesReference": info.reference,
    });
    if let Value::ObjectRef { .. } = info.value {
        if let Some(length) = info.value.array_length() {
            variable["indexedVariables"] = json!(length);
        }
    }
    variable
}
