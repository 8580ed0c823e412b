// Adapter capabilities
//
// Reported in the initialize response so the host knows which requests
// this adapter answers.

use serde_json::{json, Value};

/// Requests the adapter understands, with a one-line summary each
pub const COMMANDS: &[(&str, &str)] = &[
    ("initialize", "Report adapter capabilities"),
    ("attach", "Connect to a running VM debug server"),
    ("launch", "Connect and restart the program at mainClass"),
    ("setBreakpoints", "Replace the breakpoints of one source file"),
    ("setExceptionBreakpoints", "Stop when an exception is thrown"),
    ("threads", "List threads (the VM reports a single one)"),
    ("continue", "Resume execution"),
    ("pause", "Stop at the next instruction boundary"),
    ("next", "Step over the current line"),
    ("stepIn", "Step into calls on the current line"),
    ("stepOut", "Run until the current method returns"),
    ("stackTrace", "Frames of the current stop"),
    ("scopes", "Variable scopes of a frame"),
    ("variables", "Locals of a frame or children of an object or array"),
    ("exceptionInfo", "Type and message of the pending exception"),
    ("restart", "Restart the program"),
    ("terminate", "Terminate the program"),
    ("disconnect", "Close the debug session"),
    ("install", "Copy a file onto the VM while it is reset"),
];

pub fn get_capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": false,
        "supportsExceptionInfoRequest": true,
        "supportsRestartRequest": true,
        "supportsTerminateRequest": true,
        "supportsSetVariable": false,
        "supportsEvaluateForHovers": false,
        "exceptionBreakpointFilters": [
            {
                "filter": "all",
                "label": "All exceptions",
                "default": false
            }
        ],
        "commands": COMMANDS
            .iter()
            .map(|(name, description)| json!({"name": name, "description": description}))
            .collect::<Vec<_>>(),
    })
}
