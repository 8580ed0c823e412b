// Adapter wire messages
//
// One JSON object per line in each direction. Requests carry a sequence
// number that the matching response echoes; events are unsolicited.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub seq: u64,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_seq: u64,
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    pub fn success(request: &Request, body: Value) -> Self {
        Self {
            kind: "response",
            request_seq: request.seq,
            command: request.command.clone(),
            success: true,
            message: None,
            body: (!body.is_null()).then_some(body),
        }
    }

    pub fn failure(request_seq: u64, command: &str, message: impl Into<String>) -> Self {
        Self {
            kind: "response",
            request_seq,
            command: command.to_string(),
            success: false,
            message: Some(message.into()),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    pub fn new(event: &str, body: Option<Value>) -> Self {
        Self {
            kind: "event",
            event: event.to_string(),
            body,
        }
    }
}

/// Anything written to stdout
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    Response(Response),
    Event(Event),
}

impl From<Response> for OutgoingMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Event> for OutgoingMessage {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}
