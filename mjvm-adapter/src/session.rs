// Debug session management
//
// Holds the single active VM session and forwards its events to the host

use crate::protocol::{Event, OutgoingMessage};
use mjvm_client::{DebugEvent, DebugResult, DebugSession, SessionConfig};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The VM runs one program; hosts expect a thread id anyway
pub const THREAD_ID: u64 = 1;

struct ActiveSession {
    session: Arc<DebugSession>,
    forwarder: JoinHandle<()>,
}

pub struct SessionManager {
    current: Mutex<Option<ActiveSession>>,
    outgoing: mpsc::Sender<OutgoingMessage>,
}

impl SessionManager {
    pub fn new(outgoing: mpsc::Sender<OutgoingMessage>) -> Self {
        Self {
            current: Mutex::new(None),
            outgoing,
        }
    }

    pub fn outgoing(&self) -> &mpsc::Sender<OutgoingMessage> {
        &self.outgoing
    }

    /// Connect and make the new session current, closing any previous one
    pub async fn create_session(&self, config: SessionConfig) -> DebugResult<Arc<DebugSession>> {
        let session = Arc::new(DebugSession::connect(config).await?);
        let forwarder = tokio::spawn(forward_events(session.clone(), self.outgoing.clone()));

        let previous = self.current.lock().await.replace(ActiveSession {
            session: session.clone(),
            forwarder,
        });
        if let Some(previous) = previous {
            info!("Replacing existing session");
            close(previous).await;
        }
        Ok(session)
    }

    pub async fn get_current_session(&self) -> Option<Arc<DebugSession>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Disconnect and forget the current session; false if there was none
    pub async fn remove_session(&self) -> bool {
        let active = self.current.lock().await.take();
        match active {
            Some(active) => {
                close(active).await;
                true
            }
            None => false,
        }
    }
}

async fn close(active: ActiveSession) {
    active.forwarder.abort();
    active.session.disconnect().await;
}

pub fn to_event(event: &DebugEvent) -> Event {
    match event {
        DebugEvent::Stopped { reason } => Event::new(
            "stopped",
            Some(json!({
                "reason": reason.as_str(),
                "threadId": THREAD_ID,
                "allThreadsStopped": true,
            })),
        ),
        DebugEvent::Reset => Event::new("vmReset", None),
        DebugEvent::Terminated => Event::new("terminated", None),
    }
}

async fn forward_events(session: Arc<DebugSession>, outgoing: mpsc::Sender<OutgoingMessage>) {
    while let Some(event) = session.recv_event().await {
        debug!("Forwarding {:?}", event);
        if outgoing.send(to_event(&event).into()).await.is_err() {
            break;
        }
    }
    debug!("Event forwarding stopped");
}
