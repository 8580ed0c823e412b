// MJVM debug adapter - line-delimited JSON front end for the MJVM debugger
//
// Reads one request per line on stdin, writes responses and events on stdout

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

mod capabilities;
mod handlers;
mod protocol;
mod session;

use handlers::RequestHandler;
use protocol::*;
use session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout is reserved for the adapter protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjvm_adapter=info".parse()?)
                .add_directive("mjvm_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting MJVM debug adapter...");

    // Responses and session events share stdout through one writer task
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<OutgoingMessage>(64);
    let writer = tokio::spawn(write_messages(tokio::io::stdout(), outgoing_rx));

    let handler = RequestHandler::new(SessionManager::new(outgoing_tx.clone()));
    let mut reader = BufReader::new(tokio::io::stdin());

    info!("MJVM debug adapter ready, waiting for requests...");

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("Host disconnected");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                debug!("Received: {}", line);

                let response = match serde_json::from_str::<Value>(line) {
                    Ok(value) => match serde_json::from_value::<Request>(value.clone()) {
                        Ok(request) => handler.handle_request(request).await,
                        Err(e) => {
                            error!("Invalid request: {}", e);
                            let seq = value.get("seq").and_then(|v| v.as_u64()).unwrap_or(0);
                            let command = value.get("command").and_then(|v| v.as_str()).unwrap_or("");
                            Response::failure(seq, command, format!("Invalid request: {}", e))
                        }
                    },
                    Err(e) => {
                        error!("Parse error: {}", e);
                        Response::failure(0, "", "Parse error")
                    }
                };

                if outgoing_tx.send(response.into()).await.is_err() {
                    error!("Output writer stopped");
                    break;
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    // Close any live session so the VM sees the socket go away
    handler.shutdown().await;
    drop(handler);
    drop(outgoing_tx);
    writer.await??;

    info!("MJVM debug adapter shutting down");
    Ok(())
}

async fn write_messages<W>(mut out: W, mut rx: mpsc::Receiver<OutgoingMessage>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let text = serde_json::to_string(&message)?;
        debug!("Sending: {}", text);
        out.write_all(text.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
    }
    Ok(())
}
