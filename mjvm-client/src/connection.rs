// MJVM connection management
//
// Handles the TCP connection and serializes every command round trip
// through a single permit, so at most one request is ever in flight.

use crate::protocol::*;
use crate::transport::{spawn_transport, TransportHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct MjvmConnection {
    transport: TransportHandle,
    permit: Arc<Semaphore>,
    timeout: Duration,
}

impl MjvmConnection {
    /// Connect to a VM debug server
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> DebugResult<Self> {
        info!("Connecting to MJVM at {}:{}", host, port);

        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        info!("Connected to MJVM at {}:{}", host, port);
        Ok(Self::from_parts(reader, writer, timeout))
    }

    /// Build a connection over any split byte stream
    pub fn from_parts<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            transport: spawn_transport(reader, writer),
            permit: Arc::new(Semaphore::new(1)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Close the socket for every clone of this connection
    pub fn close(&self) {
        self.transport.close();
    }

    /// Send a command and wait for its response.
    ///
    /// Waits for the permit first; the timeout covers only the round trip.
    /// The permit is released on every exit path, including timeout.
    pub async fn send_command(&self, packet: CommandPacket) -> DebugResult<ResponsePacket> {
        let command = packet.command;
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| DebugError::ConnectionClosed)?;

        debug!("Sending command {}", command);
        match tokio::time::timeout(self.timeout, self.transport.send(packet)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Command {} timed out after {:?}", command, self.timeout);
                Err(DebugError::CommandTimeout(command))
            }
        }
    }
}
