// File install command implementations
//
// Declare the file, stream fixed-size chunks (each acknowledged before the
// next is sent), then complete. Only valid while the VM is reset.

use crate::commands::Command;
use crate::connection::MjvmConnection;
use crate::protocol::{put_const_utf8, CommandPacket, DebugError, DebugResult};
use tracing::{debug, info};

pub const DEFAULT_CHUNK_SIZE: usize = 512;

impl MjvmConnection {
    /// Install `contents` on the VM as `file_name`.
    ///
    /// `progress` receives (bytes acknowledged, total) after every chunk.
    /// Any failure aborts the transfer; the VM keeps whatever it received.
    pub async fn install_file<F>(
        &self,
        file_name: &str,
        contents: &[u8],
        chunk_size: usize,
        mut progress: F,
    ) -> DebugResult<()>
    where
        F: FnMut(usize, usize),
    {
        if chunk_size == 0 {
            return Err(DebugError::InvalidState("Install chunk size must be positive".to_string()));
        }
        info!("Installing {} ({} bytes)", file_name, contents.len());

        let mut packet = CommandPacket::new(Command::InstallFile);
        put_const_utf8(&mut packet.data, file_name);
        self.send_command(packet).await?.check_error()?;

        let total = contents.len();
        let mut sent = 0;
        for chunk in contents.chunks(chunk_size) {
            let mut packet = CommandPacket::new(Command::WriteFileData);
            packet.data.extend_from_slice(chunk);
            self.send_command(packet).await?.check_error()?;

            sent += chunk.len();
            debug!("Install {}: {}/{} bytes", file_name, sent, total);
            progress(sent, total);
        }

        self.send_command(CommandPacket::new(Command::CompleteInstall))
            .await?
            .check_error()?;

        info!("Installed {}", file_name);
        Ok(())
    }
}
