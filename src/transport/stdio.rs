use crate::collaborators::{ConsoleLogger, OutputStream};
use futures_lite::io::{AsyncRead, AsyncReadExt};
use std::io;
use std::sync::Arc;

const READ_CHUNK: usize = 16 * 1024;

/// Copies a server output pipe into the console logger until EOF.
///
/// Chunks are forwarded as read; line splitting is the logger's business.
/// Returns the number of bytes forwarded.
pub async fn pump_output<R>(mut reader: R, stream: OutputStream, logger: Arc<dyn ConsoleLogger>) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break, // EOF
            Ok(n) => {
                logger.write_output(stream, &buf[..n]);
                total += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(%stream, error = %e, "Failed to read server output");
                break;
            }
        }
    }

    tracing::debug!(%stream, bytes = total, "Server output closed");
    total
}
