//! Stream helpers shared by the CLI adapters and the pipeline.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CHUNK: usize = 8 * 1024;

/// Copy `reader` to `console` and, when given, to `file` until EOF.
///
/// Returns the number of bytes copied.
pub async fn tee<R, C, F>(
    mut reader: R,
    mut console: C,
    mut file: Option<F>,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    C: AsyncWrite + Unpin,
    F: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        console.write_all(&buf[..n]).await?;
        if let Some(file) = file.as_mut() {
            file.write_all(&buf[..n]).await?;
        }
        total += n as u64;
    }
    console.flush().await?;
    if let Some(file) = file.as_mut() {
        file.flush().await?;
    }
    Ok(total)
}
