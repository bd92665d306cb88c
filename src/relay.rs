//! Post-negotiation byte relay.
//!
//! Once both legs of a session are secured, two one-directional copy loops
//! run concurrently until their sources end. Each direction can be tapped
//! through the [`Tap`] capability, which the verbose mode uses to mirror
//! traffic to the log with a directional prefix.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::READ_BUFFER_SIZE;

/// Byte-sink capability used to observe relayed traffic.
pub trait Tap: Send + Sync {
    /// Consumes one chunk of relayed bytes.
    fn write(&self, data: &[u8]) -> io::Result<()>;
}

/// Tap that logs each chunk as a line tagged with a directional prefix.
pub struct PrefixTap {
    prefix: &'static str,
}

impl PrefixTap {
    /// Creates a tap with an arbitrary prefix.
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }

    /// Tap for the client-to-upstream direction.
    pub fn client_to_upstream() -> Self {
        Self::new("->")
    }

    /// Tap for the upstream-to-client direction.
    pub fn upstream_to_client() -> Self {
        Self::new("<-")
    }
}

impl Tap for PrefixTap {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        tracing::info!(target: "relay", "{} {}", self.prefix, String::from_utf8_lossy(data));
        Ok(())
    }
}

/// Composite tap that writes to two taps in sequence.
///
/// Fails if either constituent fails, ending the tapped direction.
pub struct Tee<A, B>(pub A, pub B);

impl<A: Tap, B: Tap> Tap for Tee<A, B> {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.0.write(data)?;
        self.1.write(data)
    }
}

/// Copies bytes from `reader` to `writer` until EOF or error, feeding each
/// chunk through `tap` before forwarding it.
///
/// Errors end the direction silently (logged at debug); the write half is
/// shut down so the far side sees EOF.
async fn copy_with_tap<R, W>(mut reader: R, mut writer: W, tap: Option<Arc<dyn Tap>>) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "relay read ended");
                break;
            }
        };

        if let Some(tap) = &tap {
            if let Err(e) = tap.write(&buf[..n]) {
                tracing::debug!(error = %e, "relay tap failed");
                break;
            }
        }

        if let Err(e) = writer.write_all(&buf[..n]).await {
            tracing::debug!(error = %e, "relay write ended");
            break;
        }
        copied += n as u64;
    }

    let _ = writer.shutdown().await;
    copied
}

/// Relays bytes between the two secured streams until both directions end.
///
/// Returns the byte counts copied client-to-upstream and upstream-to-client.
pub async fn relay<C, U>(
    client: C,
    upstream: U,
    client_tap: Option<Arc<dyn Tap>>,
    upstream_tap: Option<Arc<dyn Tap>>,
) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let to_upstream = tokio::spawn(copy_with_tap(client_read, upstream_write, client_tap));
    let to_client = tokio::spawn(copy_with_tap(upstream_read, client_write, upstream_tap));

    let sent = match to_upstream.await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "client-to-upstream relay task panicked");
            0
        }
    };
    let received = match to_client.await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "upstream-to-client relay task panicked");
            0
        }
    };

    (sent, received)
}
