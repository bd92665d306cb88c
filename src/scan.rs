//! Feature scanner for the server's STARTTLS advertisement.
//!
//! XMPP streams are one long unterminated XML document, so the scanner has to
//! spot the `<starttls/>` feature inside `<stream:features>` from whatever
//! partial reads have arrived so far, with a hard cap on lookahead. The whole
//! filled region is re-scanned after every read; with a 10 KiB bound the
//! simplicity wins over an incremental matcher.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::buffer::NegotiationBuffer;

/// Default deadline for the upstream feature scan.
pub const FEATURE_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// STARTTLS feature marker, single-quoted xmlns.
const STARTTLS_MARKER_SQ: &[u8] = b"<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls";

/// STARTTLS feature marker, double-quoted xmlns.
const STARTTLS_MARKER_DQ: &[u8] = b"<starttls xmlns=\"urn:ietf:params:xml:ns:xmpp-tls";

/// Closing marker of the features element; matches both `</stream:features>`
/// and the self-closing `<stream:features/>` spelling's terminator.
const FEATURES_CLOSE_MARKER: &[u8] = b"/stream:features>";

/// Marker of the server's acceptance of a STARTTLS request.
const PROCEED_MARKER: &[u8] = b"<proceed";

/// Classified scan failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    /// The features element closed without advertising STARTTLS.
    #[error("peer does not support STARTTLS")]
    FeatureAbsent,

    /// The buffer came within the margin of capacity before a verdict.
    #[error("negotiation buffer exhausted before STARTTLS was advertised")]
    BufferExhausted,

    /// The deadline expired before a verdict.
    #[error("timed out waiting for stream features")]
    Timeout,

    /// The peer closed the connection mid-scan.
    #[error("connection closed during feature scan")]
    ConnectionClosed,

    /// A read failed mid-scan.
    #[error("read failed during feature scan: {0}")]
    Read(String),
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// True if `buf` contains the STARTTLS feature marker (either quoting).
///
/// The same pattern matches the client's STARTTLS request element, so the
/// downstream orchestrator reuses this check.
pub fn contains_starttls_feature(buf: &[u8]) -> bool {
    contains(buf, STARTTLS_MARKER_SQ) || contains(buf, STARTTLS_MARKER_DQ)
}

/// True if `buf` contains the features-closing marker.
pub fn contains_features_close(buf: &[u8]) -> bool {
    contains(buf, FEATURES_CLOSE_MARKER)
}

/// True if `buf` contains the proceed marker.
pub fn contains_proceed(buf: &[u8]) -> bool {
    contains(buf, PROCEED_MARKER)
}

/// Scans `reader` for the STARTTLS feature advertisement.
///
/// Bytes accumulate into `buf`; before each read the filled region is checked
/// in this exact order:
///
/// 1. STARTTLS marker present: success. A snapshot containing both the
///    marker and the closing tag therefore still succeeds.
/// 2. Remaining capacity below the margin: [`ScanError::BufferExhausted`].
/// 3. Features-closing marker present: [`ScanError::FeatureAbsent`].
///
/// Reads are bounded by an absolute deadline `timeout` from the time of the
/// call; on success no further deadline applies to the connection.
pub async fn scan_for_starttls<R>(
    reader: &mut R,
    buf: &mut NegotiationBuffer,
    timeout: Duration,
) -> Result<(), ScanError>
where
    R: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if contains_starttls_feature(buf.filled()) {
            return Ok(());
        }
        if buf.is_nearly_full() {
            return Err(ScanError::BufferExhausted);
        }
        if contains_features_close(buf.filled()) {
            return Err(ScanError::FeatureAbsent);
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ScanError::Timeout);
        }

        let n = match tokio::time::timeout(remaining, reader.read(buf.unfilled_mut())).await {
            Err(_) => return Err(ScanError::Timeout),
            Ok(Err(e)) => return Err(ScanError::Read(e.to_string())),
            Ok(Ok(0)) => return Err(ScanError::ConnectionClosed),
            Ok(Ok(n)) => n,
        };
        buf.advance(n);
    }
}
