//! Error types for xmppstrip.

use thiserror::Error;

use crate::scan::ScanError;

/// Exit codes for fatal startup failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Normal exit
    Success = 0,
    /// Generic failure
    Failure = 1,
    /// Bad flags or unreadable key material
    Config = 2,
    /// Listen or accept failed
    ListenFailed = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Main error type for xmppstrip.
///
/// `Config` and `ListenFailed` are fatal and abort the process; the remaining
/// variants are per-session, logged by the coordinator, and terminal only for
/// the session that produced them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("listen failed: {0}")]
    ListenFailed(String),

    #[error("downstream upgrade failed: {0}")]
    DownstreamUpgrade(String),

    #[error("upstream dial failed: {0}")]
    UpstreamDial(String),

    #[error("failed to starttls: {0}")]
    FeatureScan(#[from] ScanError),

    #[error("server did not accept starttls: {0}")]
    StarttlsRejected(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Config(_) => ExitCode::Config,
            Error::ListenFailed(_) => ExitCode::ListenFailed,
            _ => ExitCode::Failure,
        }
    }
}

/// Result type alias for xmppstrip operations.
pub type Result<T> = std::result::Result<T, Error>;
