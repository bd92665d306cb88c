//! xmppstrip - transparent man-in-the-middle proxy for the XMPP STARTTLS
//! upgrade handshake.
//!
//! The proxy terminates TLS on the client-facing leg (acting as a server),
//! originates a fresh TLS connection to the real server (acting as a client),
//! and relays the decrypted stream bidirectionally, optionally mirroring it
//! to the log. The hard part lives in the STARTTLS negotiation: spotting the
//! server's feature advertisement inside an unterminated, incrementally
//! arriving XML stream with bounded lookahead, and driving the upgrade on
//! both legs without desynchronizing either.

pub mod buffer;
pub mod cli;
pub mod client;
pub mod common;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod scan;
pub mod server;
pub mod tls;

pub use buffer::{
    NegotiationBuffer, DOWNSTREAM_BUFFER_CAPACITY, NEGOTIATION_BUFFER_CAPACITY,
    NEGOTIATION_FILL_MARGIN,
};
pub use cli::Cli;
pub use client::upgrade_upstream;
pub use common::{format_duration, split_host_port, DnsResolver, READ_BUFFER_SIZE};
pub use error::{Error, ExitCode, Result};
pub use protocol::{
    client_stream_open, generate_stream_id, server_preamble, PROCEED, STARTTLS_REQUEST,
};
pub use relay::{relay, PrefixTap, Tap, Tee};
pub use scan::{
    contains_features_close, contains_proceed, contains_starttls_feature, scan_for_starttls,
    ScanError, FEATURE_SCAN_TIMEOUT,
};
pub use server::{
    build_session_context, run_proxy, serve, upgrade_downstream, SessionContext,
};
pub use tls::{
    build_server_config, build_upstream_config, compute_fingerprint, format_fingerprint,
    generate_self_signed_identity, load_cert_key, CertKeyPair, TlsError, TlsResult,
};
