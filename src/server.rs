//! Proxy listener and per-session coordination.
//!
//! This module owns the accept loop, the downstream (server-role) half of the
//! STARTTLS handshake, and the session state machine: downstream upgrade,
//! upstream dial, upstream upgrade, then relay. Stages run strictly in that
//! order; a failure at any stage aborts the session and drops both ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::buffer::{NegotiationBuffer, DOWNSTREAM_BUFFER_CAPACITY, NEGOTIATION_FILL_MARGIN};
use crate::cli::Cli;
use crate::client::upgrade_upstream;
use crate::common::{format_duration, split_host_port, DnsResolver};
use crate::error::{Error, Result};
use crate::protocol::{generate_stream_id, server_preamble, PROCEED};
use crate::relay::{relay, PrefixTap, Tap};
use crate::scan::contains_starttls_feature;
use crate::tls::{
    build_server_config, build_upstream_config, generate_self_signed_identity, load_cert_key,
};

/// Immutable per-process configuration shared by all sessions.
pub struct SessionContext {
    /// Target `host:port` as given on the command line.
    pub target: String,
    /// Host part of the target.
    pub remote_host: String,
    /// Port part of the target.
    pub remote_port: u16,
    /// Hostname used in the XMPP `to`/`from` attributes (and SNI).
    pub xmpp_host: String,
    /// Tee relay traffic to the log.
    pub verbose: bool,
    /// Deadline for the upstream feature scan.
    pub scan_timeout: Duration,
    /// Acceptor for the client-facing leg; `None` disables downstream TLS.
    pub acceptor: Option<TlsAcceptor>,
    /// Connector for the upstream leg.
    pub connector: TlsConnector,
    /// Shared resolver for the upstream dial.
    pub resolver: DnsResolver,
    /// Fingerprint of the served certificate, when serving TLS.
    pub fingerprint: Option<String>,
}

/// Builds the shared session context from CLI arguments.
///
/// Loads or generates the TLS identity when downstream TLS is requested;
/// supplying only one of `--cert`/`--key` is a configuration error.
pub fn build_session_context(args: &Cli) -> Result<SessionContext> {
    let (remote_host, remote_port) = split_host_port(&args.target)?;
    let xmpp_host = args.host.clone().unwrap_or_else(|| remote_host.clone());

    let client_tls = args.client_tls || (args.cert.is_some() && args.key.is_some());

    let identity = match (&args.cert, &args.key) {
        (Some(cert_path), Some(key_path)) => {
            tracing::info!(cert = %cert_path.display(), key = %key_path.display(), "using certificate files");
            Some(
                load_cert_key(cert_path, key_path)
                    .map_err(|e| Error::Config(format!("failed to load certificate: {}", e)))?,
            )
        }
        (None, None) if client_tls => {
            tracing::info!(host = %xmpp_host, "generating self-signed certificate");
            Some(
                generate_self_signed_identity(&xmpp_host)
                    .map_err(|e| Error::Config(format!("failed to generate certificate: {}", e)))?,
            )
        }
        (None, None) => None,
        _ => {
            return Err(Error::Config(
                "--cert and --key must be specified together".to_string(),
            ))
        }
    };

    let fingerprint = identity.as_ref().map(|id| id.fingerprint.clone());
    let acceptor = match identity {
        Some(identity) => {
            let config = build_server_config(identity)
                .map_err(|e| Error::Config(format!("failed to build TLS config: {}", e)))?;
            Some(TlsAcceptor::from(Arc::new(config)))
        }
        None => None,
    };

    let upstream_config = build_upstream_config(args.insecure_skip_verify)
        .map_err(|e| Error::Config(format!("failed to build upstream TLS config: {}", e)))?;
    let connector = TlsConnector::from(Arc::new(upstream_config));

    Ok(SessionContext {
        target: args.target.clone(),
        remote_host,
        remote_port,
        xmpp_host,
        verbose: args.verbose,
        scan_timeout: args.scan_timeout,
        acceptor,
        connector,
        resolver: DnsResolver::new(),
        fingerprint,
    })
}

/// Runs the proxy until a fatal error.
pub async fn run_proxy(args: &Cli) -> Result<()> {
    let ctx = build_session_context(args)?;

    let listener = TcpListener::bind(&args.bind)
        .await
        .map_err(|e| Error::ListenFailed(format!("failed to bind {}: {}", args.bind, e)))?;

    print_startup_message(&args.bind, &ctx);
    tracing::info!(bind = %args.bind, target = %ctx.target, "proxy listening");

    serve(listener, Arc::new(ctx)).await
}

/// Accept loop: one concurrently handled session per connection.
///
/// Session failures are logged and isolated; an error from `accept` itself is
/// fatal and tears the proxy down.
pub async fn serve(listener: TcpListener, ctx: Arc<SessionContext>) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::ListenFailed(format!("accept failed: {}", e)))?;

        tracing::info!(%peer, "connection accepted");

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            match handle_session(stream, &ctx).await {
                Ok((sent, received)) => {
                    tracing::info!(%peer, sent, received, "session finished");
                }
                Err(e) => {
                    tracing::error!(%peer, error = %e, "session failed");
                }
            }
        });
    }
}

/// Drives one session through its stages.
///
/// Downstream upgrade (when configured) strictly precedes the upstream dial,
/// which strictly precedes the upstream upgrade, which strictly precedes the
/// relay. Dropping the streams on any error closes both ends.
async fn handle_session(client: TcpStream, ctx: &SessionContext) -> Result<(u64, u64)> {
    match &ctx.acceptor {
        Some(acceptor) => {
            let client = upgrade_downstream(client, acceptor, &ctx.xmpp_host).await?;
            let upstream = open_upstream(ctx).await?;
            Ok(run_relay(client, upstream, ctx).await)
        }
        None => {
            let upstream = open_upstream(ctx).await?;
            Ok(run_relay(client, upstream, ctx).await)
        }
    }
}

/// Resolves the target and runs the upstream upgrade.
async fn open_upstream(
    ctx: &SessionContext,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let addr = ctx
        .resolver
        .resolve(&ctx.remote_host, ctx.remote_port)
        .await?;
    upgrade_upstream(addr, &ctx.xmpp_host, &ctx.connector, ctx.scan_timeout).await
}

/// Hands both secured streams to the relay, tapped when verbose.
async fn run_relay<C, U>(client: C, upstream: U, ctx: &SessionContext) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_tap, upstream_tap) = if ctx.verbose {
        (
            Some(Arc::new(PrefixTap::client_to_upstream()) as Arc<dyn Tap>),
            Some(Arc::new(PrefixTap::upstream_to_client()) as Arc<dyn Tap>),
        )
    } else {
        (None, None)
    };

    relay(client, upstream, client_tap, upstream_tap).await
}

/// Upgrades the client-facing leg to TLS via STARTTLS (server role).
///
/// Writes the preamble advertising STARTTLS, waits for the client's request
/// in a small bounded buffer, confirms with proceed, and runs the TLS server
/// handshake. Unlike the upstream scan, the wait here is a plain marker
/// check with no deadline and no closing-tag abort: the proxy wrote the only
/// features the client has seen.
pub async fn upgrade_downstream(
    mut stream: TcpStream,
    acceptor: &TlsAcceptor,
    xmpp_host: &str,
) -> Result<tokio_rustls::server::TlsStream<TcpStream>> {
    let stream_id = generate_stream_id();
    stream
        .write_all(server_preamble(&stream_id, xmpp_host).as_bytes())
        .await
        .map_err(|e| Error::DownstreamUpgrade(format!("failed to write preamble: {}", e)))?;

    let mut buf = NegotiationBuffer::with_capacity(DOWNSTREAM_BUFFER_CAPACITY, NEGOTIATION_FILL_MARGIN);
    loop {
        if contains_starttls_feature(buf.filled()) {
            break;
        }
        if buf.is_nearly_full() {
            return Err(Error::DownstreamUpgrade("client did not starttls".to_string()));
        }
        let n = stream
            .read(buf.unfilled_mut())
            .await
            .map_err(|e| Error::DownstreamUpgrade(format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(Error::DownstreamUpgrade(
                "client closed before starttls".to_string(),
            ));
        }
        buf.advance(n);
    }

    stream
        .write_all(PROCEED.as_bytes())
        .await
        .map_err(|e| Error::DownstreamUpgrade(format!("failed to write proceed: {}", e)))?;

    acceptor
        .accept(stream)
        .await
        .map_err(|e| Error::DownstreamUpgrade(format!("TLS handshake failed: {}", e)))
}

/// Prints the startup message.
fn print_startup_message(bind: &str, ctx: &SessionContext) {
    eprintln!("Starting xmppstrip...");
    eprintln!("  Bind: {}", bind);
    eprintln!("  Target: {}", ctx.target);
    eprintln!("  XMPP Host: {}", ctx.xmpp_host);
    eprintln!("  Scan Timeout: {}", format_duration(ctx.scan_timeout));
    eprintln!("  Client TLS: {}", ctx.acceptor.is_some());
    if let Some(fingerprint) = &ctx.fingerprint {
        eprintln!("  Fingerprint (SHA-256): {}", fingerprint);
    }
}
