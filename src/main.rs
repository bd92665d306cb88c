//! xmppstrip - transparent man-in-the-middle proxy for the XMPP STARTTLS handshake.

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use xmppstrip::{run_proxy, Cli};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize the crypto provider
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        tracing::warn!(
            "failed to install default crypto provider (may already be installed): {:?}",
            e
        );
    }

    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    if let Err(e) = runtime.block_on(run_proxy(&cli)) {
        tracing::error!(error = %e, "proxy error");
        std::process::exit(e.exit_code().into());
    }
}
