//! CLI definitions for xmppstrip.

use clap::{builder::PossibleValuesParser, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:5222";

/// Default upstream feature-scan deadline.
pub const DEFAULT_SCAN_TIMEOUT: &str = "15s";

/// Parse a duration from a human-readable string.
fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Transparent man-in-the-middle proxy for the XMPP STARTTLS handshake.
#[derive(Debug, Parser)]
#[command(name = "xmppstrip")]
#[command(version, about, long_about = None)]
#[command(after_help = "If no certificate is provided, a self-signed one is generated.")]
pub struct Cli {
    /// Log level (debug|info|warn|error)
    #[arg(long, default_value = "info", value_parser = PossibleValuesParser::new(["debug", "info", "warn", "error"]))]
    pub log_level: String,

    /// Local host:port to serve
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Override the XMPP hostname sent in the protocol
    #[arg(long)]
    pub host: Option<String>,

    /// PEM certificate to serve to connecting clients
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM private key matching --cert
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Tee both relay directions to the log
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// Serve TLS to clients even without --cert/--key (implied when both are given)
    #[arg(long, default_value_t = false)]
    pub client_tls: bool,

    /// Deadline for the upstream STARTTLS feature scan
    #[arg(long, value_parser = parse_duration, default_value = DEFAULT_SCAN_TIMEOUT)]
    pub scan_timeout: Duration,

    /// Disable upstream certificate verification (development only)
    #[arg(long, default_value_t = false)]
    pub insecure_skip_verify: bool,

    /// host:port of the real XMPP server
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::try_parse_from(["xmppstrip", "jabber.example.com:5222"]).unwrap();

        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.bind, DEFAULT_BIND);
        assert_eq!(cli.target, "jabber.example.com:5222");
        assert!(cli.host.is_none());
        assert!(cli.cert.is_none());
        assert!(cli.key.is_none());
        assert!(!cli.verbose);
        assert!(!cli.client_tls);
        assert!(!cli.insecure_skip_verify);
        assert_eq!(cli.scan_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_parse_full() {
        let cli = Cli::try_parse_from([
            "xmppstrip",
            "--log-level",
            "debug",
            "--bind",
            "0.0.0.0:15222",
            "--host",
            "chat.example.org",
            "--cert",
            "/path/to/cert.pem",
            "--key",
            "/path/to/key.pem",
            "--verbose",
            "--client-tls",
            "--scan-timeout",
            "30s",
            "--insecure-skip-verify",
            "jabber.example.com:5222",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.bind, "0.0.0.0:15222");
        assert_eq!(cli.host, Some("chat.example.org".to_string()));
        assert_eq!(cli.cert, Some(PathBuf::from("/path/to/cert.pem")));
        assert_eq!(cli.key, Some(PathBuf::from("/path/to/key.pem")));
        assert!(cli.verbose);
        assert!(cli.client_tls);
        assert!(cli.insecure_skip_verify);
        assert_eq!(cli.scan_timeout, Duration::from_secs(30));
        assert_eq!(cli.target, "jabber.example.com:5222");
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let result = Cli::try_parse_from(["xmppstrip", "--verbose"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_log_level_is_an_error() {
        let result = Cli::try_parse_from(["xmppstrip", "--log-level", "trace", "a:1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duration_parsing() {
        let cli = Cli::try_parse_from([
            "xmppstrip",
            "--scan-timeout",
            "1m30s",
            "jabber.example.com:5222",
        ])
        .unwrap();
        assert_eq!(cli.scan_timeout, Duration::from_secs(90));

        let result = Cli::try_parse_from([
            "xmppstrip",
            "--scan-timeout",
            "not-a-duration",
            "jabber.example.com:5222",
        ]);
        assert!(result.is_err());
    }
}
