//! XMPP wire fragments for the STARTTLS handshake.
//!
//! The fragments here are exchanged verbatim with real XMPP implementations,
//! so their byte layout is load-bearing: attribute order, quoting, and the
//! absence of whitespace all match what interoperating servers and clients
//! produce and expect.

use std::fmt::Write;

/// Namespace of the STARTTLS extension.
pub const XMPP_TLS_NAMESPACE: &str = "urn:ietf:params:xml:ns:xmpp-tls";

/// STARTTLS request element sent by the client side of an upgrade.
pub const STARTTLS_REQUEST: &str = "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";

/// Proceed element sent by the server side to confirm the upgrade.
pub const PROCEED: &str = "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";

/// Stream identifier size in bytes (before hex encoding).
pub const STREAM_ID_SIZE: usize = 16;

/// Builds the stream-open tag a client sends when connecting to a server.
pub fn client_stream_open(to: &str) -> String {
    format!(
        "<stream:stream xmlns:stream='http://etherx.jabber.org/streams' \
         xmlns='jabber:client' to='{}' version='1.0'>",
        to
    )
}

/// Builds the server preamble: stream-open plus a features element
/// advertising STARTTLS.
pub fn server_preamble(id: &str, from: &str) -> String {
    format!(
        "<?xml version='1.0'?>\
         <stream:stream xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' \
         id='{}' from='{}' version='1.0' xml:lang='en'>\
         <stream:features>\
         <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'></starttls>\
         </stream:features>",
        id, from
    )
}

/// Generates a fresh random stream identifier.
///
/// The id is an opaque unique token carried in the stream-open tag; peers
/// never interpret it.
pub fn generate_stream_id() -> String {
    let mut id = [0u8; STREAM_ID_SIZE];
    // Use getrandom for cryptographically secure random bytes
    getrandom::getrandom(&mut id).expect("failed to generate random stream ID");

    let mut out = String::with_capacity(STREAM_ID_SIZE * 2);
    for b in id {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_stream_open_exact_bytes() {
        assert_eq!(
            client_stream_open("example.com"),
            "<stream:stream xmlns:stream='http://etherx.jabber.org/streams' \
             xmlns='jabber:client' to='example.com' version='1.0'>"
        );
    }

    #[test]
    fn test_server_preamble_exact_bytes() {
        assert_eq!(
            server_preamble("abc123", "example.com"),
            "<?xml version='1.0'?>\
             <stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' \
             id='abc123' from='example.com' version='1.0' xml:lang='en'>\
             <stream:features>\
             <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'></starttls>\
             </stream:features>"
        );
    }

    #[test]
    fn test_starttls_request_exact_bytes() {
        assert_eq!(
            STARTTLS_REQUEST,
            "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>"
        );
    }

    #[test]
    fn test_proceed_exact_bytes() {
        assert_eq!(PROCEED, "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>");
    }

    #[test]
    fn test_fragments_use_starttls_namespace() {
        assert!(STARTTLS_REQUEST.contains(XMPP_TLS_NAMESPACE));
        assert!(PROCEED.contains(XMPP_TLS_NAMESPACE));
        assert!(server_preamble("id", "host").contains(XMPP_TLS_NAMESPACE));
    }

    #[test]
    fn test_generate_stream_id_format() {
        let id = generate_stream_id();
        assert_eq!(id.len(), STREAM_ID_SIZE * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_stream_id_uniqueness() {
        assert_ne!(generate_stream_id(), generate_stream_id());
    }
}
