//! Proxy URI decoding.
//!
//! Turns one subscription line (`scheme://identity@host:port?sni=&type=&path=&host=`)
//! into an [`EndpointDescriptor`]. Pure string-to-struct translation, no I/O.

use std::fmt;

use url::Url;

/// Default server port when the URI carries none (or an explicit zero).
const DEFAULT_PORT: u16 = 443;

/// Transport layered on top of the proxy connection.
///
/// Only WebSocket is recognized explicitly; any other `type=` value is
/// accepted but produces no transport block, so the engine falls back to
/// raw TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Plain TCP, no transport block in the engine config.
    Tcp,
    /// WebSocket transport. `host` is sent as the HTTP Host header.
    WebSocket { path: String, host: String },
    /// Unrecognized transport type, treated as plain TCP downstream.
    Other(String),
}

/// Structured decoding of one proxy URI.
///
/// Immutable once parsed: a decode either yields a fully-populated
/// descriptor or a [`DecodeError`], never a partial value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Proxy protocol tag, preserved from the URI scheme.
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Opaque credential from the URI userinfo (a UUID for most protocols).
    pub identity: String,
    /// TLS SNI. Falls back to `host` when the URI has no `sni=`.
    pub server_name: String,
    pub transport: Transport,
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Reasons a subscription line cannot become a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unparsable proxy URI: {0}")]
    Uri(#[from] url::ParseError),
    #[error("proxy URI has no host")]
    MissingHost,
}

/// Decode a single proxy URI into an [`EndpointDescriptor`].
///
/// Deterministic pure function of its input: the same string always yields
/// the same descriptor. Defaults: missing/zero port → 443, missing `sni` →
/// host, missing transport `host` → server name.
pub fn decode(uri: &str) -> Result<EndpointDescriptor, DecodeError> {
    let parsed = Url::parse(uri)?;

    let host = parsed
        .host_str()
        .ok_or(DecodeError::MissingHost)?
        .to_string();
    let port = match parsed.port() {
        Some(0) | None => DEFAULT_PORT,
        Some(p) => p,
    };
    let identity = parsed.username().to_string();

    let mut sni = None;
    let mut transport_type = None;
    let mut transport_path = None;
    let mut transport_host = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "sni" => sni = non_empty(value.into_owned()),
            "type" => transport_type = non_empty(value.into_owned()),
            "path" => transport_path = Some(value.into_owned()),
            "host" => transport_host = non_empty(value.into_owned()),
            _ => {}
        }
    }

    let server_name = sni.unwrap_or_else(|| host.clone());
    let transport = match transport_type.as_deref() {
        None => Transport::Tcp,
        Some("ws") => Transport::WebSocket {
            path: transport_path.unwrap_or_default(),
            host: transport_host.unwrap_or_else(|| server_name.clone()),
        },
        Some(other) => Transport::Other(other.to_string()),
    };

    Ok(EndpointDescriptor {
        scheme: parsed.scheme().to_string(),
        host,
        port,
        identity,
        server_name,
        transport,
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
