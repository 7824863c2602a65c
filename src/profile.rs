//! Engine configuration synthesis.
//!
//! Renders sing-box-compatible JSON documents for the two engine roles:
//! a short-lived probe instance (one SOCKS inbound, one outbound) and the
//! long-running tunnel instance (TUN inbound, proxy outbounds plus a
//! `"direct"` fallback, routing rules).
//!
//! Profiles are synthesized fresh per invocation, validated, serialized,
//! and never mutated afterwards.

use serde::Serialize;

use crate::config::{ProbeListener, TunInterface};
use crate::endpoint::{EndpointDescriptor, Transport};

/// Tag of the first proxy outbound; routing rules reference it by name.
pub const PROXY_OUTBOUND_TAG: &str = "proxy";

/// Tag of the trailing fail-open fallback outbound.
pub const DIRECT_OUTBOUND_TAG: &str = "direct";

/// DNS resolver handed to the tunnel-mode engine.
const TUNNEL_DNS_SERVER: &str = "8.8.8.8";

// ── Document structure ──────────────────────────────────────────────

/// A complete engine configuration document.
#[derive(Debug, Clone, Serialize)]
pub struct EngineProfile {
    pub log: LogOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsOptions>,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogOptions {
    pub level: String,
    pub timestamp: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsOptions {
    pub servers: Vec<DnsServer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsServer {
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    /// Loopback SOCKS listener used by probe instances.
    Socks {
        tag: String,
        listen: String,
        listen_port: u16,
    },
    /// Virtual network interface used by the tunnel instance.
    Tun {
        tag: String,
        interface_name: String,
        inet4_address: String,
        mtu: u16,
        auto_route: bool,
        strict_route: bool,
        stack: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Outbound {
    /// Proxy protocol tag ("vless", "trojan", ...) or "direct".
    #[serde(rename = "type")]
    pub proto: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsOptions {
    pub enabled: bool,
    pub server_name: String,
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportOptions {
    Ws { path: String, headers: WsHeaders },
}

#[derive(Debug, Clone, Serialize)]
pub struct WsHeaders {
    #[serde(rename = "Host")]
    pub host: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteOptions {
    pub rules: Vec<RouteRule>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteRule {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub protocol: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub outbound: String,
}

/// Reasons an assembled profile is rejected before it reaches disk.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("no endpoints to build outbounds from")]
    NoEndpoints,
    #[error("endpoint '{0}' has an empty server address")]
    EmptyServer(String),
    #[error("endpoint '{0}' has an empty TLS server name")]
    EmptyServerName(String),
    #[error("profile serialization failed: {0}")]
    Render(#[from] serde_json::Error),
}

// ── Synthesis ───────────────────────────────────────────────────────

/// Build the probe-mode profile: one loopback SOCKS inbound bound to the
/// fixed probe listener, one outbound for the candidate, no routes.
pub fn probe_profile(
    endpoint: &EndpointDescriptor,
    listener: &ProbeListener,
) -> Result<EngineProfile, ProfileError> {
    validate_endpoint(endpoint)?;

    Ok(EngineProfile {
        log: default_log(),
        dns: None,
        inbounds: vec![Inbound::Socks {
            tag: "socks-in".into(),
            listen: listener.address.clone(),
            listen_port: listener.port,
        }],
        outbounds: vec![proxy_outbound(endpoint, PROXY_OUTBOUND_TAG.into())],
        route: None,
    })
}

/// Build the tunnel-mode profile: a TUN inbound, one outbound per selected
/// endpoint, and a trailing `"direct"` outbound.
///
/// The `"direct"` fallback is appended unconditionally: traffic the rules
/// don't steer through the proxy goes out directly instead of being
/// dropped. Routing sends TLS traffic for `routed_domains` through
/// [`PROXY_OUTBOUND_TAG`] and UDP port 53 through [`DIRECT_OUTBOUND_TAG`].
pub fn tunnel_profile(
    endpoints: &[EndpointDescriptor],
    routed_domains: &[String],
    tun: &TunInterface,
) -> Result<EngineProfile, ProfileError> {
    if endpoints.is_empty() {
        return Err(ProfileError::NoEndpoints);
    }
    for endpoint in endpoints {
        validate_endpoint(endpoint)?;
    }

    let mut outbounds: Vec<Outbound> = endpoints
        .iter()
        .enumerate()
        .map(|(i, e)| proxy_outbound(e, proxy_tag(i)))
        .collect();
    outbounds.push(Outbound {
        proto: DIRECT_OUTBOUND_TAG.into(),
        tag: DIRECT_OUTBOUND_TAG.into(),
        server: None,
        server_port: None,
        uuid: None,
        tls: None,
        transport: None,
    });

    let mut rules = Vec::with_capacity(2);
    if !routed_domains.is_empty() {
        rules.push(RouteRule {
            protocol: vec!["tls".into()],
            domain: routed_domains.to_vec(),
            outbound: PROXY_OUTBOUND_TAG.into(),
            ..RouteRule::default()
        });
    }
    rules.push(RouteRule {
        network: Some("udp".into()),
        port: Some(53),
        outbound: DIRECT_OUTBOUND_TAG.into(),
        ..RouteRule::default()
    });

    Ok(EngineProfile {
        log: default_log(),
        dns: Some(DnsOptions {
            servers: vec![DnsServer {
                address: TUNNEL_DNS_SERVER.into(),
            }],
        }),
        inbounds: vec![Inbound::Tun {
            tag: "tun-in".into(),
            interface_name: tun.interface_name.clone(),
            inet4_address: tun.inet4_address.clone(),
            mtu: tun.mtu,
            auto_route: true,
            strict_route: true,
            stack: "gvisor".into(),
        }],
        outbounds,
        route: Some(RouteOptions { rules }),
    })
}

impl EngineProfile {
    /// Serialize the profile to the JSON document consumed by the engine.
    pub fn render(&self) -> Result<String, ProfileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn default_log() -> LogOptions {
    LogOptions {
        level: "info".into(),
        timestamp: true,
    }
}

/// First proxy outbound keeps the routable tag, later ones get a suffix.
fn proxy_tag(index: usize) -> String {
    if index == 0 {
        PROXY_OUTBOUND_TAG.to_string()
    } else {
        format!("{PROXY_OUTBOUND_TAG}-{}", index + 1)
    }
}

/// TLS is always on with certificate validation: a dead-but-verifiable
/// endpoint is preferred over a live-but-unverified one.
fn proxy_outbound(endpoint: &EndpointDescriptor, tag: String) -> Outbound {
    let transport = match &endpoint.transport {
        Transport::WebSocket { path, host } => Some(TransportOptions::Ws {
            path: path.clone(),
            headers: WsHeaders { host: host.clone() },
        }),
        // Unrecognized transports fall back to raw TCP.
        Transport::Tcp | Transport::Other(_) => None,
    };

    Outbound {
        proto: endpoint.scheme.clone(),
        tag,
        server: Some(endpoint.host.clone()),
        server_port: Some(endpoint.port),
        uuid: Some(endpoint.identity.clone()),
        tls: Some(TlsOptions {
            enabled: true,
            server_name: endpoint.server_name.clone(),
            insecure: false,
        }),
        transport,
    }
}

fn validate_endpoint(endpoint: &EndpointDescriptor) -> Result<(), ProfileError> {
    if endpoint.host.is_empty() {
        return Err(ProfileError::EmptyServer(endpoint.to_string()));
    }
    if endpoint.server_name.is_empty() {
        return Err(ProfileError::EmptyServerName(endpoint.to_string()));
    }
    Ok(())
}
