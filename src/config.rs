//! Run settings.
//!
//! One immutable [`Settings`] value is built in `main` from CLI flags and
//! passed by reference to every component. Nothing here mutates after
//! construction.

use std::path::PathBuf;
use std::time::Duration;

/// Loopback address every probe listener binds to.
pub const PROBE_LISTEN_ADDR: &str = "127.0.0.1";

/// Fixed port reserved for probe listeners. Not user-configurable: probes
/// run strictly one at a time, so a single port is enough, and it must be
/// free before each probe starts.
pub const PROBE_LISTEN_PORT: u16 = 10888;

/// Default liveness check target (returns 204 on success).
pub const DEFAULT_PROBE_TARGET: &str = "http://connectivitycheck.gstatic.com/generate_204";

/// Default wait between probe engine start and the test request.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(2);

/// Default per-probe test request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a probe-mode engine instance listens.
#[derive(Debug, Clone)]
pub struct ProbeListener {
    pub address: String,
    pub port: u16,
}

impl Default for ProbeListener {
    fn default() -> Self {
        Self {
            address: PROBE_LISTEN_ADDR.into(),
            port: PROBE_LISTEN_PORT,
        }
    }
}

/// Virtual interface handed to the tunnel-mode engine.
#[derive(Debug, Clone)]
pub struct TunInterface {
    pub interface_name: String,
    pub inet4_address: String,
    pub mtu: u16,
}

impl Default for TunInterface {
    fn default() -> Self {
        Self {
            interface_name: "tun0".into(),
            inet4_address: "172.19.0.1/30".into(),
            mtu: 1500,
        }
    }
}

/// Immutable configuration for one run of the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Subscription URL listing one proxy URI per line.
    pub subscription_url: String,
    /// When set, candidates with this URI scheme are tried first.
    pub prefer_scheme: Option<String>,
    /// Resolved path to the tunneling engine binary.
    pub engine_binary: PathBuf,
    pub probe_listener: ProbeListener,
    /// URL fetched through each probe listener to verify liveness.
    pub probe_target_url: String,
    pub probe_startup_grace: Duration,
    pub probe_request_timeout: Duration,
    /// Persistent tunnel config path; overwritten on start, removed on
    /// clean shutdown.
    pub tunnel_config_path: PathBuf,
    /// Domains steered through the proxy outbound in tunnel mode.
    pub routed_domains: Vec<String>,
    pub tun: TunInterface,
    /// Run the tunnel engine under sudo (the TUN inbound needs privileges).
    pub elevate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subscription_url: String::new(),
            prefer_scheme: None,
            engine_binary: PathBuf::from("sing-box"),
            probe_listener: ProbeListener::default(),
            probe_target_url: DEFAULT_PROBE_TARGET.into(),
            probe_startup_grace: DEFAULT_STARTUP_GRACE,
            probe_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tunnel_config_path: default_tunnel_config_path(),
            routed_domains: Vec::new(),
            tun: TunInterface::default(),
            elevate: true,
        }
    }
}

/// Default tunnel config location: `~/.tunpick/state/tunnel.json`.
pub fn default_tunnel_config_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tunpick")
        .join("state")
        .join("tunnel.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tunnel_config_path_is_under_state_dir() {
        let path = default_tunnel_config_path();
        assert!(path.ends_with("state/tunnel.json") || path.ends_with("state\\tunnel.json"));
    }

    #[test]
    fn probe_listener_defaults_to_fixed_loopback() {
        let listener = ProbeListener::default();
        assert_eq!(listener.address, "127.0.0.1");
        assert_eq!(listener.port, PROBE_LISTEN_PORT);
    }
}
