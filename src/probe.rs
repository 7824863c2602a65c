//! Candidate liveness probing.
//!
//! For one endpoint: write a probe config to a throwaway temp file, start
//! an isolated engine instance on the fixed loopback listener, wait the
//! startup grace period, issue one HTTP GET through the listener, and
//! classify the candidate as live or dead. The probe process and its
//! config file never outlive the probe, whatever the outcome.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::Settings;
use crate::endpoint::EndpointDescriptor;
use crate::engine::EngineProcess;
use crate::profile;

/// Connect timeout for the probe HTTP client.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Verdict for one probed candidate.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub descriptor: EndpointDescriptor,
    pub live: bool,
    /// Round-trip time of the test request (present only when live).
    pub latency: Option<Duration>,
    /// Engine stderr and/or request error (present only when dead).
    pub diagnostic: Option<String>,
}

impl ProbeResult {
    pub fn live(descriptor: EndpointDescriptor, latency: Duration) -> Self {
        Self {
            descriptor,
            live: true,
            latency: Some(latency),
            diagnostic: None,
        }
    }

    pub fn dead(descriptor: EndpointDescriptor, diagnostic: String) -> Self {
        Self {
            descriptor,
            live: false,
            latency: None,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Seam between the selection loop and the engine-backed prober, so the
/// loop can be exercised with scripted verdicts.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, endpoint: &EndpointDescriptor) -> ProbeResult;
}

/// Engine-backed prober. One isolated engine instance per call, torn down
/// before the call returns.
pub struct ProbeRunner<'a> {
    settings: &'a Settings,
}

impl<'a> ProbeRunner<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// One HTTP GET to the test target through the probe listener.
    async fn request_through_listener(&self) -> Result<Duration, String> {
        let listener = &self.settings.probe_listener;
        let proxy_url = format!("socks5://{}:{}", listener.address, listener.port);
        let proxy = reqwest::Proxy::all(&proxy_url)
            .map_err(|e| format!("invalid probe proxy URL '{proxy_url}': {e}"))?;

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.settings.probe_request_timeout)
            .connect_timeout(PROBE_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build probe client: {e}"))?;

        let start = Instant::now();
        let resp = client
            .get(&self.settings.probe_target_url)
            .send()
            .await
            .map_err(|e| format!("test request failed: {e}"))?;

        let status = resp.status().as_u16();
        if (200..400).contains(&status) {
            Ok(start.elapsed())
        } else {
            Err(format!("test request returned status {status}"))
        }
    }
}

#[async_trait]
impl<'a> LivenessProbe for ProbeRunner<'a> {
    async fn probe(&self, endpoint: &EndpointDescriptor) -> ProbeResult {
        // A config that cannot be synthesized counts as a dead candidate,
        // not a fatal error; the selector moves on.
        let rendered = match profile::probe_profile(endpoint, &self.settings.probe_listener)
            .and_then(|p| p.render())
        {
            Ok(r) => r,
            Err(e) => {
                return ProbeResult::dead(endpoint.clone(), format!("invalid probe config: {e}"))
            }
        };

        let config_file = match tempfile::Builder::new()
            .prefix("tunpick-probe-")
            .suffix(".json")
            .tempfile()
        {
            Ok(f) => f,
            Err(e) => {
                return ProbeResult::dead(
                    endpoint.clone(),
                    format!("failed to create probe config file: {e}"),
                )
            }
        };
        if let Err(e) = std::fs::write(config_file.path(), &rendered) {
            return ProbeResult::dead(
                endpoint.clone(),
                format!("failed to write probe config: {e}"),
            );
        }

        // Temp file is dropped (and removed) on this early return too.
        let engine = match EngineProcess::spawn_probe(&self.settings.engine_binary, config_file.path())
        {
            Ok(p) => p,
            Err(e) => return ProbeResult::dead(endpoint.clone(), format!("{e:#}")),
        };

        // Coarse readiness wait: the listener is assumed ready once the
        // grace period has passed.
        tokio::time::sleep(self.settings.probe_startup_grace).await;

        let verdict = self.request_through_listener().await;

        // Unconditional teardown: the probe process and config file must
        // never leak past this function on any path.
        let engine_log = engine.terminate().await;
        drop(config_file);

        match verdict {
            Ok(latency) => ProbeResult::live(endpoint.clone(), latency),
            Err(reason) => {
                let diagnostic = if engine_log.is_empty() {
                    reason
                } else {
                    format!("{reason}; engine: {engine_log}")
                };
                ProbeResult::dead(endpoint.clone(), diagnostic)
            }
        }
    }
}
