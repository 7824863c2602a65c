//! Long-running tunnel supervision.
//!
//! Writes the tunnel config for the selected endpoint, starts the
//! privileged engine process with its output attached to ours, and blocks
//! until either the engine dies (an error) or the cancellation token
//! fires (normal shutdown). Teardown — termination request plus config
//! removal — runs exactly once.

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Settings;
use crate::endpoint::EndpointDescriptor;
use crate::engine::EngineProcess;
use crate::profile;

pub struct TunnelSupervisor<'a> {
    settings: &'a Settings,
}

impl<'a> TunnelSupervisor<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Run the tunnel until `shutdown` is cancelled or the engine exits.
    ///
    /// A config that cannot be synthesized here is fatal — there is no
    /// fallback candidate at this point. On clean shutdown the config
    /// file is removed; if the engine crashes the file may be left behind
    /// for post-mortem inspection.
    pub async fn run(
        &self,
        endpoint: &EndpointDescriptor,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let rendered = profile::tunnel_profile(
            std::slice::from_ref(endpoint),
            &self.settings.routed_domains,
            &self.settings.tun,
        )
        .and_then(|p| p.render())
        .context("failed to build tunnel config")?;

        let path = &self.settings.tunnel_config_path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, rendered)
            .await
            .with_context(|| format!("failed to write tunnel config to {}", path.display()))?;
        info!("tunnel config written to {}", path.display());

        let mut engine =
            EngineProcess::spawn_tunnel(&self.settings.engine_binary, path, self.settings.elevate)
                .context("failed to start tunnel engine")?;
        info!(
            "tunnel engine running (pid {:?}) through {endpoint}; waiting for shutdown signal",
            engine.id()
        );

        // `engine_exited` keeps teardown single-shot: once the child is
        // gone there is no process left to signal. Cancellation itself is
        // idempotent, so repeated signals collapse into this one path.
        let mut engine_exited = false;
        let outcome = tokio::select! {
            status = engine.wait() => {
                engine_exited = true;
                match status {
                    Ok(status) => Err(anyhow!("tunnel engine exited unexpectedly with {status}")),
                    Err(e) => Err(anyhow!("waiting on tunnel engine failed: {e}")),
                }
            }
            _ = shutdown.cancelled() => Ok(()),
        };

        if !engine_exited {
            info!("stopping tunnel engine");
            engine.shutdown().await;
        }
        if outcome.is_ok() {
            tokio::fs::remove_file(path).await.ok();
            info!("tunnel stopped, config removed");
        }
        outcome
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn fake_engine(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("fake-engine");
        std::fs::write(&path, script).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn endpoint() -> EndpointDescriptor {
        crate::endpoint::decode("vless://id@host.example.com:443").unwrap()
    }

    #[tokio::test]
    async fn cancellation_tears_down_process_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            engine_binary: fake_engine(dir.path(), "#!/bin/sh\nexec sleep 30\n"),
            tunnel_config_path: dir.path().join("state").join("tunnel.json"),
            elevate: false,
            ..Settings::default()
        };

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        TunnelSupervisor::new(&settings)
            .run(&endpoint(), shutdown)
            .await
            .unwrap();
        assert!(!settings.tunnel_config_path.exists());
    }

    #[tokio::test]
    async fn engine_crash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            engine_binary: fake_engine(dir.path(), "#!/bin/sh\nexit 7\n"),
            tunnel_config_path: dir.path().join("tunnel.json"),
            elevate: false,
            ..Settings::default()
        };

        let err = TunnelSupervisor::new(&settings)
            .run(&endpoint(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited unexpectedly"));
    }

    #[tokio::test]
    async fn config_is_written_before_the_engine_starts() {
        // The fake engine copies its config argument; if the file were
        // missing at spawn time the copy (and this assert) would fail.
        let dir = tempfile::tempdir().unwrap();
        let copied = dir.path().join("seen-config.json");
        let script = format!("#!/bin/sh\ncp \"$3\" {}\nexec sleep 30\n", copied.display());
        let settings = Settings {
            engine_binary: fake_engine(dir.path(), &script),
            tunnel_config_path: dir.path().join("tunnel.json"),
            elevate: false,
            ..Settings::default()
        };

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        TunnelSupervisor::new(&settings)
            .run(&endpoint(), shutdown)
            .await
            .unwrap();

        let seen = std::fs::read_to_string(copied).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&seen).unwrap();
        assert_eq!(parsed["inbounds"][0]["type"], "tun");
        assert_eq!(
            parsed["outbounds"].as_array().unwrap().last().unwrap()["tag"],
            "direct"
        );
    }
}
