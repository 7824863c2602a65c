use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tunpick::config::{self, Settings};
use tunpick::probe::ProbeRunner;
use tunpick::selector::CandidateSelector;
use tunpick::subscription;
use tunpick::supervisor::TunnelSupervisor;

#[derive(Parser, Debug)]
#[command(
    name = "tunpick",
    version,
    about = "Finds a live proxy endpoint in a subscription list and runs a tunnel through it"
)]
struct Cli {
    /// Subscription URL listing one proxy URI per line (plain or base64).
    #[arg(long)]
    subscription_url: String,

    /// Try candidates with this URI scheme first (e.g. "vless").
    #[arg(long)]
    prefer_scheme: Option<String>,

    /// Tunneling engine binary: a name looked up in PATH or an explicit path.
    #[arg(long, default_value = "sing-box")]
    engine: String,

    /// URL fetched through each probe listener to verify liveness.
    #[arg(long, default_value = config::DEFAULT_PROBE_TARGET)]
    test_url: String,

    /// Seconds to wait after a probe engine starts before the test request.
    #[arg(long, default_value_t = 2)]
    startup_grace: u64,

    /// Per-probe test request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    request_timeout: u64,

    /// Where the long-running tunnel config is written.
    #[arg(long)]
    config_path: Option<PathBuf>,

    /// Domain steered through the proxy outbound (repeatable).
    #[arg(long = "route-domain")]
    route_domains: Vec<String>,

    /// Run the tunnel engine without sudo (it must already have the
    /// privileges to create a TUN interface).
    #[arg(long)]
    no_elevate: bool,
}

impl Cli {
    fn into_settings(self) -> Result<Settings> {
        // Resolving up front makes a missing engine fatal before any
        // candidate is probed.
        let engine_binary = which::which(&self.engine)
            .with_context(|| format!("tunneling engine binary '{}' not found", self.engine))?;

        Ok(Settings {
            subscription_url: self.subscription_url,
            prefer_scheme: self.prefer_scheme,
            engine_binary,
            probe_target_url: self.test_url,
            probe_startup_grace: Duration::from_secs(self.startup_grace),
            probe_request_timeout: Duration::from_secs(self.request_timeout),
            tunnel_config_path: self
                .config_path
                .unwrap_or_else(config::default_tunnel_config_path),
            routed_domains: self.route_domains,
            elevate: !self.no_elevate,
            ..Settings::default()
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = cli.into_settings()?;

    info!("fetching subscription from {}", settings.subscription_url);
    let mut candidates = subscription::fetch_candidates(&settings.subscription_url).await?;
    if let Some(scheme) = &settings.prefer_scheme {
        candidates = subscription::prefer_scheme(candidates, scheme);
    }
    info!("{} candidates, probing sequentially", candidates.len());

    let runner = ProbeRunner::new(&settings);
    let mut selector = CandidateSelector::new(candidates);
    let endpoint = selector.select(&runner).await?;
    info!("selected endpoint {endpoint}");

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, stopping tunnel");
        signal_shutdown.cancel();
    });

    TunnelSupervisor::new(&settings).run(&endpoint, shutdown).await
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
