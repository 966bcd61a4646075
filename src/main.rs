//! # ctrl
//!
//! Display proxy binary: resolves settings, opens the state database and
//! serves the control API and the rewriting proxy until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ctrl_proxy::PipelineOptions;
use ctrl_server::ServerConfig;
use ctrl_settings::ProxySettings;
use ctrl_store::{ConfigStore, CookieJar, Database};
use ctrl_telemetry::TelemetryConfig;

/// Remote-controlled display proxy.
#[derive(Parser, Debug)]
#[command(name = "ctrl", version, about = "Remote-controlled display proxy")]
struct Cli {
    /// Address to bind (overrides CTRL_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides CTRL_PORT / PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the state database (overrides DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Target used at first boot and by reset (overrides TARGET_URL).
    #[arg(long)]
    target: Option<String>,

    /// External host:port viewers reach the proxy on (overrides CTRL_PUBLIC_HOST).
    #[arg(long)]
    public_host: Option<String>,

    /// Human-readable logs instead of JSON.
    #[arg(long)]
    pretty_logs: bool,
}

impl Cli {
    fn apply(self, settings: &mut ProxySettings) {
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(dir) = self.data_dir {
            settings.data_dir = dir;
        }
        if let Some(target) = self.target {
            settings.defaults.target_url = target;
        }
        if let Some(public) = self.public_host {
            settings.public_authority = Some(public);
        }
        if self.pretty_logs {
            settings.log_json = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging comes up first so rejected env values are reported
    let json_logs = !cli.pretty_logs
        && std::env::var("CTRL_LOG_JSON")
            .ok()
            .and_then(|v| ctrl_settings::loader::parse_bool(&v))
            .unwrap_or(ProxySettings::default().log_json);
    ctrl_telemetry::init_telemetry(&TelemetryConfig {
        json: json_logs,
        ..Default::default()
    })?;

    let mut settings = ctrl_settings::load_settings();
    cli.apply(&mut settings);

    settings.validate().context("invalid settings")?;
    let listen_addr = settings.listen_addr()?;

    let db_path = settings.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let config_store = Arc::new(ConfigStore::open(db.clone(), &settings.defaults)?);
    let jar = Arc::new(CookieJar::open(db)?);

    let server_config = ServerConfig {
        listen_addr,
        defaults: settings.defaults.clone(),
        proxy: PipelineOptions {
            connect_timeout: settings.connect_timeout(),
            upstream_timeout: settings.upstream_timeout(),
            max_request_body_bytes: settings.max_request_body_bytes,
            max_rewrite_body_bytes: settings.max_rewrite_body_bytes,
            public_authority: settings.public_authority.clone(),
        },
        ..Default::default()
    };

    let handle = ctrl_server::start(server_config, Arc::clone(&config_store), jar)
        .await
        .context("failed to start server")?;

    tracing::info!(
        target_url = %config_store.snapshot().target_url,
        addr = %handle.addr,
        "ctrl ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
