//! # sigdesk-gateway
//!
//! Signature gateway binary. Loads settings, wires the server together, and
//! runs until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sigdesk_server::auth::StaticDeviceAuthenticator;
use sigdesk_server::config::ServerConfig;
use sigdesk_server::server::SigdeskServer;
use sigdesk_settings::SigdeskSettings;

/// Remote signature collection gateway.
#[derive(Parser, Debug)]
#[command(name = "sigdesk-gateway", about = "Remote signature collection gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.sigdesk/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn load(cli: &Cli) -> Result<SigdeskSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(sigdesk_settings::settings_path);
    sigdesk_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn server_config(cli: &Cli, settings: &SigdeskSettings) -> ServerConfig {
    let mut config = ServerConfig::from(settings);
    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config
}

fn build_server(cli: &Cli, settings: &SigdeskSettings) -> SigdeskServer {
    let authenticator = StaticDeviceAuthenticator::new(&settings.devices);
    if authenticator.is_empty() {
        tracing::warn!("no tablets registered, every tablet connection will be refused");
    }
    SigdeskServer::new(server_config(cli, settings), Arc::new(authenticator))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load(&args)?;
    sigdesk_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let mut server = build_server(&args, &settings);
    match sigdesk_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
    }

    let (addr, serve) = server.listen().await.context("Failed to bind server")?;
    let expiry = server.spawn_expiry();
    tracing::info!(
        "Signature gateway listening on http://{addr} ({} tablets registered)",
        settings.devices.len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown_gracefully(vec![serve, expiry]).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_defaults_defer_to_settings() {
        let cli = Cli::parse_from(["sigdesk-gateway"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.settings.is_none());

        let config = server_config(&cli, &SigdeskSettings::default());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8450);
    }

    #[test]
    fn cli_overrides_host_and_port() {
        let cli = Cli::parse_from(["sigdesk-gateway", "--host", "127.0.0.1", "--port", "0"]);
        let config = server_config(&cli, &SigdeskSettings::default());
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
    }

    #[test]
    fn settings_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"port": 9123}}, "signing": {{"defaultTimeoutMinutes": 7}},
                "devices": [{{"tabletId": "tab-1", "tenantId": "acme", "tokenSha256": "00"}}]}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_owned();
        let cli = Cli::parse_from(["sigdesk-gateway", "--settings", &path]);

        let settings = load(&cli).unwrap();
        assert_eq!(settings.devices.len(), 1);
        let config = server_config(&cli, &settings);
        assert_eq!(config.port, 9123);
        assert_eq!(config.timeouts.default_minutes, 7);
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let path = file.path().to_str().unwrap().to_owned();
        let cli = Cli::parse_from(["sigdesk-gateway", "--settings", &path]);
        assert!(load(&cli).is_err());
    }

    #[tokio::test]
    async fn server_boots_and_serves_health() {
        let cli = Cli::parse_from(["sigdesk-gateway", "--host", "127.0.0.1", "--port", "0"]);
        let server = build_server(&cli, &SigdeskSettings::default());
        let (addr, handle) = server.listen().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
