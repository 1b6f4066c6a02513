//! Laser-tag hub: entry point.
//!
//! Loads the hub configuration, registers the configured devices, keeps
//! their links alive and logs every state change until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! lasertag-hub [OPTIONS]
//!
//! Options:
//!   --config  <PATH>        Configuration file [default: lasertag-hub.toml]
//!   --mode    <MODE>        Transport mode override: local | cloud
//!   --session <ID>          Relay session id (cloud mode)
//!   --device  <ID=ADDRESS>  Extra device to register; repeatable
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable            | Description                               |
//! |---------------------|-------------------------------------------|
//! | `LASERTAG_CONFIG`   | Configuration file path                   |
//! | `LASERTAG_MODE`     | Transport mode override                   |
//! | `LASERTAG_SESSION`  | Relay session id                          |
//! | `LASERTAG_DEVICE`   | Comma-separated `id=address` devices      |
//! | `RUST_LOG`          | Log filter; overrides `[log] level`       |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lasertag_hub::application::registry::{DeviceUpdate, Registry};
use lasertag_hub::domain::TransportMode;
use lasertag_hub::infrastructure::storage::config::{DeviceEntry, HubConfig, TransportKind};
use lasertag_hub::infrastructure::transport::local::WebSocketConnector;
use lasertag_hub::infrastructure::transport::RoutingConnector;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Local,
    Cloud,
}

impl From<ModeArg> for TransportKind {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Local => TransportKind::Local,
            ModeArg::Cloud => TransportKind::Cloud,
        }
    }
}

/// Laser-tag device hub.
///
/// Command-line values override the configuration file.
#[derive(Debug, Parser)]
#[command(
    name = "lasertag-hub",
    about = "Keeps laser-tag devices connected and observable",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "lasertag-hub.toml", env = "LASERTAG_CONFIG")]
    config: PathBuf,

    /// Transport mode override.
    #[arg(long, value_enum, env = "LASERTAG_MODE")]
    mode: Option<ModeArg>,

    /// Relay session id, required in cloud mode.
    #[arg(long, env = "LASERTAG_SESSION")]
    session: Option<String>,

    /// Device to register in addition to the configured ones, as `id=address`.
    #[arg(
        long = "device",
        value_parser = parse_device,
        value_delimiter = ',',
        env = "LASERTAG_DEVICE"
    )]
    devices: Vec<DeviceEntry>,
}

impl Cli {
    /// Applies the command-line overrides on top of the loaded file.
    fn apply_to(self, config: &mut HubConfig) {
        if let Some(mode) = self.mode {
            config.transport.mode = mode.into();
        }
        if let Some(session) = self.session {
            config.transport.session_id = Some(session);
        }
        for device in self.devices {
            config.devices.retain(|known| known.id != device.id);
            config.devices.push(device);
        }
    }
}

fn parse_device(value: &str) -> Result<DeviceEntry, String> {
    let (id, address) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ID=ADDRESS, got '{value}'"))?;
    let (id, address) = (id.trim(), address.trim());
    if id.is_empty() || address.is_empty() {
        return Err(format!("expected ID=ADDRESS, got '{value}'"));
    }
    Ok(DeviceEntry {
        id: id.to_string(),
        address: address.to_string(),
    })
}

fn log_update(update: &DeviceUpdate) {
    match update {
        DeviceUpdate::Changed { device_id, state } => info!(
            device = %device_id,
            connection = %state.connection_state(),
            hearts = state.live.current_hearts,
            ammo = state.live.current_ammo,
            "device updated"
        ),
        DeviceUpdate::Removed { device_id } => info!(device = %device_id, "device removed"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let mut config = HubConfig::load_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    cli.apply_to(&mut config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    let mode = config.transport_mode()?;
    let options = config.registry_options()?;
    if let TransportMode::Cloud { session_id } = &mode {
        bail!("cloud mode (session {session_id}) needs a relay client, which this binary does not provide");
    }

    let websocket = WebSocketConnector::new(config.transport.device_port, config.transport.ws_path.clone());
    let connector = Arc::new(RoutingConnector::direct_only(Arc::new(websocket)));
    let registry = Registry::new(connector, mode, options).context("failed to start registry")?;

    let mut updates = registry.subscribe();
    let watcher = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            log_update(&update);
        }
    });

    for device in &config.devices {
        registry
            .add_device(device.id.as_str(), device.address.as_str())
            .await
            .with_context(|| format!("failed to register device {}", device.id))?;
    }
    info!(
        devices = config.devices.len(),
        config = %config_path.display(),
        "lasertag hub running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C, shutting down");

    registry.shutdown().await;
    watcher.abort();
    info!("lasertag hub stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        // Arrange / Act
        let cli = Cli::parse_from(["lasertag-hub"]);

        // Assert
        assert_eq!(cli.config, PathBuf::from("lasertag-hub.toml"));
        assert_eq!(cli.mode, None);
        assert!(cli.devices.is_empty());
    }

    #[test]
    fn test_cli_mode_and_session_override() {
        let cli = Cli::parse_from(["lasertag-hub", "--mode", "cloud", "--session", "arena-7"]);
        assert_eq!(cli.mode, Some(ModeArg::Cloud));
        assert_eq!(cli.session.as_deref(), Some("arena-7"));
    }

    #[test]
    fn test_cli_repeated_and_delimited_devices() {
        let cli = Cli::parse_from([
            "lasertag-hub",
            "--device",
            "w1=192.168.4.21",
            "--device",
            "t2=192.168.4.22,t3=192.168.4.23:8080",
        ]);

        let ids: Vec<&str> = cli.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "t2", "t3"]);
        assert_eq!(cli.devices[2].address, "192.168.4.23:8080");
    }

    #[test]
    fn test_parse_device_rejects_missing_address() {
        assert!(parse_device("w1").is_err());
        assert!(parse_device("w1=").is_err());
        assert!(parse_device("=10.0.0.1").is_err());
    }

    #[test]
    fn test_apply_to_overrides_config() {
        // Arrange
        let mut config = HubConfig::default();
        config.devices.push(DeviceEntry {
            id: "w1".to_string(),
            address: "old".to_string(),
        });
        let cli = Cli::parse_from([
            "lasertag-hub",
            "--mode",
            "cloud",
            "--session",
            "arena-7",
            "--device",
            "w1=new",
        ]);

        // Act
        cli.apply_to(&mut config);

        // Assert
        assert_eq!(config.transport.mode, TransportKind::Cloud);
        assert_eq!(config.transport_mode().unwrap(), TransportMode::cloud("arena-7"));
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].address, "new");
    }
}
