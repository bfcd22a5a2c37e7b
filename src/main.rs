// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lwm2m_client::coap::{CoapClient, ExchangeId, RequestBootstrapMessage};
use lwm2m_client::config::Lwm2mVersion;
use lwm2m_client::dm::memory::{access_control_object, security_object, server_object};
use lwm2m_client::path::Iid;
use lwm2m_client::{
    Client, ClientBuilder, ClientConfig, Connection, DEFAULT_CONFIG_PATH, DataModel, ServerManager,
    Ssid, UriPath, Value, WriteEntry,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "lwm2m-client")]
#[command(author, version, about = "LwM2M client bootstrap and data model engine", long_about = None)]
struct Cli {
    /// Client configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a factory-provisioning file and print the resulting data model
    Provision {
        /// TOML file with [[entry]] tables of `path` and `value`
        file: PathBuf,
    },
}

/// Factory-provisioning file
#[derive(Debug, Deserialize)]
struct ProvisioningFile {
    #[serde(default, rename = "entry")]
    entries: Vec<ProvisioningEntry>,
}

#[derive(Debug, Deserialize)]
struct ProvisioningEntry {
    path: String,
    value: Value,
}

impl ProvisioningFile {
    fn load(path: &Path) -> Result<Vec<WriteEntry>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let file: Self = toml::from_str(&content)
            .with_context(|| format!("cannot parse {}", path.display()))?;
        file.entries
            .into_iter()
            .map(|entry| -> Result<WriteEntry> {
                let uri: UriPath = entry.path.parse()?;
                Ok(WriteEntry::new(uri, entry.value))
            })
            .collect()
    }
}

/// Server layer that only logs what it is asked to do
struct LoggingServers;

impl ServerManager for LoggingServers {
    fn find_active(&self, _ssid: Ssid) -> Option<Connection> {
        None
    }

    fn schedule_reload_servers(&mut self) -> lwm2m_client::Result<()> {
        info!("server reload requested");
        Ok(())
    }

    fn schedule_registration_update(&mut self, ssid: Ssid) -> lwm2m_client::Result<()> {
        info!(ssid, "registration update requested");
        Ok(())
    }

    fn schedule_socket_update(&mut self, security_iid: Iid) -> lwm2m_client::Result<()> {
        info!(security_iid, "socket update requested");
        Ok(())
    }

    fn schedule_disable_server(
        &mut self,
        ssid: Ssid,
        reenable_after: Option<Duration>,
    ) -> lwm2m_client::Result<()> {
        info!(ssid, ?reenable_after, "server disable requested");
        Ok(())
    }

    fn send_retry_deferred(&mut self, ssid: Option<Ssid>) -> lwm2m_client::Result<()> {
        debug!(?ssid, "deferred Send retry requested");
        Ok(())
    }

    fn enable_server(&mut self, ssid: Ssid) -> lwm2m_client::Result<()> {
        info!(ssid, "server enable requested");
        Ok(())
    }

    fn cleanup_inactive_nonbootstrap(&mut self) {}

    fn suspend_nonbootstrap(&mut self) {
        debug!("non-bootstrap servers suspended");
    }

    fn update_registration_version(&mut self, ssid: Ssid, version: Lwm2mVersion) {
        debug!(ssid, %version, "registration version updated");
    }

    fn on_communication_error(&mut self, ssid: Ssid, err: &lwm2m_client::Error) {
        warn!(ssid, %err, "communication error");
    }

    fn on_communication_timeout(&mut self, ssid: Ssid) {
        warn!(ssid, "communication timeout");
    }

    fn on_failure(&mut self, ssid: Ssid, reason: &str) {
        warn!(ssid, reason, "server failure");
    }
}

/// CoAP layer without a network
struct OfflineCoap;

impl CoapClient for OfflineCoap {
    fn send_async_request(
        &mut self,
        ssid: Ssid,
        _request: &RequestBootstrapMessage,
    ) -> lwm2m_client::Result<ExchangeId> {
        Err(lwm2m_client::Error::NetworkOther(format!(
            "no transport for server {}",
            ssid
        )))
    }

    fn cancel_exchange(&mut self, _ssid: Ssid, _id: ExchangeId) {}
}

fn build_client(config: ClientConfig) -> Result<Client> {
    let mut dm = DataModel::new();
    dm.register(Box::new(security_object()))?;
    dm.register(Box::new(server_object()))?;
    dm.register(Box::new(access_control_object()))?;
    Ok(ClientBuilder::new(config, Box::new(LoggingServers), Box::new(OfflineCoap))
        .with_data_model(dm)
        .build())
}

fn print_data_model(client: &Client) -> Result<()> {
    client.with_data_model(|dm| -> Result<()> {
        for oid in dm.registry().oids() {
            println!("/{}", oid);
            for entry in dm.read_tree(&UriPath::object(oid), true)? {
                println!("  {} = {}", entry.path, entry.value);
            }
        }
        Ok(())
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            ClientConfig::load(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => ClientConfig::default(),
    };

    match cli.command {
        Commands::Provision { file } => {
            info!("Provisioning from: {}", file.display());
            let entries = ProvisioningFile::load(&file)?;
            let client = build_client(config)?;
            client
                .bootstrap_write_composite(&entries)
                .context("provisioning write failed")?;
            client.bootstrap_finish().context("provisioning finish failed")?;
            client.run_pending();
            println!("Applied {} entries", entries.len());
            print_data_model(&client)?;
            client.cleanup();
            Ok(())
        }
    }
}
