mod cli;
mod config;
mod device_proxy;
mod enumerator;
mod error;
mod host_adb;
mod listener;
mod protocol;
mod scrcpy;
mod stream;

use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use config::ProxyConfig;
use host_adb::TcpServiceConnector;
use listener::ListenerSupervisor;
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let config = Arc::new(ProxyConfig::from(&cli));
    info!(
        "connecting to host ADB server at {}:{}",
        config.host_adb_host, config.host_adb_port
    );
    let connector = Arc::new(TcpServiceConnector::new(
        config.host_adb_host.clone(),
        config.host_adb_port,
    ));

    let supervisor = ListenerSupervisor::new(connector, config);
    supervisor.run().await?;
    Ok(())
}
