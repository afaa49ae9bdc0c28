//! Listener supervisor (spec §1, §4): binds one ADB impersonation port and
//! one scrcpy tunnel port per enumerated device, and hands off accepted
//! connections to [`DeviceProxy`] / [`ScrcpyTunnel`] respectively.

use crate::config::ProxyConfig;
use crate::device_proxy::DeviceProxy;
use crate::enumerator::enumerate_devices;
use crate::error::Result;
use crate::host_adb::ServiceConnector;
use crate::scrcpy::ScrcpyTunnel;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Owns the device list for one run and the per-device listener tasks
/// spawned from it. No supervision beyond logging a task's failure: a
/// crashed listener is not restarted (spec §1 non-goals: no retries).
pub struct ListenerSupervisor<C: ServiceConnector> {
    connector: Arc<C>,
    config: Arc<ProxyConfig>,
}

impl<C: ServiceConnector> ListenerSupervisor<C> {
    pub fn new(connector: Arc<C>, config: Arc<ProxyConfig>) -> Self {
        Self { connector, config }
    }

    /// Enumerates devices once, binds every listener, and waits forever
    /// (or until every listener task has exited, which only happens on a
    /// bind/accept error).
    pub async fn run(&self) -> Result<()> {
        let devices = enumerate_devices(&*self.connector).await?;
        if devices.is_empty() {
            warn!("no devices reported by host ADB server");
            return Ok(());
        }

        let mut tasks = Vec::new();
        for (idx, device_id) in devices.into_iter().enumerate() {
            let adb_port = self.config.adb_base_port + idx as u16;
            let scrcpy_port = self.config.scrcpy_base_port + idx as u16;
            info!(
                "device {}: binding ADB port {} and scrcpy port {}",
                device_id, adb_port, scrcpy_port
            );

            let connector = Arc::clone(&self.connector);
            let config = Arc::clone(&self.config);
            let adb_device_id = device_id.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = Self::serve_adb(connector, config, adb_device_id, adb_port).await {
                    error!("ADB listener for port {} exited: {}", adb_port, e);
                }
            }));

            let connector = Arc::clone(&self.connector);
            let scrcpy_device_id = device_id.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = Self::serve_scrcpy(connector, scrcpy_device_id, scrcpy_port).await
                {
                    error!("scrcpy listener for port {} exited: {}", scrcpy_port, e);
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    async fn serve_adb(
        connector: Arc<C>,
        config: Arc<ProxyConfig>,
        device_id: String,
        port: u16,
    ) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        loop {
            let (socket, addr) = listener.accept().await?;
            info!("device {}: peer connected from {}", device_id, addr);

            let proxy = DeviceProxy::new(Arc::clone(&connector), device_id.clone(), Arc::clone(&config));
            tokio::spawn(async move {
                if let Err(e) = proxy.run(socket).await {
                    warn!("device proxy session ended: {}", e);
                }
            });
        }
    }

    async fn serve_scrcpy(connector: Arc<C>, device_id: String, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let tunnel = Arc::new(ScrcpyTunnel::new(connector, device_id.clone()));
        loop {
            let (socket, addr) = listener.accept().await?;
            info!("device {}: scrcpy client connected from {}", device_id, addr);

            let tunnel = Arc::clone(&tunnel);
            tokio::spawn(async move {
                if let Err(e) = tunnel.handle_connection(socket).await {
                    warn!("scrcpy tunnel session ended: {}", e);
                }
            });
        }
    }
}
