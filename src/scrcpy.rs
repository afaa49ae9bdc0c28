//! Raw tunnel to `scrcpy`'s on-device abstract socket (spec §1, §4).
//!
//! Unlike ADB streams, a scrcpy connection is not multiplexed through a
//! device proxy: each inbound TCP connection on the scrcpy port gets its
//! own host-ADB service connection to `localabstract:scrcpy`, spliced
//! together with [`tokio::io::copy_bidirectional`]. The on-device server
//! process is started lazily, once per device, the first time anything
//! connects (grounded on the reference's `ScrcpyTcpProxy`).

use crate::error::Result;
use crate::host_adb::ServiceConnector;
use log::{debug, warn};
use std::sync::Arc;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};

/// Launch command for the bundled scrcpy server jar. Version and flags
/// match the reference proxy: forward tunnel (we dial out to the device,
/// not the other way around), informational logging.
const SCRCPY_SERVER_COMMAND: &str = "shell:CLASSPATH=/data/local/tmp/scrcpy-server.jar app_process / com.genymobile.scrcpy.Server 3.3.1 tunnel_forward=true log_level=info";

const SCRCPY_SERVER_STARTUP_DELAY: Duration = Duration::from_secs(2);
const KEEP_ALIVE_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-device scrcpy tunnel state: just enough to avoid starting the
/// on-device server process more than once while it's alive.
pub struct ScrcpyTunnel<C: ServiceConnector> {
    connector: Arc<C>,
    device_id: String,
    started: Arc<Mutex<bool>>,
}

impl<C: ServiceConnector> ScrcpyTunnel<C> {
    pub fn new(connector: Arc<C>, device_id: String) -> Self {
        Self {
            connector,
            device_id,
            started: Arc::new(Mutex::new(false)),
        }
    }

    /// Starts the on-device scrcpy server the first time it's called; a
    /// no-op afterwards, until the keep-alive task observes the launch
    /// shell exit and clears the flag so the next connection restarts it.
    /// The launching shell connection is kept alive by a background task
    /// that drains its output so the process is never killed by the host
    /// ADB server for lack of a reader.
    async fn ensure_server_running(&self) -> Result<()> {
        let mut started = self.started.lock().await;
        if *started {
            return Ok(());
        }

        debug!("device {}: starting scrcpy server", self.device_id);
        let shell = self
            .connector
            .open_service(&self.device_id, SCRCPY_SERVER_COMMAND)
            .await?;
        *started = true;
        drop(started);

        sleep(SCRCPY_SERVER_STARTUP_DELAY).await;
        tokio::spawn(keep_alive(shell, self.device_id.clone(), Arc::clone(&self.started)));
        Ok(())
    }

    /// Services one inbound scrcpy TCP connection: ensures the on-device
    /// server is running, opens `localabstract:scrcpy`, then splices the
    /// two connections until either side closes.
    pub async fn handle_connection<T>(&self, mut inbound: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.ensure_server_running().await?;

        let mut outbound = self
            .connector
            .open_service(&self.device_id, "localabstract:scrcpy")
            .await?;

        copy_bidirectional(&mut inbound, &mut outbound).await?;
        Ok(())
    }
}

/// Drains the scrcpy launch shell's output in the background so the
/// on-device process keeps running. A short read timeout, rather than a
/// blocking read, lets the loop notice the process exiting (`Ok(0)`)
/// without needing a separate shutdown signal. On exit, clears `started`
/// so the next inbound connection relaunches the server.
async fn keep_alive<S>(mut stream: S, device_id: String, started: Arc<Mutex<bool>>)
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match timeout(KEEP_ALIVE_READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                debug!("device {}: scrcpy server process exited", device_id);
                break;
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => {
                warn!("device {}: scrcpy keep-alive read error: {}", device_id, e);
                break;
            }
            Err(_) => continue,
        }
    }
    *started.lock().await = false;
}
