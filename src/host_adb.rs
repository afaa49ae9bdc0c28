//! Client for the host ADB server's line/length-prefixed service protocol.
//!
//! Two operations: opening a raw pass-through connection to a device
//! service (`open_service`), and a one-shot device list query
//! (`list_devices`). Both speak the same length-prefixed ASCII request /
//! `OKAY`|`FAIL` response framing described in spec §6.

use crate::error::{AdbProxyError, Result, ServicePhase};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Abstraction over "connect to the host ADB server and get a raw byte
/// stream for a service". Production code uses [`TcpServiceConnector`];
/// tests substitute an in-memory double (see `crate::testing`), the same
/// way `aim`'s `AdbOperations` trait lets `DeviceManager` logic run against
/// a `MockAdb`.
#[async_trait]
pub trait ServiceConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Performs `host:transport:<device_id>` then `service`, returning the
    /// connection in raw pass-through mode after both are acknowledged.
    async fn open_service(&self, device_id: &str, service: &str) -> Result<Self::Stream>;

    /// `host:devices`: identifiers of every line ending in `"\tdevice"`.
    async fn list_devices(&self) -> Result<Vec<String>>;
}

/// Real connector: opens a fresh TCP connection to the host ADB server for
/// every call, mirroring the reference's `asyncio.open_connection` per
/// request (no connection reuse — see spec §1 non-goals: no persistence).
pub struct TcpServiceConnector {
    host: String,
    port: u16,
}

impl TcpServiceConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = format!(
            "{}:{}",
            if self.host == "localhost" {
                "127.0.0.1"
            } else {
                &self.host
            },
            self.port
        );
        Ok(TcpStream::connect(addr).await?)
    }

    async fn send_request<W>(stream: &mut W, request: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let header = format!("{:04x}", request.len());
        stream.write_all(header.as_bytes()).await?;
        stream.write_all(request.as_bytes()).await?;
        Ok(())
    }

    async fn read_status<R>(stream: &mut R, phase: ServicePhase) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut status = [0u8; 4];
        stream.read_exact(&mut status).await?;

        if &status == b"OKAY" {
            return Ok(());
        }

        if &status == b"FAIL" {
            let message = Self::read_length_prefixed(stream).await?;
            return Err(AdbProxyError::Service { phase, message });
        }

        Err(AdbProxyError::Service {
            phase,
            message: format!("unexpected status {:?}", status),
        })
    }

    async fn read_length_prefixed<R>(stream: &mut R) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_str_radix(std::str::from_utf8(&len_buf).unwrap_or(""), 16).map_err(
            |e| AdbProxyError::Service {
                phase: ServicePhase::Service,
                message: format!("invalid length prefix: {}", e),
            },
        )?;

        let mut data = vec![0u8; len as usize];
        stream.read_exact(&mut data).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

#[async_trait]
impl ServiceConnector for TcpServiceConnector {
    type Stream = TcpStream;

    async fn open_service(&self, device_id: &str, service: &str) -> Result<TcpStream> {
        let mut stream = self.connect().await?;

        let transport = format!("host:transport:{}", device_id);
        for (phase, request) in [
            (ServicePhase::Transport, transport.as_str()),
            (ServicePhase::Service, service),
        ] {
            Self::send_request(&mut stream, request).await?;
            Self::read_status(&mut stream, phase).await?;
        }

        Ok(stream)
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        let mut stream = self.connect().await?;
        Self::send_request(&mut stream, "host:devices").await?;
        Self::read_status(&mut stream, ServicePhase::Service).await?;

        let data = Self::read_length_prefixed(&mut stream).await?;
        Ok(data
            .lines()
            .filter_map(|line| line.strip_suffix("\tdevice").map(str::to_string))
            .collect())
    }
}
