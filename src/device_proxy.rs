//! Per-connection device impersonation: the `CNXN` handshake followed by
//! the `OPEN`/`WRTE`/`OKAY`/`CLSE` dispatch loop described in spec §4.
//!
//! One [`DeviceProxy`] instance serves exactly one inbound peer connection.
//! It owns the table mapping our allocated `remote_id`s to the
//! [`Stream`]s backing them; the table only ever gets touched from the
//! dispatch loop itself, so no locking is needed around it.

use crate::config::ProxyConfig;
use crate::error::{AdbProxyError, ProtocolErrorKind, Result};
use crate::host_adb::ServiceConnector;
use crate::protocol::{self, command, Message, MAX_PAYLOAD, PROTOCOL_VERSION};
use crate::stream::{PeerWriter, Stream};
use bytes::Bytes;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};

/// One impersonated device, multiplexing logical streams from a single
/// peer connection onto per-stream connections to the host ADB server.
pub struct DeviceProxy<C: ServiceConnector> {
    connector: Arc<C>,
    device_id: String,
    config: Arc<ProxyConfig>,
    next_remote_id: AtomicU32,
}

impl<C: ServiceConnector> DeviceProxy<C> {
    pub fn new(connector: Arc<C>, device_id: String, config: Arc<ProxyConfig>) -> Self {
        Self {
            connector,
            device_id,
            config,
            next_remote_id: AtomicU32::new(1),
        }
    }

    fn allocate_remote_id(&self) -> u32 {
        self.next_remote_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Drives one peer connection to completion: handshake, then dispatch
    /// until the peer disconnects. Tears down every open stream on exit.
    pub async fn run<P>(&self, peer: P) -> Result<()>
    where
        P: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut peer_read, peer_write) = split(peer);
        let peer_writer: PeerWriter<WriteHalf<P>> = Arc::new(Mutex::new(peer_write));

        self.handshake(&mut peer_read, &peer_writer).await?;

        let mut streams: HashMap<u32, Stream<C::Stream, WriteHalf<P>>> = HashMap::new();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let result = self
            .dispatch_loop(&mut peer_read, &peer_writer, &mut streams, &closed_tx, &mut closed_rx)
            .await;

        for (_, stream) in streams.drain() {
            stream.close().await;
        }

        result
    }

    /// Reads the peer's opening `CNXN` and replies with our own. Any other
    /// first frame is a protocol error (spec §4, §7: `ExpectedCnxn`).
    async fn handshake<R, W>(&self, peer_read: &mut R, peer_writer: &PeerWriter<W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let msg = protocol::decode(peer_read).await?;
        if msg.command != command::CNXN {
            return Err(AdbProxyError::Protocol {
                kind: ProtocolErrorKind::ExpectedCnxn,
            });
        }

        debug!(
            "device {}: peer CNXN version=0x{:08x} max_payload={} (ignored, see design notes)",
            self.device_id, msg.arg0, msg.arg1
        );

        let reply = Message::new(
            command::CNXN,
            PROTOCOL_VERSION,
            MAX_PAYLOAD,
            Bytes::from(format!("device::proxy_{}\0", self.device_id)),
        );
        let mut writer = peer_writer.lock().await;
        protocol::write_message(&mut *writer, &reply).await?;
        drop(writer);

        info!("device {}: handshake complete", self.device_id);
        Ok(())
    }

    async fn dispatch_loop<R, W>(
        &self,
        peer_read: &mut R,
        peer_writer: &PeerWriter<W>,
        streams: &mut HashMap<u32, Stream<C::Stream, W>>,
        closed_tx: &mpsc::UnboundedSender<u32>,
        closed_rx: &mut mpsc::UnboundedReceiver<u32>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        // `protocol::decode`'s `read_exact` calls are not cancellation-safe:
        // a fresh `protocol::decode(peer_read)` recreated on every `select!`
        // iteration would silently drop whatever header/payload bytes a
        // partially-completed read had already consumed the moment a
        // `closed_rx` event won the race, desyncing the peer stream for
        // every frame after. Pinning one decode future across iterations and
        // only replacing it once it actually resolves means a `closed_rx`
        // event can never cancel a read that's partway through a frame.
        let mut decode_fut: Pin<Box<dyn Future<Output = Result<Message>> + Send + '_>> =
            Box::pin(protocol::decode(peer_read));

        loop {
            tokio::select! {
                decoded = &mut decode_fut => {
                    decode_fut = Box::pin(protocol::decode(peer_read));

                    let msg = match decoded {
                        Ok(msg) => msg,
                        Err(AdbProxyError::Io(e))
                            if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                        {
                            debug!("device {}: peer disconnected", self.device_id);
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    };

                    if self.config.verify_crc && !msg.verify_crc() {
                        warn!(
                            "device {}: payload CRC mismatch on {}, dropping connection",
                            self.device_id, msg.command_str()
                        );
                        return Err(AdbProxyError::Protocol {
                            kind: ProtocolErrorKind::Framing,
                        });
                    }

                    match msg.command {
                        command::OPEN => self.handle_open(msg, peer_writer, streams, closed_tx).await,
                        command::WRTE => self.handle_wrte(msg, streams).await,
                        command::OKAY => self.handle_okay(msg, streams),
                        command::CLSE => self.handle_clse(msg, peer_writer, streams).await,
                        _ => {
                            warn!(
                                "device {}: ignoring unrecognized command {}",
                                self.device_id, msg.command_str()
                            );
                        }
                    }
                }
                Some(remote_id) = closed_rx.recv() => {
                    if streams.remove(&remote_id).is_some() {
                        debug!(
                            "device {}: stream {} pruned after self-close",
                            self.device_id, remote_id
                        );
                    }
                }
            }
        }
    }

    /// `local_id` is the peer's identifier for the new stream; `service`
    /// names the host-ADB service to open behind it (e.g. `shell:`,
    /// `localabstract:scrcpy`). On failure to open, replies `CLSE(local_id,
    /// 0)`: we never got far enough to allocate a remote id of our own.
    async fn handle_open<W>(
        &self,
        msg: Message,
        peer_writer: &PeerWriter<W>,
        streams: &mut HashMap<u32, Stream<C::Stream, W>>,
        closed_tx: &mpsc::UnboundedSender<u32>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let local_id = msg.arg0;
        let service = match parse_service_name(&msg.payload) {
            Ok(service) => service,
            Err(e) => {
                warn!("device {}: malformed OPEN payload: {}", self.device_id, e);
                Self::send_clse_reject(local_id, peer_writer).await;
                return;
            }
        };

        match self.connector.open_service(&self.device_id, &service).await {
            Ok(outbound) => {
                let remote_id = self.allocate_remote_id();
                info!(
                    "device {}: stream {} ({}) open for local {}",
                    self.device_id, remote_id, service, local_id
                );

                let stream = Stream::spawn(
                    service,
                    local_id,
                    remote_id,
                    outbound,
                    Arc::clone(peer_writer),
                    MAX_PAYLOAD,
                    self.config.shell_eof_mode,
                    closed_tx.clone(),
                );

                let okay = Message::new(command::OKAY, remote_id, local_id, Bytes::new());
                let mut writer = peer_writer.lock().await;
                if let Err(e) = protocol::write_message(&mut *writer, &okay).await {
                    debug!("device {}: failed to ack OPEN: {}", self.device_id, e);
                    drop(writer);
                    stream.close().await;
                    return;
                }
                drop(writer);

                streams.insert(remote_id, stream);
            }
            Err(e) => {
                warn!(
                    "device {}: service {:?} unavailable: {}",
                    self.device_id, service, e
                );
                Self::send_clse_reject(local_id, peer_writer).await;
            }
        }
    }

    /// `CLSE(local_id, 0)`: the peer's id in the first slot, zero in the
    /// second, since we never allocated a remote id of our own (spec'd
    /// bit-exactly to match ADB's own rejection convention).
    async fn send_clse_reject<W>(local_id: u32, peer_writer: &PeerWriter<W>)
    where
        W: AsyncWrite + Unpin,
    {
        let clse = Message::new(command::CLSE, local_id, 0, Bytes::new());
        let mut writer = peer_writer.lock().await;
        let _ = protocol::write_message(&mut *writer, &clse).await;
    }

    async fn handle_wrte<W>(&self, msg: Message, streams: &HashMap<u32, Stream<C::Stream, W>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let remote_id = msg.arg1;
        match streams.get(&remote_id) {
            Some(stream) => {
                if let Err(e) = stream.accept_write(msg.payload).await {
                    debug!(
                        "device {}: stream {}: write forwarding failed: {}",
                        self.device_id, remote_id, e
                    );
                }
            }
            None => warn!(
                "device {}: WRTE for unknown stream {}",
                self.device_id, remote_id
            ),
        }
    }

    fn handle_okay<W>(&self, msg: Message, streams: &HashMap<u32, Stream<C::Stream, W>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let remote_id = msg.arg1;
        match streams.get(&remote_id) {
            Some(stream) => stream.grant_credit(),
            None => warn!(
                "device {}: OKAY for unknown stream {}",
                self.device_id, remote_id
            ),
        }
    }

    async fn handle_clse<W>(
        &self,
        msg: Message,
        peer_writer: &PeerWriter<W>,
        streams: &mut HashMap<u32, Stream<C::Stream, W>>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let remote_id = msg.arg1;
        match streams.remove(&remote_id) {
            Some(stream) => {
                debug!("device {}: stream {} closed by peer", self.device_id, remote_id);
                stream.close().await;
            }
            None => Self::send_clse_reject(msg.arg0, peer_writer).await,
        }
    }
}

fn parse_service_name(payload: &Bytes) -> Result<String> {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    std::str::from_utf8(&payload[..end])
        .map(str::to_string)
        .map_err(|_| AdbProxyError::Protocol {
            kind: ProtocolErrorKind::Framing,
        })
}
