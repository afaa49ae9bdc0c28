//! One multiplexed logical stream: an outbound service connection paired
//! with the shared peer link it reports back to.

use crate::config::ShellEofMode;
use crate::error::Result;
use crate::protocol::{self, command, Message};
use bytes::Bytes;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

const SHELL_SERVICE_PREFIX: &str = "shell:";
const SHELL_EOF_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The peer link's write half, shared by the dispatch task and every
/// stream's pump task. Held for the duration of one header+payload write
/// so frames from different tasks never interleave (spec §5, §9).
pub type PeerWriter<W> = Arc<Mutex<W>>;

/// Owns one outbound service connection, a pair of stream identifiers, and
/// the credit gate that enforces at-most-one-`WRTE`-in-flight.
pub struct Stream<S, W> {
    pub name: String,
    pub local_id: u32,
    pub remote_id: u32,
    closed: Arc<AtomicBool>,
    credit: Arc<Semaphore>,
    write_half: Arc<Mutex<WriteHalf<S>>>,
    peer_writer: PeerWriter<W>,
    pump: JoinHandle<()>,
}

fn is_shell_service(name: &str) -> bool {
    name.starts_with(SHELL_SERVICE_PREFIX)
}

impl<S, W> Stream<S, W>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates the stream and starts its read-side pump task. One starter
    /// credit unit is implicit in `Semaphore::new(1)` so the first read can
    /// proceed before any peer `OKAY`.
    /// `closed_tx` is notified with this stream's `remote_id` when the pump
    /// task exits on its own (outbound EOF or I/O error) — the signal a
    /// device proxy's dispatch loop needs to prune its stream table, since
    /// a stream closing an inbound `CLSE` instead is already pruned
    /// synchronously by the caller handling that frame.
    pub fn spawn(
        name: String,
        local_id: u32,
        remote_id: u32,
        outbound: S,
        peer_writer: PeerWriter<W>,
        max_payload: u32,
        shell_eof_mode: ShellEofMode,
        closed_tx: mpsc::UnboundedSender<u32>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(outbound);
        let write_half = Arc::new(Mutex::new(write_half));
        let closed = Arc::new(AtomicBool::new(false));
        let credit = Arc::new(Semaphore::new(1));

        let pump = tokio::spawn(pump_loop(
            name.clone(),
            local_id,
            remote_id,
            read_half,
            Arc::clone(&write_half),
            peer_writer.clone(),
            Arc::clone(&closed),
            Arc::clone(&credit),
            max_payload,
            shell_eof_mode,
            closed_tx,
        ));

        Self {
            name,
            local_id,
            remote_id,
            closed,
            credit,
            write_half,
            peer_writer,
            pump,
        }
    }

    /// Peer -> device. Writes `data` to the outbound service, then grants
    /// one credit unit back to the peer via `OKAY`. Any I/O failure closes
    /// the stream.
    pub async fn accept_write(&self, data: Bytes) -> Result<()> {
        let write_result: Result<()> = async {
            let mut write_half = self.write_half.lock().await;
            write_half.write_all(&data).await?;
            write_half.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = write_result {
            warn!(
                "stream {} ({}): write to outbound service failed: {}",
                self.remote_id, self.name, e
            );
            self.close().await;
            return Err(e);
        }

        let okay = Message::new(command::OKAY, self.remote_id, self.local_id, Bytes::new());
        let mut writer = self.peer_writer.lock().await;
        protocol::write_message(&mut *writer, &okay).await
    }

    /// Releases one unit of send permission, as granted by a peer `OKAY`.
    pub fn grant_credit(&self) {
        self.credit.add_permits(1);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent. Releases any blocked pumper, cancels the pump task,
    /// closes the outbound connection, and emits `CLSE`.
    pub async fn close(&self) {
        if !close_sequence(
            self.remote_id,
            self.local_id,
            &self.name,
            &self.closed,
            &self.credit,
            &self.write_half,
            &self.peer_writer,
        )
        .await
        {
            return;
        }
        self.pump.abort();
    }
}

/// Shared by `Stream::close` (external close, e.g. inbound `CLSE`) and the
/// pump task's own natural exit (EOF/error). Returns `false` if another
/// caller already closed the stream.
#[allow(clippy::too_many_arguments)]
async fn close_sequence<S, W>(
    remote_id: u32,
    local_id: u32,
    name: &str,
    closed: &AtomicBool,
    credit: &Semaphore,
    write_half: &Mutex<WriteHalf<S>>,
    peer_writer: &PeerWriter<W>,
) -> bool
where
    S: AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    if closed.swap(true, Ordering::SeqCst) {
        return false;
    }

    // Unblocks a pumper parked on `credit.acquire()`.
    credit.add_permits(1);

    {
        let mut write_half = write_half.lock().await;
        if let Err(e) = write_half.shutdown().await {
            debug!("stream {} ({}): outbound shutdown error: {}", remote_id, name, e);
        }
    }

    let clse = Message::new(command::CLSE, remote_id, local_id, Bytes::new());
    let mut writer = peer_writer.lock().await;
    if let Err(e) = protocol::write_message(&mut *writer, &clse).await {
        debug!("stream {} ({}): failed to send CLSE: {}", remote_id, name, e);
    }

    true
}

#[allow(clippy::too_many_arguments)]
async fn pump_loop<S, W>(
    name: String,
    local_id: u32,
    remote_id: u32,
    mut read_half: ReadHalf<S>,
    write_half: Arc<Mutex<WriteHalf<S>>>,
    peer_writer: PeerWriter<W>,
    closed: Arc<AtomicBool>,
    credit: Arc<Semaphore>,
    max_payload: u32,
    shell_eof_mode: ShellEofMode,
    closed_tx: mpsc::UnboundedSender<u32>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; max_payload as usize];

    loop {
        // `forget()`: a credit unit is spent, not auto-returned on drop —
        // only an explicit peer `OKAY` (`grant_credit`) replenishes it.
        let permit = match credit.acquire().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        permit.forget();

        if closed.load(Ordering::SeqCst) {
            break;
        }

        match read_half.read(&mut buf).await {
            Ok(0) => {
                if is_shell_service(&name) && shell_eof_mode == ShellEofMode::Poll {
                    trace!("stream {} ({}): shell EOF, polling", remote_id, name);
                    credit.add_permits(1);
                    sleep(SHELL_EOF_POLL_INTERVAL).await;
                    continue;
                }
                debug!("stream {} ({}): outbound EOF", remote_id, name);
                break;
            }
            Ok(n) => {
                let wrte = Message::new(
                    command::WRTE,
                    remote_id,
                    local_id,
                    Bytes::copy_from_slice(&buf[..n]),
                );
                let mut writer = peer_writer.lock().await;
                if let Err(e) = protocol::write_message(&mut *writer, &wrte).await {
                    debug!("stream {} ({}): peer write error: {}", remote_id, name, e);
                    drop(writer);
                    break;
                }
            }
            Err(e) => {
                debug!("stream {} ({}): outbound read error: {}", remote_id, name, e);
                break;
            }
        }
    }

    close_sequence(
        remote_id,
        local_id,
        &name,
        &closed,
        &credit,
        &write_half,
        &peer_writer,
    )
    .await;

    let _ = closed_tx.send(remote_id);
}
