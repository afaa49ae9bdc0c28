//! Tests for per-stream flow control and teardown

#[cfg(test)]
mod tests {
    use crate::config::ShellEofMode;
    use crate::protocol::{self, command};
    use crate::stream::Stream;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::sync::{mpsc, Mutex};

    #[tokio::test]
    async fn accept_write_forwards_to_outbound_and_acks_peer() {
        let (outbound_ours, mut outbound_theirs) = duplex(4096);
        let (peer_ours, mut peer_theirs) = duplex(4096);
        let peer_writer = Arc::new(Mutex::new(peer_ours));
        let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

        let stream = Stream::spawn(
            "shell:".to_string(),
            1,
            5,
            outbound_ours,
            peer_writer,
            4096,
            ShellEofMode::Poll,
            closed_tx,
        );

        stream.accept_write(Bytes::from_static(b"ls\n")).await.unwrap();

        let mut buf = [0u8; 3];
        outbound_theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls\n");

        let okay = protocol::decode(&mut peer_theirs).await.unwrap();
        assert_eq!(okay.command, command::OKAY);
        assert_eq!(okay.arg0, 5);
        assert_eq!(okay.arg1, 1);
    }

    #[tokio::test]
    async fn pump_forwards_outbound_reads_as_wrte_and_respects_credit() {
        let (outbound_ours, mut outbound_theirs) = duplex(4096);
        let (peer_ours, mut peer_theirs) = duplex(4096);
        let peer_writer = Arc::new(Mutex::new(peer_ours));
        let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

        let stream = Stream::spawn(
            "shell:".to_string(),
            2,
            9,
            outbound_ours,
            peer_writer,
            4096,
            ShellEofMode::Close,
            closed_tx,
        );

        outbound_theirs.write_all(b"output").await.unwrap();
        let wrte = protocol::decode(&mut peer_theirs).await.unwrap();
        assert_eq!(wrte.command, command::WRTE);
        assert_eq!(wrte.arg0, 9);
        assert_eq!(wrte.arg1, 2);
        assert_eq!(&wrte.payload[..], b"output");

        // Starter credit is spent; nothing more is read until an OKAY
        // grants another unit.
        outbound_theirs.write_all(b"more").await.unwrap();
        stream.grant_credit();

        let wrte2 = protocol::decode(&mut peer_theirs).await.unwrap();
        assert_eq!(&wrte2.payload[..], b"more");
    }

    #[tokio::test]
    async fn close_sends_clse_once() {
        let (outbound_ours, _outbound_theirs) = duplex(4096);
        let (peer_ours, mut peer_theirs) = duplex(4096);
        let peer_writer = Arc::new(Mutex::new(peer_ours));
        let (closed_tx, _closed_rx) = mpsc::unbounded_channel();

        let stream = Stream::spawn(
            "shell:".to_string(),
            3,
            4,
            outbound_ours,
            peer_writer,
            4096,
            ShellEofMode::Close,
            closed_tx,
        );

        stream.close().await;
        assert!(stream.is_closed());

        let clse = protocol::decode(&mut peer_theirs).await.unwrap();
        assert_eq!(clse.command, command::CLSE);
        assert_eq!(clse.arg0, 4);
        assert_eq!(clse.arg1, 3);

        // Idempotent: a second close must not emit a second CLSE.
        stream.close().await;
    }

    #[tokio::test]
    async fn outbound_eof_closes_the_stream_in_close_mode() {
        let (outbound_ours, outbound_theirs) = duplex(4096);
        let (peer_ours, mut peer_theirs) = duplex(4096);
        let peer_writer = Arc::new(Mutex::new(peer_ours));
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

        let stream = Stream::spawn(
            "shell:".to_string(),
            6,
            7,
            outbound_ours,
            peer_writer,
            4096,
            ShellEofMode::Close,
            closed_tx,
        );

        drop(outbound_theirs);

        let clse = protocol::decode(&mut peer_theirs).await.unwrap();
        assert_eq!(clse.command, command::CLSE);
        assert!(stream.is_closed());
        assert_eq!(closed_rx.recv().await, Some(7));
    }
}
