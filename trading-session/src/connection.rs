//! One live socket: framed sends plus the shared receive loop.

use crate::error::SessionError;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use trading_protocol::{codec, Message};

/// Why a receive loop ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed the connection in an orderly way.
    Remote,
    /// A fatal socket read error.
    ReadError(io::Error),
    /// The stream could no longer be framed (incompatible peer).
    Desync(SessionError),
    /// The local side asked the loop to stop.
    Shutdown,
}

/// Consumer of decoded frames; implemented by the client and server session
/// managers.
#[async_trait]
pub(crate) trait MessageSink: Send + Sync {
    async fn on_message(&self, message: Message);
}

/// The sending half of one connection.
///
/// The write half lives behind an async mutex so any task can send; the
/// receive loop owns the read half exclusively.
pub struct Connection {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    active: AtomicBool,
}

impl Connection {
    /// Splits a connected stream into the shared send half and the read half
    /// handed to [`receive_loop`].
    pub fn split(stream: TcpStream) -> io::Result<(Arc<Self>, OwnedReadHalf)> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Self {
            peer,
            writer: Mutex::new(writer),
            active: AtomicBool::new(true),
        });
        Ok((connection, reader))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Encodes and writes one full frame.
    ///
    /// A failed or short write marks the connection closed; there is no
    /// partial-frame retry.
    pub async fn send(&self, message: &Message) -> Result<usize, SessionError> {
        if !self.is_active() {
            return Err(SessionError::Closed);
        }
        let frame = codec::encode(message)?;
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.write_all(&frame).await {
            log::debug!("write to {} failed: {}", self.peer, error);
            self.active.store(false, Ordering::SeqCst);
            return Err(SessionError::Closed);
        }
        Ok(frame.len())
    }

    /// Marks the connection inactive and shuts the socket down.
    pub async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Reads frames until the socket closes, a fatal error occurs, or shutdown
/// is signalled, dispatching each decoded message to `sink`.
///
/// A decode failure for a single frame (bad checksum, size, enum value) is
/// logged and skipped; the loop keeps serving the connection. A version
/// mismatch or an out-of-bounds declared size means the byte stream can no
/// longer be framed, which closes the connection instead.
pub(crate) async fn receive_loop<S: MessageSink>(
    mut reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
    peer: SocketAddr,
    sink: &S,
) -> CloseReason {
    let mut header = [0u8; codec::HEADER_LEN];
    loop {
        tokio::select! {
            result = reader.read_exact(&mut header) => match result {
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                    return CloseReason::Remote;
                }
                Err(error) => return CloseReason::ReadError(error),
            },
            _ = shutdown.changed() => return CloseReason::Shutdown,
        }

        let declared = codec::declared_size(&header);
        if declared < codec::HEADER_LEN || declared > codec::MAX_MESSAGE_SIZE {
            log::error!("unframeable message of {declared} bytes from {peer}, closing");
            return CloseReason::Desync(SessionError::Codec(codec::CodecError::FrameTooLarge {
                size: declared,
                max: codec::MAX_MESSAGE_SIZE,
            }));
        }

        let mut frame = vec![0u8; declared];
        frame[..codec::HEADER_LEN].copy_from_slice(&header);
        if declared > codec::HEADER_LEN {
            tokio::select! {
                result = reader.read_exact(&mut frame[codec::HEADER_LEN..]) => match result {
                    Ok(_) => {}
                    Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                        return CloseReason::Remote;
                    }
                    Err(error) => return CloseReason::ReadError(error),
                },
                _ = shutdown.changed() => return CloseReason::Shutdown,
            }
        }

        match codec::decode(&frame) {
            Ok((message, _)) => sink.on_message(message).await,
            Err(error @ codec::CodecError::InvalidVersion { .. }) => {
                log::error!("incompatible peer {peer}: {error}");
                return CloseReason::Desync(SessionError::Codec(error));
            }
            Err(error) => {
                log::warn!("discarding corrupt frame from {peer}: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    struct Counter(AtomicUsize);

    #[async_trait]
    impl MessageSink for Counter {
        async fn on_message(&self, _message: Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn corrupt_frame_does_not_end_the_loop() {
        let (mut client, server) = stream_pair().await;
        let peer = server.peer_addr().unwrap();
        let (_connection, reader) = Connection::split(server).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let sink = Arc::new(Counter(AtomicUsize::new(0)));

        let loop_sink = sink.clone();
        let task = tokio::spawn(async move {
            receive_loop(reader, shutdown_rx, peer, loop_sink.as_ref()).await
        });

        // One corrupted frame, then a valid one.
        let mut bad = codec::encode(&Message::heartbeat()).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        client.write_all(&bad).await.unwrap();
        client
            .write_all(&codec::encode(&Message::heartbeat()).unwrap())
            .await
            .unwrap();
        drop(client);

        let reason = task.await.unwrap();
        assert!(matches!(reason, CloseReason::Remote));
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_signal_unblocks_a_parked_read() {
        let (_client, server) = stream_pair().await;
        let peer = server.peer_addr().unwrap();
        let (_connection, reader) = Connection::split(server).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sink = Counter(AtomicUsize::new(0));

        let task = tokio::spawn(async move {
            receive_loop(reader, shutdown_rx, peer, &sink).await
        });

        shutdown_tx.send(true).unwrap();
        let reason = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("receive loop must exit on shutdown")
            .unwrap();
        assert!(matches!(reason, CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (_client, server) = stream_pair().await;
        let (connection, _reader) = Connection::split(server).unwrap();
        connection.close().await;
        assert!(matches!(
            connection.send(&Message::heartbeat()).await,
            Err(SessionError::Closed)
        ));
    }
}
