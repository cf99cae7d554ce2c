//! TCP listener
//!
//! Owns the accept loop and, per connection, one read loop and one writer
//! task. Game semantics are supplied through [`ConnectionHooks`]:
//! - `accepted`: build the connection and start the key exchange
//! - `exchanged`: complete the key exchange with the first frame
//! - `received`: hand each later frame off without blocking the read loop
//! - `disconnected`: called exactly once per connection
//!
//! Frames are `u16 length` prefixed (the length covers the whole frame) and
//! followed by a fixed-length footer. Partial frames are buffered across
//! reads and several frames in one read are split out in order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::buffer::{HEADER_SIZE, MAX_FRAME_SIZE};
use super::connection::{Connection, ConnectionId, ConnectionState, Outbound, PendingConnection};
use crate::crypto::CipherStream;
use crate::error::{HandshakeError, ProtocolError, Result, ServerError, TransportError};

/// Callbacks through which the listener drives the game layer
#[async_trait]
pub trait ConnectionHooks: Send + Sync + 'static {
    /// Build the connection for an accepted socket; an error closes the socket
    async fn accepted(&self, pending: PendingConnection) -> Result<Arc<Connection>>;

    /// Complete the key exchange with the first frame; `false` tears down
    async fn exchanged(&self, connection: &Arc<Connection>, frame: Bytes) -> bool;

    /// Handle a reassembled frame; must not block
    fn received(&self, connection: &Arc<Connection>, frame: Bytes);

    /// Release everything held for the connection
    async fn disconnected(&self, connection: &Arc<Connection>);
}

/// Listener options
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Footer appended to every outgoing frame
    pub footer: Bytes,
    /// Footer length expected after every incoming frame
    pub footer_length: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_capacity: usize,
    /// Largest accepted frame (excluding footer)
    pub max_frame_size: usize,
    /// Time allowed for the key exchange
    pub handshake_timeout: Duration,
    /// Initial capacity of each connection's receive buffer
    pub read_buffer_size: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_connections: 500,
            footer: Bytes::from_static(b"TQServer"),
            footer_length: 8,
            outbound_capacity: 256,
            max_frame_size: MAX_FRAME_SIZE,
            handshake_timeout: Duration::from_secs(30),
            read_buffer_size: 4096,
        }
    }
}

/// TCP server listener
pub struct TcpServerListener<H: ConnectionHooks> {
    hooks: Arc<H>,
    options: ListenerOptions,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    /// One permit per connection slot, held from accept to teardown
    slots: Arc<Semaphore>,
    next_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl<H: ConnectionHooks> TcpServerListener<H> {
    /// Create a listener driving the given hooks
    pub fn new(hooks: Arc<H>, options: ListenerOptions, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            hooks,
            slots: Arc::new(Semaphore::new(options.max_connections)),
            options,
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every live connection
    pub fn disconnect_all(&self) {
        for entry in self.connections.iter() {
            entry.value().disconnect();
        }
    }

    /// Wait until every connection has been torn down or the timeout expires
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.connections.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Accept connections until shutdown is signalled
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                                warn!(
                                    address = %addr,
                                    error = %TransportError::TooManyConnections(self.options.max_connections),
                                    "Connection refused, closing socket"
                                );
                                drop(stream);
                                continue;
                            };
                            let this = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = this.handle(stream, addr, permit).await {
                                    debug!(address = %addr, error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept game connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Game connection acceptor shutting down");
                    break;
                }
            }
        }
    }

    /// Drive one connection from accept to teardown
    ///
    /// The slot permit is released when this returns, after the writer task
    /// has finished.
    async fn handle(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        _permit: OwnedSemaphorePermit,
    ) -> Result<()> {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let close = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.options.outbound_capacity);

        let writer_task = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            self.options.footer.clone(),
            close.clone(),
        ));

        let pending = PendingConnection {
            id,
            address: addr,
            outbound: outbound_tx,
            close: close.clone(),
        };

        let connection = match self.hooks.accepted(pending).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(address = %addr, error = %e, "Connection setup failed, closing socket");
                close.cancel();
                let _ = writer_task.await;
                return Err(e);
            }
        };

        info!(
            connection_id = id,
            guid = %connection.guid,
            address = %addr,
            partition = connection.partition,
            "Client connected"
        );
        self.connections.insert(id, connection.clone());

        let result = self.read_loop(&connection, reader).await;

        connection.disconnect();
        connection.set_state(ConnectionState::Disconnected);
        if connection.claim_disconnect() {
            self.hooks.disconnected(&connection).await;
        }
        self.connections.remove(&id);
        let _ = writer_task.await;

        info!(connection_id = id, guid = %connection.guid, address = %addr, "Client disconnected");
        result
    }

    async fn read_loop(&self, connection: &Arc<Connection>, mut reader: OwnedReadHalf) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut buffer = BytesMut::with_capacity(self.options.read_buffer_size);
        let mut decryptor: Option<CipherStream> = None;
        let close = connection.close_token().clone();

        let handshake_deadline = tokio::time::sleep(self.options.handshake_timeout);
        tokio::pin!(handshake_deadline);

        loop {
            tokio::select! {
                _ = close.cancelled() => return Ok(()),
                _ = shutdown_rx.recv() => return Ok(()),
                _ = &mut handshake_deadline, if !connection.is_active() => {
                    warn!(connection_id = connection.id, "Key exchange timed out");
                    return Err(TransportError::ConnectionClosed.into());
                }
                read = reader.read_buf(&mut buffer) => {
                    let n = match read {
                        Ok(0) => return Ok(()),
                        Ok(n) => n,
                        Err(e) => return Err(e.into()),
                    };
                    if let Some(cipher) = decryptor.as_mut() {
                        let len = buffer.len();
                        cipher.apply(&mut buffer[len - n..]);
                    }
                    self.split_frames(connection, &mut buffer, &mut decryptor).await?;
                }
            }
        }
    }

    /// Split every complete frame out of the receive buffer
    async fn split_frames(
        &self,
        connection: &Arc<Connection>,
        buffer: &mut BytesMut,
        decryptor: &mut Option<CipherStream>,
    ) -> Result<()> {
        while buffer.len() >= 2 {
            let length = u16::from_le_bytes([buffer[0], buffer[1]]) as usize;
            if length < HEADER_SIZE || length > self.options.max_frame_size {
                warn!(
                    connection_id = connection.id,
                    length,
                    "Invalid frame length, disconnecting"
                );
                return Err(TransportError::InvalidFrameLength {
                    length,
                    min: HEADER_SIZE,
                    max: self.options.max_frame_size,
                }
                .into());
            }

            let total = length + self.options.footer_length;
            if buffer.len() < total {
                break;
            }

            let frame = buffer.split_to(length).freeze();
            buffer.advance(self.options.footer_length);

            match connection.state() {
                ConnectionState::Exchanging => {
                    if !self.hooks.exchanged(connection, frame).await {
                        return Err(HandshakeError::Rejected.into());
                    }
                    *decryptor = connection.take_decryptor();
                    // Bytes behind the reply arrived under the new cipher.
                    if let Some(cipher) = decryptor.as_mut() {
                        cipher.apply(&mut buffer[..]);
                    }
                }
                ConnectionState::Active => {
                    self.hooks.received(connection, frame);
                }
                state => {
                    debug!(
                        connection_id = connection.id,
                        state = %state,
                        "Frame received before the key exchange completed"
                    );
                    return Err(ServerError::Protocol(ProtocolError::NotExchanged));
                }
            }
        }
        Ok(())
    }
}

/// Drain the outbound queue into the socket
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    footer: Bytes,
    close: CancellationToken,
) {
    let mut encryptor: Option<CipherStream> = None;
    loop {
        tokio::select! {
            biased;
            item = outbound_rx.recv() => {
                let Some(item) = item else { break };
                if write_item(&mut writer, item, &footer, &mut encryptor).await.is_err() {
                    close.cancel();
                    break;
                }
            }
            _ = close.cancelled() => {
                // Flush what was queued before the close request.
                outbound_rx.close();
                while let Ok(item) = outbound_rx.try_recv() {
                    if write_item(&mut writer, item, &footer, &mut encryptor).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_item(
    writer: &mut OwnedWriteHalf,
    item: Outbound,
    footer: &Bytes,
    encryptor: &mut Option<CipherStream>,
) -> std::io::Result<()> {
    let (frame, encrypt) = match item {
        Outbound::Raw(frame) => (frame, false),
        Outbound::Frame(frame) => (frame, true),
        Outbound::StartEncryption(cipher) => {
            *encryptor = Some(cipher);
            return Ok(());
        }
    };

    let mut data = BytesMut::with_capacity(frame.len() + footer.len());
    data.extend_from_slice(&frame);
    data.extend_from_slice(footer);
    if encrypt {
        if let Some(cipher) = encryptor.as_mut() {
            cipher.apply(&mut data[..]);
        }
    }
    writer.write_all(&data).await
}
