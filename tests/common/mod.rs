//! Shared helpers for integration tests: an in-process server on a loopback
//! port and a minimal client speaking the framed, encrypted protocol.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use embergate_server::config::ServerConfig;
use embergate_server::crypto::{CipherStream, RandomnessService};
use embergate_server::game::{GameServer, InMemoryRepository};
use embergate_server::net::{ConnectionHooks, ListenerOptions, TcpServerListener};
use embergate_server::protocol::{Handshake, HandshakeOffer, MsgConnect, Packet};
use embergate_server::state::ServerState;

/// Footer the test client appends to its frames
pub const CLIENT_FOOTER: &[u8; 8] = b"TQClient";

/// Time allowed for any single read
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Started server state with two partitions of each kind
pub fn test_state() -> (Arc<ServerState>, Arc<InMemoryRepository>, broadcast::Sender<()>) {
    let config = ServerConfig {
        packet_partitions: 2,
        world_partitions: 2,
        ..ServerConfig::default()
    };
    let (shutdown_tx, _) = broadcast::channel(1);
    let repository = Arc::new(InMemoryRepository::new());
    let state = Arc::new(ServerState::with_services(
        config,
        shutdown_tx.clone(),
        repository.clone(),
        Arc::new(RandomnessService::with_seed(11)),
    ));
    state.start();
    (state, repository, shutdown_tx)
}

/// Run a listener with the given hooks on a loopback port
pub async fn serve<H: ConnectionHooks>(
    hooks: Arc<H>,
    options: ListenerOptions,
    shutdown_tx: broadcast::Sender<()>,
) -> (Arc<TcpServerListener<H>>, SocketAddr) {
    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();
    let listener = Arc::new(TcpServerListener::new(hooks, options, shutdown_tx));
    tokio::spawn(listener.clone().run(socket));
    (listener, address)
}

/// Poll a condition until it holds or five seconds pass
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Server running on a loopback port
pub struct TestServer {
    pub state: Arc<ServerState>,
    pub repository: Arc<InMemoryRepository>,
    pub listener: Arc<TcpServerListener<GameServer>>,
    pub address: SocketAddr,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with adjusted listener options
    pub async fn start_with<F: FnOnce(&mut ListenerOptions)>(adjust: F) -> Self {
        let (state, repository, shutdown_tx) = test_state();
        let mut options = state.config.listener_options();
        adjust(&mut options);

        let hooks = Arc::new(GameServer::new(state.clone()));
        let (listener, address) = serve(hooks, options, shutdown_tx.clone()).await;

        Self {
            state,
            repository,
            listener,
            address,
            shutdown_tx,
        }
    }

    /// Connect and complete the key exchange
    pub async fn connect(&self) -> TestClient {
        let mut client = TestClient::open(self.address).await;
        client.exchange().await;
        client
    }

    /// Connect, exchange keys and redeem a fresh login ticket for an account
    pub async fn login(&self, account_id: u32) -> TestClient {
        let (token, code) = self.state.issue_login_ticket(account_id).await.unwrap();
        let mut client = self.connect().await;
        client
            .send(&MsgConnect {
                token,
                code,
                client_version: 5017,
                language: "En".to_string(),
                file_checksum: 0,
            })
            .await;
        client
    }

    /// Poll a condition until it holds or the timeout expires
    pub async fn eventually<F: Fn() -> bool>(&self, condition: F) -> bool {
        eventually(condition).await
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.listener.wait_idle(Duration::from_secs(5)).await;
        self.state.shutdown().await;
    }
}

/// Minimal game client
pub struct TestClient {
    stream: TcpStream,
    buffer: BytesMut,
    encrypt: Option<CipherStream>,
    decrypt: Option<CipherStream>,
}

impl TestClient {
    /// Open a socket without running the key exchange
    pub async fn open(address: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(address).await.unwrap(),
            buffer: BytesMut::with_capacity(4096),
            encrypt: None,
            decrypt: None,
        }
    }

    /// Answer the server offer and switch to encrypted frames
    pub async fn exchange(&mut self) {
        let frame = self.recv_frame().await.expect("handshake offer");
        let offer = HandshakeOffer::decode(&frame).unwrap();
        let (reply, ciphers) = Handshake::respond(&offer, &RandomnessService::new())
            .await
            .unwrap();
        self.send_frame(reply.encode()).await;
        let (encrypt, decrypt) = ciphers.split();
        self.encrypt = Some(encrypt);
        self.decrypt = Some(decrypt);
    }

    pub async fn send<P: Packet>(&mut self, packet: &P) {
        self.send_frame(packet.encode()).await;
    }

    /// Write a frame and the client footer, encrypted once keys are set
    pub async fn send_frame(&mut self, frame: Bytes) {
        let mut data = BytesMut::with_capacity(frame.len() + CLIENT_FOOTER.len());
        data.extend_from_slice(&frame);
        data.extend_from_slice(CLIENT_FOOTER);
        if let Some(cipher) = self.encrypt.as_mut() {
            cipher.apply(&mut data[..]);
        }
        self.stream.write_all(&data).await.unwrap();
    }

    /// Next frame without its footer; `None` on close or timeout
    pub async fn recv_frame(&mut self) -> Option<Bytes> {
        loop {
            if self.buffer.len() >= 2 {
                let length = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
                if self.buffer.len() >= length + CLIENT_FOOTER.len() {
                    let frame = self.buffer.split_to(length).freeze();
                    self.buffer.advance(CLIENT_FOOTER.len());
                    return Some(frame);
                }
            }

            let mut chunk = [0u8; 4096];
            let n = timeout(READ_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .ok()?
                .ok()?;
            if n == 0 {
                return None;
            }
            let data = &mut chunk[..n];
            if let Some(cipher) = self.decrypt.as_mut() {
                cipher.apply(data);
            }
            self.buffer.extend_from_slice(data);
        }
    }

    /// Next frame decoded as `P`
    pub async fn recv<P: Packet>(&mut self) -> P {
        let frame = self.recv_frame().await.expect("frame");
        P::decode(&frame).unwrap()
    }

    /// Whether the server closed the socket (reads until EOF)
    pub async fn closed(&mut self) -> bool {
        loop {
            let mut chunk = [0u8; 1024];
            match timeout(READ_TIMEOUT, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}
