//! TCP server implementation.
//!
//! Each connection reads framed [`ApiCall`]s and spawns one task per call, so
//! calls on a connection run concurrently. Responses are funnelled through a
//! per-connection writer task and tagged with the originating `cid`.

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::session::Session;
use bytes::BytesMut;
use sockroute_protocol::{
    ApiCall, ApiError, ApiResponse, FrameDecoder, FrameEncoder, ResponseData, API_EVENT,
    DEFAULT_PORT,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

/// Outgoing frames buffered per connection.
const WRITE_QUEUE_CAPACITY: usize = 256;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub idle_timeout: Duration,
    pub max_connections: usize,
    /// Event name that carries API calls.
    pub event: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 1000,
            event: API_EVENT.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub calls_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server answering API calls through a [`Dispatcher`].
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig, dispatcher: impl Into<Arc<Dispatcher>>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher: dispatcher.into(),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds to the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Server listening on {} (event '{}')",
            listener.local_addr()?,
            self.config.event
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => tracing::error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!("Connection limit reached, rejecting {}", addr);
            return;
        }

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let dispatcher = self.dispatcher.clone();
        let stats = self.stats.clone();
        let config = self.config.clone();
        let mut conn_shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let result = Self::handle_connection(
                stream,
                addr,
                dispatcher,
                &config,
                &stats,
                &mut conn_shutdown,
            )
            .await;

            if let Err(e) = result {
                tracing::debug!("Connection {} error: {}", addr, e);
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }

            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {}", addr);
        });
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let session = Session::new(addr);
        tracing::info!("Client connected: {} (session {})", addr, session.id);

        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        Self::spawn_writer(writer, rx, addr);

        let event: Arc<str> = Arc::from(config.event.as_str());
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(config.idle_timeout) => {
                    if session.idle_duration() >= config.idle_timeout {
                        tracing::debug!("[{}] Idle timeout", addr);
                        return Ok(());
                    }
                    continue;
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            while let Some(call) = decoder.decode_call(dispatcher.schemas())? {
                session.record_call();
                stats.calls_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "[{}] Call {} {} on '{}' (cid={})",
                    addr,
                    call.data.method,
                    call.data.resource,
                    call.event,
                    call.cid
                );
                Self::spawn_call(call, dispatcher.clone(), event.clone(), tx.clone(), addr);
            }
        }
    }

    /// Dispatches one call on its own task and queues the response.
    fn spawn_call(
        call: ApiCall,
        dispatcher: Arc<Dispatcher>,
        event: Arc<str>,
        tx: mpsc::Sender<BytesMut>,
        addr: SocketAddr,
    ) {
        tokio::spawn(async move {
            let data = if call.event == *event {
                dispatcher.handle(&call.data).await
            } else {
                tracing::debug!("[{}] No listener for event '{}'", addr, call.event);
                dispatcher.api_error(&ApiError::no_listener(&call.event))
            };

            let Some(frame) = Self::encode_response(&dispatcher, call.cid, data) else {
                return;
            };
            if tx.send(frame).await.is_err() {
                tracing::debug!("[{}] Connection gone before response to cid={}", addr, call.cid);
            }
        });
    }

    fn encode_response(dispatcher: &Dispatcher, cid: u32, data: ResponseData) -> Option<BytesMut> {
        let schemas = dispatcher.schemas();
        match FrameEncoder::encode_response(schemas, &ApiResponse::new(cid, data)) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!("Failed to encode response to cid={}: {}", cid, e);
                let fallback = ApiResponse::new(cid, dispatcher.api_error(&ApiError::internal()));
                FrameEncoder::encode_response(schemas, &fallback)
                    .map_err(|e| tracing::error!("Failed to encode fallback response: {}", e))
                    .ok()
            }
        }
    }

    /// Writes queued frames until every sender is dropped.
    fn spawn_writer(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<BytesMut>, addr: SocketAddr) {
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                tracing::trace!("[{}] Writing {} bytes", addr, frame.len());
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!("[{}] Write error: {}", addr, e);
                    break;
                }
            }
        });
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
