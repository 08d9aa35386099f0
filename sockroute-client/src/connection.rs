//! TCP connection with call/response correlation.

use crate::error::TransportError;
use crate::transport::Transport;
use parking_lot::Mutex;
use sockroute_protocol::{
    ApiCall, CallData, FrameDecoder, FrameEncoder, ResponseData, SchemaRoot, API_EVENT,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    /// Per-call timeout, measured from sending the call.
    pub request_timeout: Duration,
    pub read_buffer_size: usize,
    /// Default event name for [`Transport::emit`] callers that do not pick one.
    pub event: String,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event: API_EVENT.to_string(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }
}

/// A connection to a sockroute server.
pub struct Connection {
    config: ConnectionConfig,
    schemas: Arc<SchemaRoot>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    /// Calls waiting for a response, by cid.
    pending: Mutex<HashMap<u32, oneshot::Sender<ResponseData>>>,
    next_cid: AtomicU32,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig, schemas: Arc<SchemaRoot>) -> Self {
        Self {
            config,
            schemas,
            writer: AsyncMutex::new(None),
            reader: AsyncMutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_cid: AtomicU32::new(1),
            connected: AtomicBool::new(false),
        }
    }

    /// Connects and spawns the background read loop.
    pub async fn open(
        config: ConnectionConfig,
        schemas: Arc<SchemaRoot>,
    ) -> Result<Arc<Self>, TransportError> {
        let conn = Arc::new(Self::new(config, schemas));
        conn.connect().await?;

        let reader = conn.clone();
        tokio::spawn(async move {
            if let Err(e) = reader.read_loop().await {
                tracing::debug!("read_loop ended: {}", e);
            }
        });

        Ok(conn)
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), TransportError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            TransportError::Timeout
        })??;

        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.connected.store(true, Ordering::SeqCst);

        tracing::debug!("Connected to {}", self.config.addr);
        Ok(())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn next_cid(&self) -> u32 {
        // cid 0 is never handed out
        loop {
            let cid = self.next_cid.fetch_add(1, Ordering::Relaxed);
            if cid != 0 {
                return cid;
            }
        }
    }

    /// Sends a call on `event` and waits for its response.
    pub async fn request(&self, event: &str, data: CallData) -> Result<ResponseData, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let cid = self.next_cid();
        tracing::debug!(
            "Sending call cid={} {} {} on '{}'",
            cid,
            data.method,
            data.resource,
            event
        );
        let call = ApiCall::new(cid, data).with_event(event);
        let encoded = FrameEncoder::encode_call(&self.schemas, &call)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(cid, tx);

        let written = {
            let mut writer_guard = self.writer.lock().await;
            match writer_guard.as_mut() {
                Some(writer) => writer.write_all(&encoded).await.map_err(TransportError::Io),
                None => Err(TransportError::NotConnected),
            }
        };
        if let Err(e) = written {
            self.pending.lock().remove(&cid);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                tracing::debug!("Call cid={} lost its connection", cid);
                Err(TransportError::ConnectionClosed)
            }
            Err(_) => {
                tracing::debug!("Call cid={} timed out", cid);
                self.pending.lock().remove(&cid);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Sends a call on the configured event.
    pub async fn send(&self, data: CallData) -> Result<ResponseData, TransportError> {
        self.request(&self.config.event, data).await
    }

    /// Reads responses and completes pending calls. Runs until the connection closes.
    pub async fn read_loop(&self) -> Result<(), TransportError> {
        let mut reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(TransportError::NotConnected)?;
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];

        let result = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break Err(TransportError::ConnectionClosed),
                Ok(n) => n,
                Err(e) => break Err(TransportError::Io(e)),
            };
            decoder.extend(&buf[..n]);

            if let Err(e) = self.complete_pending(&mut decoder) {
                break Err(e);
            }
        };

        tracing::debug!("read_loop: connection closed");
        self.connected.store(false, Ordering::SeqCst);
        self.fail_pending();
        result
    }

    fn complete_pending(&self, decoder: &mut FrameDecoder) -> Result<(), TransportError> {
        while let Some(response) = decoder.decode_response(&self.schemas)? {
            match self.pending.lock().remove(&response.rid) {
                Some(tx) => {
                    let _ = tx.send(response.data);
                }
                None => tracing::debug!("read_loop: no pending call for rid={}", response.rid),
            }
        }
        Ok(())
    }

    /// Drops every pending sender, failing their calls with `ConnectionClosed`.
    fn fail_pending(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::debug!("Failing {} pending calls", pending.len());
        }
        pending.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();
        self.fail_pending();

        tracing::debug!("Connection closed");
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Transport for Connection {
    fn emit(
        &self,
        event: &str,
        call: CallData,
    ) -> impl Future<Output = Result<ResponseData, TransportError>> + Send {
        self.request(event, call)
    }
}
