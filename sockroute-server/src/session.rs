//! Per-connection session state.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A client connection.
pub struct Session {
    /// Unique session ID.
    pub id: String,

    pub remote_addr: SocketAddr,

    /// Calls received on this connection.
    call_count: AtomicU64,

    created_at: Instant,

    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            call_count: AtomicU64::new(0),
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    /// Marks the connection as active.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Records an incoming call and marks the connection as active.
    pub fn record_call(&self) -> u64 {
        self.touch();
        self.call_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
