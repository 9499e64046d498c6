//! Relay metrics for observability
//!
//! Lock-free counters updated from every session task, plus a serializable
//! snapshot that the server logs on shutdown.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Introductions refused because the name was taken or invalid
    pub name_conflicts: AtomicU64,

    // Message metrics
    /// Frames read from clients
    pub frames_received: AtomicU64,
    /// Per-recipient deliveries that completed
    pub deliveries_ok: AtomicU64,
    /// Per-recipient deliveries that failed or had no such recipient
    pub deliveries_failed: AtomicU64,

    // File relay metrics
    /// File payloads that reached at least one recipient (once per transfer)
    pub files_relayed: AtomicU64,
    /// Payload bytes of those transfers
    pub payload_bytes: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn name_conflict(&self) {
        self.name_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deliveries(&self, ok: usize, failed: usize) {
        self.deliveries_ok.fetch_add(ok as u64, Ordering::Relaxed);
        self.deliveries_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn file_relayed(&self, bytes: u64) {
        self.files_relayed.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            name_conflicts: self.name_conflicts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            deliveries_ok: self.deliveries_ok.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            files_relayed: self.files_relayed.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub total_connections: u64,
    pub name_conflicts: u64,
    pub frames_received: u64,
    pub deliveries_ok: u64,
    pub deliveries_failed: u64,
    pub files_relayed: u64,
    pub payload_bytes: u64,
}
