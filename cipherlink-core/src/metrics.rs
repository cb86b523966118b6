// SPDX-License-Identifier: MIT
//
// CipherLink: Encrypted Point-to-Point Serial Link
// Copyright (c) 2025 CipherLink Contributors

//! Link counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared link counters. Clones observe the same values.
#[derive(Clone)]
pub struct LinkMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Handshake
    handshake_restarts: AtomicU64,
    handshake_timeouts: AtomicU64,
    handshake_rejected: AtomicU64,
    handshakes_completed: AtomicU64,

    // Data exchange
    chars_sent: AtomicU64,
    chars_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                handshake_restarts: AtomicU64::new(0),
                handshake_timeouts: AtomicU64::new(0),
                handshake_rejected: AtomicU64::new(0),
                handshakes_completed: AtomicU64::new(0),
                chars_sent: AtomicU64::new(0),
                chars_received: AtomicU64::new(0),
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
            }),
        }
    }

    // Handshake
    pub fn record_handshake_restart(&self) {
        self.inner.handshake_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_timeout(&self) {
        self.inner.handshake_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_rejected(&self) {
        self.inner.handshake_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_complete(&self) {
        self.inner.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_restarts(&self) -> u64 {
        self.inner.handshake_restarts.load(Ordering::Relaxed)
    }

    pub fn handshake_timeouts(&self) -> u64 {
        self.inner.handshake_timeouts.load(Ordering::Relaxed)
    }

    pub fn handshake_rejected(&self) -> u64 {
        self.inner.handshake_rejected.load(Ordering::Relaxed)
    }

    pub fn handshakes_completed(&self) -> u64 {
        self.inner.handshakes_completed.load(Ordering::Relaxed)
    }

    // Data exchange
    pub fn record_char_sent(&self, wire_bytes: usize) {
        self.inner.chars_sent.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_sent
            .fetch_add(wire_bytes as u64, Ordering::Relaxed);
    }

    pub fn record_char_received(&self, wire_bytes: usize) {
        self.inner.chars_received.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_received
            .fetch_add(wire_bytes as u64, Ordering::Relaxed);
    }

    pub fn chars_sent(&self) -> u64 {
        self.inner.chars_sent.load(Ordering::Relaxed)
    }

    pub fn chars_received(&self) -> u64 {
        self.inner.chars_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            handshake_restarts: self.handshake_restarts(),
            handshake_timeouts: self.handshake_timeouts(),
            handshake_rejected: self.handshake_rejected(),
            handshakes_completed: self.handshakes_completed(),
            chars_sent: self.chars_sent(),
            chars_received: self.chars_received(),
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
        }
    }
}

/// Serializable view of [`LinkMetrics`], logged on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub handshake_restarts: u64,
    pub handshake_timeouts: u64,
    pub handshake_rejected: u64,
    pub handshakes_completed: u64,
    pub chars_sent: u64,
    pub chars_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = LinkMetrics::new();

        metrics.record_handshake_timeout();
        metrics.record_handshake_restart();
        metrics.record_handshake_complete();
        metrics.record_char_sent(4);
        metrics.record_char_sent(4);
        metrics.record_char_received(4);

        assert_eq!(metrics.handshake_timeouts(), 1);
        assert_eq!(metrics.handshake_restarts(), 1);
        assert_eq!(metrics.handshakes_completed(), 1);
        assert_eq!(metrics.chars_sent(), 2);
        assert_eq!(metrics.bytes_sent(), 8);
        assert_eq!(metrics.bytes_received(), 4);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = LinkMetrics::new();
        let other = metrics.clone();
        other.record_handshake_rejected();
        assert_eq!(metrics.handshake_rejected(), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.handshake_rejected, 1);
        assert_eq!(snapshot.chars_received, 0);
    }
}
