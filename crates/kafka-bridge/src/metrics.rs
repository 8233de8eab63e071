//! Bridge counters.
//!
//! Plain atomics, read by the health endpoint and logged at shutdown. With
//! the `metrics` feature they are also rendered in the Prometheus text format
//! for `GET /metrics`.
//!
//! ## Metrics Exported
//!
//! - `bridge_requests_submitted_total`, `bridge_publish_failures_total`
//! - `bridge_replies_delivered_total`, `bridge_replies_unmatched_total`
//! - `bridge_request_timeouts_total`, `bridge_stale_pending_swept_total`
//! - `bridge_connections_opened_total`, `bridge_connections_closed_total`
//! - `bridge_frames_sent_total`, `bridge_frames_dropped_total`
//! - `bridge_duplicate_requests_dropped_total`, `bridge_malformed_frames_total`
//! - `bridge_live_connections`, `bridge_pending_requests` (gauges)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    // Broker side
    pub requests_submitted: AtomicU64,
    pub publish_failures: AtomicU64,
    pub replies_delivered: AtomicU64,
    pub replies_unmatched: AtomicU64,
    pub timeouts: AtomicU64,
    pub stale_swept: AtomicU64,

    // Connection side
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub duplicate_requests_dropped: AtomicU64,
    pub malformed_frames: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections opened but not yet closed
    pub fn live_connections(&self) -> u64 {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        opened.saturating_sub(closed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_submitted: load(&self.requests_submitted),
            publish_failures: load(&self.publish_failures),
            replies_delivered: load(&self.replies_delivered),
            replies_unmatched: load(&self.replies_unmatched),
            timeouts: load(&self.timeouts),
            stale_swept: load(&self.stale_swept),
            connections_opened: load(&self.connections_opened),
            connections_closed: load(&self.connections_closed),
            frames_sent: load(&self.frames_sent),
            frames_dropped: load(&self.frames_dropped),
            duplicate_requests_dropped: load(&self.duplicate_requests_dropped),
            malformed_frames: load(&self.malformed_frames),
        }
    }
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Render the snapshot plus the given pending count in the Prometheus
    /// text exposition format.
    ///
    /// A fresh registry is built per call, so several services in one
    /// process never collide on metric names.
    pub fn to_prometheus(&self, pending_requests: usize) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

        let registry = Registry::new();

        let counters = [
            (
                "bridge_requests_submitted_total",
                "Requests published to the request topic",
                self.requests_submitted,
            ),
            (
                "bridge_publish_failures_total",
                "Requests the broker rejected",
                self.publish_failures,
            ),
            (
                "bridge_replies_delivered_total",
                "Replies handed to a waiting request",
                self.replies_delivered,
            ),
            (
                "bridge_replies_unmatched_total",
                "Replies with no pending request",
                self.replies_unmatched,
            ),
            (
                "bridge_request_timeouts_total",
                "Requests that got no reply in time",
                self.timeouts,
            ),
            (
                "bridge_stale_pending_swept_total",
                "Pending entries removed by the sweeper",
                self.stale_swept,
            ),
            (
                "bridge_connections_opened_total",
                "WebSocket connections opened",
                self.connections_opened,
            ),
            (
                "bridge_connections_closed_total",
                "WebSocket connections closed",
                self.connections_closed,
            ),
            (
                "bridge_frames_sent_total",
                "Reply frames written to clients",
                self.frames_sent,
            ),
            (
                "bridge_frames_dropped_total",
                "Reply frames dropped on a full outbound queue",
                self.frames_dropped,
            ),
            (
                "bridge_duplicate_requests_dropped_total",
                "Frames dropped while a request was in flight",
                self.duplicate_requests_dropped,
            ),
            (
                "bridge_malformed_frames_total",
                "Frames that were not valid requests",
                self.malformed_frames,
            ),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::new(name, help)?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let gauges = [
            (
                "bridge_live_connections",
                "Connections opened and not yet closed",
                self.connections_opened.saturating_sub(self.connections_closed),
            ),
            (
                "bridge_pending_requests",
                "Requests waiting for a reply",
                pending_requests as u64,
            ),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::new(name, help)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_submitted: u64,
    pub publish_failures: u64,
    pub replies_delivered: u64,
    pub replies_unmatched: u64,
    pub timeouts: u64,
    pub stale_swept: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub duplicate_requests_dropped: u64,
    pub malformed_frames: u64,
}
