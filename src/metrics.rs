//! Metric helpers for `peerwire`.
//!
//! Metric names and small helpers wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking registered connections.
pub const CONNECTIONS_ACTIVE: &str = "peerwire_connections_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "peerwire_frames_processed_total";
/// Name of the counter tracking disconnects, labelled by reason.
pub const DISCONNECTS_TOTAL: &str = "peerwire_disconnects_total";
/// Name of the counter tracking enqueue attempts rejected by a full queue.
pub const WRITE_QUEUE_FULL_TOTAL: &str = "peerwire_write_queue_full_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from a peer.
    Inbound,
    /// Frames written to a peer.
    Outbound,
}

impl Direction {
    /// Label value used for this direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a disconnect with its reason label.
pub fn inc_disconnects(reason: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(DISCONNECTS_TOTAL, "reason" => reason).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record an enqueue rejected because the outbound queue was full.
pub fn inc_write_queue_full() {
    #[cfg(feature = "metrics")]
    counter!(WRITE_QUEUE_FULL_TOTAL).increment(1);
}
