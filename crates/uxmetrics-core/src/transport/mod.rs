//! Reporting transport.
//!
//! The reporter plugin hands finished metric snapshots to a [`Transport`].
//! [`BatchTransport`] is the standard implementation: it coalesces snapshots
//! for a short window and sends them as one JSON document.

mod batch;

pub use batch::{
    BatchEnvelope, BatchTransport, Visibility, DEFAULT_FLUSH_INTERVAL, DEFAULT_QUEUE_LIMIT,
};

use tokio::sync::oneshot;

use crate::metric::MetricSnapshot;

/// Destination for finished metric snapshots.
///
/// `enqueue` must not block. The returned receiver resolves to `true` once
/// the snapshot has been delivered, or `false` if delivery failed. Callers
/// are free to drop it.
pub trait Transport {
    fn enqueue(&self, snapshot: MetricSnapshot) -> oneshot::Receiver<bool>;
}
