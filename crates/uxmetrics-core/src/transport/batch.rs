//! Batched HTTP transport.
//!
//! Snapshots are queued in memory. The first snapshot queued after a flush
//! schedules the next flush one coalescing window later on the ambient tokio
//! runtime; everything queued in the meantime rides along in the same
//! request. Hiding the page flushes immediately.
//!
//! Delivery is best effort: a failed request is logged and its batch is
//! dropped, never retried. Without a runtime nothing is flushed until
//! [`BatchTransport::flush`] is awaited, so the queue is capped; once full,
//! the oldest snapshot is dropped and its receiver resolves to `false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::Transport;
use crate::config::ReporterConfig;
use crate::error::TransportError;
use crate::metric::MetricSnapshot;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;

/// Visibility of the hosting page or window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Request body of one flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEnvelope {
    pub batch_id: Uuid,
    pub session_id: String,
    pub sent_at: DateTime<Utc>,
    pub metrics: Vec<MetricSnapshot>,
}

struct Pending {
    snapshot: MetricSnapshot,
    done: oneshot::Sender<bool>,
}

struct QueueState {
    pending: Vec<Pending>,
    limit: usize,
    flush_scheduled: bool,
    visibility: Visibility,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            limit: DEFAULT_QUEUE_LIMIT,
            flush_scheduled: false,
            visibility: Visibility::default(),
        }
    }
}

struct Shared {
    client: reqwest::Client,
    endpoint: Url,
    session_id: String,
    flush_interval: Duration,
    state: Mutex<QueueState>,
}

/// Coalescing transport that POSTs batches of snapshots as JSON.
///
/// Cloning shares the queue.
#[derive(Clone)]
pub struct BatchTransport {
    shared: Arc<Shared>,
}

impl BatchTransport {
    pub fn new(endpoint: Url) -> Self {
        Self::with_flush_interval(endpoint, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_flush_interval(endpoint: Url, flush_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                client: reqwest::Client::new(),
                endpoint,
                session_id: Uuid::new_v4().to_string(),
                flush_interval,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Build from the `[reporter]` configuration section.
    pub fn from_config(config: &ReporterConfig) -> Result<Self, TransportError> {
        let endpoint = config.endpoint.as_deref().ok_or(TransportError::NoEndpoint)?;
        let endpoint = Url::parse(endpoint)?;
        Ok(Self::with_flush_interval(
            endpoint,
            Duration::from_millis(config.flush_interval_ms),
        ))
    }

    /// Cap the number of queued snapshots (at least one).
    pub fn with_queue_limit(self, limit: usize) -> Self {
        self.state().limit = limit.max(1);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    /// Identifier sent with every batch from this transport.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn flush_interval(&self) -> Duration {
        self.shared.flush_interval
    }

    /// Number of snapshots waiting for the next flush.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    pub fn queue_limit(&self) -> usize {
        self.state().limit
    }

    pub fn visibility(&self) -> Visibility {
        self.state().visibility
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Record a visibility change. Becoming hidden flushes right away.
    pub fn on_visibility_change(&self, visibility: Visibility) {
        self.state().visibility = visibility;
        if visibility != Visibility::Hidden {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                debug!("page hidden, flushing now");
                let transport = self.clone();
                handle.spawn(async move {
                    let _ = transport.flush().await;
                });
            }
            Err(_) => debug!("page hidden but no async runtime, snapshots stay queued"),
        }
    }

    /// Send everything queued as one batch. Returns the number of snapshots
    /// sent.
    pub async fn flush(&self) -> Result<usize, TransportError> {
        let batch = {
            let mut state = self.state();
            state.flush_scheduled = false;
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let (snapshots, waiters): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|pending| (pending.snapshot, pending.done))
            .unzip();
        let envelope = BatchEnvelope {
            batch_id: Uuid::new_v4(),
            session_id: self.shared.session_id.clone(),
            sent_at: Utc::now(),
            metrics: snapshots,
        };
        let count = envelope.metrics.len();

        let result = self.send(&envelope).await;
        match &result {
            Ok(()) => debug!(batch_id = %envelope.batch_id, count, "batch delivered"),
            Err(err) => warn!(batch_id = %envelope.batch_id, count, "batch dropped: {err}"),
        }

        let delivered = result.is_ok();
        for waiter in waiters {
            // receiver may have been dropped
            let _ = waiter.send(delivered);
        }
        result.map(|()| count)
    }

    async fn send(&self, envelope: &BatchEnvelope) -> Result<(), TransportError> {
        let response = self
            .shared
            .client
            .post(self.shared.endpoint.clone())
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn schedule_flush(&self, state: &mut QueueState) {
        if state.flush_scheduled {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            debug!("no async runtime, snapshot stays queued until flushed");
            return;
        };
        state.flush_scheduled = true;

        let transport = self.clone();
        let interval = self.shared.flush_interval;
        debug!(?interval, "flush scheduled");
        handle.spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = transport.flush().await;
        });
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for BatchTransport {
    fn enqueue(&self, snapshot: MetricSnapshot) -> oneshot::Receiver<bool> {
        let (done, receiver) = oneshot::channel();
        let mut state = self.state();
        while state.pending.len() >= state.limit {
            let oldest = state.pending.remove(0);
            warn!(metric = %oldest.snapshot.name, limit = state.limit, "queue full, dropping oldest snapshot");
            let _ = oldest.done.send(false);
        }
        debug!(metric = %snapshot.name, queued = state.pending.len() + 1, "snapshot queued");
        state.pending.push(Pending { snapshot, done });
        self.schedule_flush(&mut state);
        receiver
    }
}

impl std::fmt::Debug for BatchTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTransport")
            .field("endpoint", &self.shared.endpoint.as_str())
            .field("session_id", &self.shared.session_id)
            .field("flush_interval", &self.shared.flush_interval)
            .field("queue_limit", &self.queue_limit())
            .field("queued", &self.len())
            .finish()
    }
}
