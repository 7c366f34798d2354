//! Pending Request Store - the correlation table behind `request`.
//!
//! Maps correlation IDs to callers waiting on a reply. The table is the
//! single source of truth for "is this reply still wanted": every terminal
//! event (reply, rejection, timeout, shutdown) starts by removing the entry,
//! and only the event that actually removed it gets to deliver an outcome.

use crate::domain::codec;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{messages, ErrorEvent, MessengerError, MessengerResult};
use crate::domain::shape::{Shape, ShapeRef};
use dashmap::DashMap;
use serde_json::Value;
use shared_types::ReplyStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What the caller's future eventually yields.
pub type ReplyOutcome = MessengerResult<Value>;

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Reply arrived and passed validation.
    Fulfilled,
    /// Handler rejected, or reply failed validation.
    Rejected,
    /// Deadline passed first.
    TimedOut,
    /// Caller went away or the messenger stopped.
    Cancelled,
}

/// A pending request waiting for its reply
struct PendingRequest {
    /// Channel to send the outcome
    sender: oneshot::Sender<ReplyOutcome>,
    /// When request was created
    created_at: Instant,
    /// How long the caller waits
    timeout: Duration,
    /// Routing key (for logging)
    routing_key: String,
    /// Shape the reply must satisfy
    response_shape: Option<ShapeRef>,
}

/// Statistics for pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests resolved with a valid reply
    pub total_fulfilled: AtomicU64,
    /// Total requests rejected (handler error or invalid reply)
    pub total_rejected: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled (dropped or shut down)
    pub total_cancelled: AtomicU64,
    /// Replies that matched no pending request
    pub total_discarded: AtomicU64,
}

impl PendingStats {
    fn record(&self, outcome: RequestOutcome) {
        let counter = match outcome {
            RequestOutcome::Fulfilled => &self.total_fulfilled,
            RequestOutcome::Rejected => &self.total_rejected,
            RequestOutcome::TimedOut => &self.total_timeouts,
            RequestOutcome::Cancelled => &self.total_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pending request store.
///
/// Flow:
/// 1. `request` calls `register()` and gets a correlation id and a oneshot receiver
/// 2. The request is published with that id
/// 3. The reply listener calls `complete()` when a reply arrives
/// 4. The caller awaits the receiver, calling `expire()` if its deadline passes
pub struct PendingRequestStore {
    /// Map of correlation ID to pending request
    pending: DashMap<CorrelationId, PendingRequest>,
    /// Statistics
    stats: PendingStats,
}

impl PendingRequestStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: PendingStats::default(),
        }
    }

    /// Register a pending request and get a receiver for its outcome.
    pub fn register(
        &self,
        routing_key: &str,
        timeout: Duration,
        response_shape: Option<ShapeRef>,
    ) -> (CorrelationId, oneshot::Receiver<ReplyOutcome>) {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();

        let request = PendingRequest {
            sender: tx,
            created_at: Instant::now(),
            timeout,
            routing_key: routing_key.to_string(),
            response_shape,
        };

        self.pending.insert(correlation_id, request);
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %correlation_id,
            routing_key = routing_key,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending request"
        );

        (correlation_id, rx)
    }

    /// Complete a pending request with a reply.
    ///
    /// Returns true if the request was still pending. Replies for unknown,
    /// expired, or already-completed ids are discarded.
    pub fn complete(&self, correlation_id: CorrelationId, status: ReplyStatus, body: &[u8]) -> bool {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            self.stats.total_discarded.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %correlation_id,
                "Reply for unknown or expired correlation ID discarded"
            );
            return false;
        };

        let response_time = pending.created_at.elapsed();
        let outcome = evaluate_reply(status, body, pending.response_shape.as_deref());
        let kind = if outcome.is_ok() {
            RequestOutcome::Fulfilled
        } else {
            RequestOutcome::Rejected
        };

        match pending.sender.send(outcome) {
            Ok(()) => {
                self.stats.record(kind);
                debug!(
                    correlation_id = %correlation_id,
                    routing_key = pending.routing_key,
                    response_time_ms = response_time.as_millis() as u64,
                    outcome = ?kind,
                    "Completed pending request"
                );
            }
            Err(_) => {
                // Receiver was dropped (caller went away)
                self.stats.record(RequestOutcome::Cancelled);
                debug!(
                    correlation_id = %correlation_id,
                    routing_key = pending.routing_key,
                    "Pending request receiver dropped"
                );
            }
        }
        true
    }

    /// Remove a request whose deadline passed.
    ///
    /// Returns false if a reply already won; the caller must then take the
    /// outcome from its receiver instead of reporting a timeout.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                self.stats.record(RequestOutcome::TimedOut);
                warn!(
                    correlation_id = %correlation_id,
                    routing_key = pending.routing_key,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    timeout_ms = pending.timeout.as_millis() as u64,
                    "Request timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Cancel a pending request without delivering an outcome.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.record(RequestOutcome::Cancelled);
            debug!(correlation_id = %correlation_id, "Cancelled pending request");
            true
        } else {
            false
        }
    }

    /// Fail every pending request with [`MessengerError::ShuttingDown`].
    ///
    /// Returns the number of requests failed.
    pub fn reject_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sender.send(Err(MessengerError::ShuttingDown));
                self.stats.record(RequestOutcome::Cancelled);
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed = failed, "Failed outstanding requests on shutdown");
        }
        failed
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl Default for PendingRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a raw reply into the caller's outcome.
fn evaluate_reply(
    status: ReplyStatus,
    body: &[u8],
    response_shape: Option<&dyn Shape>,
) -> ReplyOutcome {
    match status {
        ReplyStatus::Error => {
            let event = serde_json::from_slice::<ErrorEvent>(body)
                .unwrap_or_else(|e| ErrorEvent::new(format!("Malformed error reply: {}", e)));
            Err(MessengerError::Rejected(event))
        }
        ReplyStatus::Ok => {
            let payload = codec::decode(body)
                .map_err(|e| MessengerError::validation(messages::INVALID_RESPONSE_TYPE, e))?;
            codec::validate(&payload, response_shape)
                .map_err(|e| MessengerError::validation(messages::INVALID_RESPONSE_TYPE, e))?;
            Ok(payload)
        }
    }
}
