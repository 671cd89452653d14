//! Audit failure sinks

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use super::ports::{AuditErrorSink, AuditFailure};

/// Emits each failure as an `error` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl AuditErrorSink for TracingErrorSink {
    fn report(&self, failure: &AuditFailure) {
        error!(
            entry_id = %failure.entry_id,
            actor_id = %failure.actor_id,
            resource_type = %failure.resource_type,
            resource_id = %failure.resource_id,
            action = %failure.action,
            error = %failure.error,
            "audit entry was not persisted"
        );
    }
}

/// Forwards failures to a bounded channel for an alerting task.
///
/// A full channel drops the failure with a warning instead of blocking the
/// request that triggered it.
#[derive(Debug, Clone)]
pub struct ChannelErrorSink {
    tx: mpsc::Sender<AuditFailure>,
}

impl ChannelErrorSink {
    /// Sink with a bounded queue, paired with its receiving end.
    /// Failures are dropped with a warning when the queue is full.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditFailure>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditErrorSink for ChannelErrorSink {
    fn report(&self, failure: &AuditFailure) {
        if let Err(err) = self.tx.try_send(failure.clone()) {
            warn!(entry_id = %failure.entry_id, error = %err, "audit failure channel rejected report");
        }
    }
}

/// Reports every failure to each inner sink in order
#[derive(Clone, Default)]
pub struct FanOutErrorSink {
    sinks: Vec<Arc<dyn AuditErrorSink>>,
}

impl FanOutErrorSink {
    /// Fan-out with no sinks
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to the fan-out
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn AuditErrorSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditErrorSink for FanOutErrorSink {
    fn report(&self, failure: &AuditFailure) {
        for sink in &self.sinks {
            sink.report(failure);
        }
    }
}
