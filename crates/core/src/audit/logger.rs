//! PHI access audit logger
//!
//! Appends one [`AuditLogEntry`] per access, publishes each stored entry on
//! a broadcast stream for the access pattern monitor, and answers paginated
//! queries and compliance reports over the store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use phivault_common::{Clock, SystemClock};
use phivault_domain::{
    AuditAction, AuditFilter, AuditLogEntry, AuditReport, AuditSettings, DateRange,
    IncidentStatus, PageRequest, RequestContext,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::ports::{AuditErrorSink, AuditFailure, AuditStore};
use super::sinks::TracingErrorSink;
use crate::errors::{AuditQueryError, AuditWriteError, ReportError};
use crate::monitor::AccessPatternMonitor;

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// Audit logger over an append-only [`AuditStore`]
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    sink: Arc<dyn AuditErrorSink>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<AuditLogEntry>,
    page_size: usize,
    write_timeout: Duration,
}

impl AuditLogger {
    /// Logger over `store` with default paging, timeout and stream capacity.
    /// Write failures go to a [`TracingErrorSink`].
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_STREAM_CAPACITY);
        Self {
            store,
            sink: Arc::new(TracingErrorSink),
            clock: Arc::new(SystemClock),
            events,
            page_size: DEFAULT_PAGE_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Logger configured from the `audit` settings section
    pub fn from_settings(store: Arc<dyn AuditStore>, settings: &AuditSettings) -> Self {
        Self::new(store)
            .with_page_size(settings.page_size)
            .with_write_timeout(Duration::from_millis(settings.write_timeout_ms))
            .with_stream_capacity(settings.stream_capacity)
    }

    /// Where write failures are reported
    pub fn with_error_sink(mut self, sink: Arc<dyn AuditErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Clock for entry timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Page size for [`query`](Self::query); zero is raised to one
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Upper bound on a single store append
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Replace the broadcast channel. Existing subscribers stop receiving.
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    /// Subscribe to entries as they are stored, in append order.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditLogEntry> {
        self.events.subscribe()
    }

    /// Record one access to protected data.
    ///
    /// A failed append is reported to the error sink before it is returned;
    /// callers on the business path may drop the error.
    #[instrument(skip_all, fields(actor_id = %actor_id, resource_type = %resource_type, action = %action))]
    pub async fn log_access(
        &self,
        actor_id: &str,
        resource_type: &str,
        resource_id: &str,
        action: AuditAction,
        accessed_fields: &[String],
        request: &RequestContext,
    ) -> Result<Uuid, AuditWriteError> {
        let entry = AuditLogEntry {
            id: Uuid::now_v7(),
            actor_id: actor_id.to_owned(),
            resource_type: resource_type.to_owned(),
            resource_id: resource_id.to_owned(),
            action,
            accessed_fields: accessed_fields.to_vec(),
            ip_address: request.ip_address.clone(),
            session_id: request.session_id.clone(),
            request_id: request.request_id.clone(),
            reason: request.reason.clone(),
            territory_id: request.territory_id.clone(),
            created_at: self.clock.now(),
        };

        let timeout_ms = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
        let outcome = match tokio::time::timeout(self.write_timeout, self.store.append(&entry)).await {
            Ok(result) => result,
            Err(_) => Err(AuditWriteError::Timeout { timeout_ms }),
        };

        match outcome {
            Ok(()) => {
                debug!(entry_id = %entry.id, "audit entry stored");
                let id = entry.id;
                // no subscribers is fine
                let _ = self.events.send(entry);
                Ok(id)
            }
            Err(err) => {
                error!(entry_id = %entry.id, error = %err, "failed to store audit entry");
                self.sink.report(&AuditFailure::new(&entry, &err, self.clock.now()));
                Err(err)
            }
        }
    }

    /// Lazily page through matching entries in append order.
    ///
    /// Each call starts from the first page, so the stream is restartable.
    /// A store error is yielded once and ends the stream.
    pub fn query(&self, filter: AuditFilter) -> BoxStream<'static, Result<AuditLogEntry, AuditQueryError>> {
        let store = Arc::clone(&self.store);
        let first = PageRequest::first(self.page_size);

        stream::unfold(Some(first), move |page| {
            let store = Arc::clone(&store);
            let filter = filter.clone();
            async move {
                let page = page?;
                match store.query(&filter, page).await {
                    Ok(entries) if entries.is_empty() => None,
                    Ok(entries) => {
                        let next = (entries.len() >= page.limit).then(|| page.next());
                        Some((entries.into_iter().map(Ok).collect::<Vec<_>>(), next))
                    }
                    Err(err) => Some((vec![Err(err)], None)),
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    /// Collect every matching entry.
    pub async fn query_all(&self, filter: AuditFilter) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        self.query(filter).try_collect().await
    }

    /// Compliance report for `period`, optionally scoped to one territory.
    ///
    /// Counts come from the stored log; access patterns are re-detected over
    /// the period's entries with the monitor's thresholds, and every
    /// unresolved incident raised before the period ended is listed.
    #[instrument(skip_all, fields(territory = territory_id.unwrap_or("all")))]
    pub async fn generate_report(
        &self,
        period: DateRange,
        territory_id: Option<&str>,
        monitor: &AccessPatternMonitor,
    ) -> Result<AuditReport, ReportError> {
        let mut filter = AuditFilter::new().within(period);
        if let Some(territory) = territory_id {
            filter = filter.territory(territory);
        }
        let entries = self.query_all(filter).await?;

        let mut by_action: BTreeMap<AuditAction, u64> = BTreeMap::new();
        let mut by_resource_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut actors = HashSet::new();
        for entry in &entries {
            *by_action.entry(entry.action).or_default() += 1;
            *by_resource_type.entry(entry.resource_type.clone()).or_default() += 1;
            actors.insert(entry.actor_id.as_str());
        }

        let access_patterns = monitor.detect_patterns(&entries);
        let open_incidents = monitor
            .list_incidents(None)
            .await?
            .into_iter()
            .filter(|incident| incident.status != IncidentStatus::Resolved)
            .filter(|incident| incident.created_at < period.end)
            .collect::<Vec<_>>();

        info!(
            total_events = entries.len(),
            patterns = access_patterns.len(),
            open_incidents = open_incidents.len(),
            "audit report generated"
        );

        Ok(AuditReport {
            period,
            territory_id: territory_id.map(str::to_owned),
            total_events: entries.len() as u64,
            by_action,
            by_resource_type,
            unique_actors: actors.len(),
            access_patterns,
            open_incidents,
            generated_at: self.clock.now(),
        })
    }

    /// Write every matching entry to `writer` as JSON lines. Returns the
    /// number of entries written.
    pub async fn export_jsonl<W>(&self, filter: AuditFilter, writer: &mut W) -> Result<usize, AuditQueryError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut entries = self.query(filter);
        let mut written = 0usize;

        while let Some(entry) = entries.next().await {
            let mut line = serde_json::to_vec(&entry?)
                .map_err(|e| AuditQueryError::Serialization(e.to_string()))?;
            line.push(b'\n');
            writer.write_all(&line).await.map_err(|e| AuditQueryError::Export(e.to_string()))?;
            written += 1;
        }
        writer.flush().await.map_err(|e| AuditQueryError::Export(e.to_string()))?;

        info!(entries = written, "audit export completed");
        Ok(written)
    }
}
