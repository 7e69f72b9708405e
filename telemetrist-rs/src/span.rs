//! Request spans and B3 trace-context propagation
//!
//! Every unit of work (inbound request, upstream call, synthetic sleep) gets a
//! [`SpanHandle`]. The handle finishes exactly once: explicitly through
//! [`SpanHandle::finished`] or implicitly when dropped, so early returns and
//! cancelled futures still log and time the span.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::metrics::record_timing;

pub const TRACE_ID_HEADER: &str = "x-b3-traceid";
pub const SPAN_ID_HEADER: &str = "x-b3-spanid";
pub const PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
pub const SAMPLED_HEADER: &str = "x-b3-sampled";

/// Trace linkage carried across service boundaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub sampled: bool,
}

impl SpanContext {
    /// Start a new trace
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// A span inside the same trace whose parent is `self`
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
        }
    }

    /// Header name/value pairs to attach to an outbound call
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (TRACE_ID_HEADER, self.trace_id.clone()),
            (SPAN_ID_HEADER, self.span_id.clone()),
            (SAMPLED_HEADER, if self.sampled { "1" } else { "0" }.to_string()),
        ];
        if let Some(parent) = &self.parent_span_id {
            headers.push((PARENT_SPAN_ID_HEADER, parent.clone()));
        }
        headers
    }

    /// Read a context from inbound headers; both ids must be present
    pub fn from_headers<'a, F>(get: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let trace_id = get(TRACE_ID_HEADER).filter(|v| !v.is_empty())?;
        let span_id = get(SPAN_ID_HEADER).filter(|v| !v.is_empty())?;
        let sampled = !matches!(get(SAMPLED_HEADER), Some("0") | Some("false"));

        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: get(PARENT_SPAN_ID_HEADER).map(str::to_string),
            sampled,
        })
    }
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Creates spans for the request lifecycle
#[derive(Debug, Clone, Default)]
pub struct Logger;

impl Logger {
    pub fn new() -> Self {
        Self
    }

    /// Span for an inbound request, continuing `parent` when the caller sent one
    pub fn handle_request(&self, transport: &str, parent: Option<SpanContext>) -> SpanHandle {
        let context = parent.map(|p| p.child()).unwrap_or_else(SpanContext::new_root);
        let span = tracing::info_span!(
            "handle_request",
            transport = %transport,
            trace_id = %context.trace_id,
            span_id = %context.span_id,
        );
        SpanHandle::new("handle_request", "service.request.duration", span, context)
    }

    /// Span for one outbound upstream call
    pub fn call_upstream(&self, uri: &str, parent: &SpanContext) -> SpanHandle {
        let context = parent.child();
        let span = tracing::info_span!(
            "call_upstream",
            upstream = %uri,
            trace_id = %context.trace_id,
            span_id = %context.span_id,
        );
        let mut handle =
            SpanHandle::new("call_upstream", "upstream.request.duration", span, context);
        handle.set_metadata("upstream", uri);
        handle
    }

    /// Span covering the synthetic latency of a request
    pub fn sleep_service(&self, parent: &SpanContext, duration: Duration) -> SpanHandle {
        let context = parent.child();
        let span = tracing::debug_span!(
            "service_delay",
            trace_id = %context.trace_id,
            delay = ?duration,
        );
        SpanHandle::new("service_delay", "service.sleep.duration", span, context)
    }
}

/// A running span; finishes on [`SpanHandle::finished`] or drop
pub struct SpanHandle {
    operation: &'static str,
    metric: &'static str,
    span: tracing::Span,
    context: SpanContext,
    started: Instant,
    metadata: BTreeMap<String, String>,
    error: Option<String>,
    done: bool,
}

impl SpanHandle {
    fn new(
        operation: &'static str,
        metric: &'static str,
        span: tracing::Span,
        context: SpanContext,
    ) -> Self {
        Self {
            operation,
            metric,
            span,
            context,
            started: Instant::now(),
            metadata: BTreeMap::new(),
            error: None,
            done: false,
        }
    }

    pub fn set_error(&mut self, err: impl fmt::Display) {
        self.error = Some(err.to_string());
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.metadata.insert(key.into(), value.to_string());
    }

    /// Context to propagate to nested calls
    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    /// The underlying `tracing` span, for instrumenting futures
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Log completion and emit the timing; later calls do nothing
    pub fn finished(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        let elapsed = self.started.elapsed();

        let _entered = self.span.enter();
        match &self.error {
            Some(err) => tracing::warn!(
                operation = self.operation,
                elapsed = ?elapsed,
                metadata = ?self.metadata,
                error = %err,
                "Span finished with error"
            ),
            None => tracing::debug!(
                operation = self.operation,
                elapsed = ?elapsed,
                metadata = ?self.metadata,
                "Span finished"
            ),
        }

        record_timing(self.metric, elapsed, &self.metadata, self.error.is_some());
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.finished();
    }
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("operation", &self.operation)
            .field("context", &self.context)
            .field("error", &self.error)
            .field("done", &self.done)
            .finish()
    }
}
