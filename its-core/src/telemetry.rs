//! Lightweight OpenTelemetry-style span model and OTLP/JSON exporter.
//!
//! Spans are cheap, locally-generated, and optional: when no collector is
//! configured, `NoExportSpanFactory` still manufactures valid trace/span
//! ids (so `traceparent` propagation across MQTT keeps working end to end)
//! but never queues anything for export.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Span kind, mirroring the OTel `SpanKind` enum used by `iot3.core.otel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    fn as_otlp_int(self) -> u8 {
        match self {
            SpanKind::Internal => 1,
            SpanKind::Server => 2,
            SpanKind::Client => 3,
            SpanKind::Producer => 4,
            SpanKind::Consumer => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

fn random_hex(bytes: usize) -> String {
    (0..bytes).map(|_| format!("{:02x}", rand::random::<u8>())).collect()
}

/// A span: created via a `SpanFactory`, updated through its lifetime, and
/// finished with `end()`. Finishing a span not obtained from an exporting
/// factory is a no-op beyond bookkeeping.
#[derive(Debug, Clone)]
pub struct Span {
    trace_id: String,
    span_id: String,
    parent_id: Option<String>,
    name: String,
    kind: SpanKind,
    attributes: HashMap<String, Value>,
    links: Vec<String>,
    status: SpanStatus,
    start: std::time::SystemTime,
    queue: Option<Arc<SpanQueue>>,
}

impl Span {
    fn new(name: &str, kind: SpanKind, parent: Option<&Span>, queue: Option<Arc<SpanQueue>>) -> Self {
        let (trace_id, parent_id) = match parent {
            Some(p) => (p.trace_id.clone(), Some(p.span_id.clone())),
            None => (random_hex(16), None),
        };
        Span {
            trace_id,
            span_id: random_hex(8),
            parent_id,
            name: name.to_string(),
            kind,
            attributes: HashMap::new(),
            links: Vec::new(),
            status: SpanStatus::Unset,
            start: std::time::SystemTime::now(),
            queue,
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Record a link to another span's `traceparent`, e.g. the publisher's
    /// span id when this span represents the matching consume.
    pub fn add_link(&mut self, traceparent: &str) {
        self.links.push(traceparent.to_string());
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    /// W3C `traceparent` header value for this span: `00-<trace_id>-<span_id>-00`.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-00", self.trace_id, self.span_id)
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.push_ref(self);
        }
    }
}

/// Default bounded span queue capacity (spec.md §4.8).
const DEFAULT_QUEUE_CAPACITY: usize = 1023;

struct SpanQueue {
    capacity: usize,
    buffer: Mutex<VecDeque<Span>>,
}

impl SpanQueue {
    fn new(capacity: usize) -> Self {
        SpanQueue { capacity, buffer: Mutex::new(VecDeque::new()) }
    }

    fn push(&self, span: Span) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            debug!("telemetry span queue full ({} spans); dropping {}", self.capacity, span.name);
            return;
        }
        buffer.push_back(span);
    }

    fn push_ref(&self, span: &Span) {
        self.push(span.clone());
    }

    fn drain_batch(&self) -> Vec<Span> {
        let mut buffer = self.buffer.lock();
        buffer.drain(..).collect()
    }
}

/// Produces spans for a given component. Implementations decide whether
/// spans are ever actually exported.
pub trait SpanFactory: Send + Sync {
    fn start(&self, name: &str, kind: SpanKind) -> Span;

    fn start_child(&self, name: &str, kind: SpanKind, parent: &Span) -> Span {
        let mut child = self.start(name, kind);
        child.trace_id = parent.trace_id.clone();
        child.parent_id = Some(parent.span_id.clone());
        child
    }
}

/// Telemetry disabled: spans get real ids (so `traceparent` keeps flowing)
/// but are never queued for export.
pub struct NoExportSpanFactory;

impl SpanFactory for NoExportSpanFactory {
    fn start(&self, name: &str, kind: SpanKind) -> Span {
        Span::new(name, kind, None, None)
    }
}

/// Batches finished spans and ships them to an OTLP/JSON-over-HTTP
/// collector, the way `iot3.core.otel` does for the Python stack.
pub struct OtelSpanFactory {
    service_name: String,
    queue: Arc<SpanQueue>,
}

impl OtelSpanFactory {
    /// Spawn the factory and its background flush task. `endpoint` is the
    /// collector's OTLP/HTTP traces endpoint (e.g.
    /// `http://collector:4318/v1/traces`).
    pub fn spawn(service_name: impl Into<String>, endpoint: String, flush_interval: Duration) -> Arc<Self> {
        let factory = Arc::new(OtelSpanFactory {
            service_name: service_name.into(),
            queue: Arc::new(SpanQueue::new(DEFAULT_QUEUE_CAPACITY)),
        });
        let worker = factory.clone();
        tokio::spawn(async move {
            worker.run_exporter(endpoint, flush_interval).await;
        });
        factory
    }

    async fn run_exporter(&self, endpoint: String, flush_interval: Duration) {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            ticker.tick().await;
            let batch = self.queue.drain_batch();
            if batch.is_empty() {
                continue;
            }
            let body = self.to_otlp_json(&batch);
            if let Err(e) = client.post(&endpoint).json(&body).send().await {
                warn!("telemetry export to {endpoint} failed: {e}");
            }
        }
    }

    fn to_otlp_json(&self, spans: &[Span]) -> Value {
        let resource_spans: Vec<Value> = spans
            .iter()
            .map(|s| {
                json!({
                    "traceId": s.trace_id,
                    "spanId": s.span_id,
                    "parentSpanId": s.parent_id,
                    "name": s.name,
                    "kind": s.kind.as_otlp_int(),
                    "status": match s.status {
                        SpanStatus::Unset => "UNSET",
                        SpanStatus::Ok => "OK",
                        SpanStatus::Error => "ERROR",
                    },
                    "attributes": s.attributes,
                    "links": s.links,
                })
            })
            .collect();
        json!({
            "resourceSpans": [{
                "resource": { "attributes": { "service.name": self.service_name } },
                "scopeSpans": [{ "spans": resource_spans }],
            }],
        })
    }
}

impl SpanFactory for OtelSpanFactory {
    fn start(&self, name: &str, kind: SpanKind) -> Span {
        Span::new(name, kind, None, Some(self.queue.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceparent_has_expected_shape() {
        let span = NoExportSpanFactory.start("test", SpanKind::Internal);
        let tp = span.to_traceparent();
        let parts: Vec<&str> = tp.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "00");
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3], "00");
    }

    #[test]
    fn queue_drops_newest_when_full() {
        let queue = SpanQueue::new(2);
        queue.push(Span::new("a", SpanKind::Internal, None, None));
        queue.push(Span::new("b", SpanKind::Internal, None, None));
        queue.push(Span::new("c", SpanKind::Internal, None, None));
        let batch = queue.drain_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].name, "a");
        assert_eq!(batch[1].name, "b");
    }
}
