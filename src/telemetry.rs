//! Telemetry: fire-and-forget event dispatch so the core tick never awaits
//! a notification. A small sink trait lets the signal log, the
//! position-event log, and the trade-confirmation email all be registered
//! independently.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{OrderSide, PositionState};

/// Prefixes a log line with `[file:function:line]`, matching the context
/// format structured logs are expected to carry.
#[macro_export]
macro_rules! log_ctx {
    ($lvl:ident, $fmt:literal $(, $arg:expr)*) => {
        log::$lvl!(concat!("[{}:{}] ", $fmt), file!(), line!() $(, $arg)*);
    };
}

#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    Signal { symbol: String, side: OrderSide, entry: f64, sl: f64, tp: f64 },
    PositionEvent { ticket: u64, stage_id: String, sl: f64, tp: f64 },
    TradeEmail { subject: String, body: String },
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn dispatch(&self, event: &TelemetryEvent) -> Result<(), String>;
}

/// Appends structured one-line records to the process log via the `log`
/// crate — the always-on sink.
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn dispatch(&self, event: &TelemetryEvent) -> Result<(), String> {
        match event {
            TelemetryEvent::Signal { symbol, side, entry, sl, tp } => {
                log_ctx!(info, "signal symbol={} side={:?} entry={:.5} sl={:.5} tp={:.5}", symbol, side, entry, sl, tp);
            }
            TelemetryEvent::PositionEvent { ticket, stage_id, sl, tp } => {
                log_ctx!(info, "position_event ticket={} stage={} sl={:.5} tp={:.5}", ticket, stage_id, sl, tp);
            }
            TelemetryEvent::TradeEmail { subject, .. } => {
                log_ctx!(info, "email queued subject={}", subject);
            }
        }
        Ok(())
    }
}

/// Posts a best-effort webhook for trade-confirmation emails: a
/// fire-and-forget HTTP POST that never blocks the caller on failure.
pub struct EmailWebhookSink {
    client: reqwest::Client,
    url: String,
}

impl EmailWebhookSink {
    pub fn new(url: String) -> Self {
        EmailWebhookSink { client: reqwest::Client::new(), url }
    }
}

#[async_trait]
impl TelemetrySink for EmailWebhookSink {
    async fn dispatch(&self, event: &TelemetryEvent) -> Result<(), String> {
        let TelemetryEvent::TradeEmail { subject, body } = event else { return Ok(()) };
        let payload = serde_json::json!({ "subject": subject, "body": body });
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("webhook status {}", resp.status())),
            Err(e) => Err(format!("webhook send failed: {}", e)),
        }
    }
}

/// Handle cloned into every call site; enqueues onto an unbounded channel
/// drained by a single background task. Queue-full or sink errors are
/// logged at `warn!` and never propagate to the caller.
#[derive(Clone)]
pub struct Telemetry {
    tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl Telemetry {
    pub fn spawn(sinks: Vec<Box<dyn TelemetrySink>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for sink in &sinks {
                    if let Err(e) = sink.dispatch(&event).await {
                        log_ctx!(warn, "telemetry sink failed: {}", e);
                    }
                }
            }
        });
        Telemetry { tx }
    }

    fn enqueue(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            log_ctx!(warn, "telemetry channel closed, dropping event");
        }
    }

    pub fn log_signal(&self, symbol: &str, side: OrderSide, entry: f64, sl: f64, tp: f64) {
        self.enqueue(TelemetryEvent::Signal { symbol: symbol.to_string(), side, entry, sl, tp });
    }

    pub fn log_position_event(&self, position: &PositionState, stage_id: &str, sl: f64, tp: f64) {
        self.enqueue(TelemetryEvent::PositionEvent { ticket: position.ticket, stage_id: stage_id.to_string(), sl, tp });
    }

    pub fn send_trade_email_async(&self, subject: &str, body: &str) {
        self.enqueue(TelemetryEvent::TradeEmail { subject: subject.to_string(), body: body.to_string() });
    }
}
