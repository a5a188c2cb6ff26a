//! Telemetry recording and sink plumbing.
//!
//! Every request, whatever its outcome, produces exactly one telemetry
//! record: a fresh trace id, derived metrics (length ratio, token
//! throughput), a tagged set of numeric samples for dashboards, an optional
//! incident event for paging, and one structured JSON line for offline
//! forensic replay.  Three consumers, three shapes of the same fact.
//!
//! Sink failures are swallowed: observability must never become a
//! reliability hazard for the serving path.

use std::fs;
use std::io::Write;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::classifier::RiskVerdict;
use crate::pipeline::UsageStats;
use crate::util::{sanitize_snippet, truncate_chars};

/// Alert severity for incident events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// Destination for tagged numeric samples and discrete incident events.
/// Implementations are fire-and-forget; errors stay inside the sink.
pub trait MetricsSink: Send + Sync {
    fn gauge(&self, name: &str, value: f64, tags: &[String]);
    fn incr(&self, name: &str, tags: &[String]);
    fn event(&self, title: &str, text: &str, severity: Severity, tags: &[String]);
}

/// Destination for structured per-request records.  Best-effort.
pub trait LogSink: Send + Sync {
    fn append(&self, record: &serde_json::Value);
}

/// DogStatsD datagrams over UDP.  The socket is unconnected; every sample is
/// a single `send_to` with any error dropped on the floor.
pub struct StatsdSink {
    socket: Option<UdpSocket>,
    addr: String,
}

impl StatsdSink {
    pub fn new(addr: String) -> Self {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error=%e, "failed to bind statsd socket; metrics disabled");
                None
            }
        };
        Self { socket, addr }
    }

    fn send(&self, datagram: &str) {
        if let Some(socket) = &self.socket {
            let _ = socket.send_to(datagram.as_bytes(), &self.addr);
        }
    }

    fn format_tags(tags: &[String]) -> String {
        if tags.is_empty() {
            String::new()
        } else {
            format!("|#{}", tags.join(","))
        }
    }
}

impl MetricsSink for StatsdSink {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) {
        self.send(&format!("{}:{}|g{}", name, value, Self::format_tags(tags)));
    }

    fn incr(&self, name: &str, tags: &[String]) {
        self.send(&format!("{}:1|c{}", name, Self::format_tags(tags)));
    }

    fn event(&self, title: &str, text: &str, severity: Severity, tags: &[String]) {
        // DogStatsD event datagram; newlines in the body are escaped per the
        // wire format, lengths are byte counts.
        let escaped = text.replace('\n', "\\n");
        self.send(&format!(
            "_e{{{},{}}}:{}|{}|t:{}{}",
            title.len(),
            escaped.len(),
            title,
            escaped,
            severity.as_str(),
            Self::format_tags(tags)
        ));
    }
}

/// Simple size-based rotating writer (numbered backups, optional gzip of the
/// freshest backup).
pub struct RotatingWriter {
    path: PathBuf,
    file: std::fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(
        path: &str,
        max_bytes: Option<u64>,
        keep: usize,
        compress: bool,
    ) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes,
            keep,
            compress,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.check_rotate();
        writeln!(self.file, "{}", line)
    }

    fn check_rotate(&mut self) {
        if let Some(limit) = self.max_bytes {
            if self.exceeds_limit(limit) {
                self.rotate_backups();
                self.compress_latest_backup();
                self.reopen_current();
            }
        }
    }

    fn exceeds_limit(&self, limit: u64) -> bool {
        self.path
            .metadata()
            .map(|meta| meta.len() >= limit)
            .unwrap_or(false)
    }

    fn rotate_backups(&self) {
        if self.keep == 0 {
            return;
        }
        for idx in (1..=self.keep).rev() {
            let old = if idx == 1 {
                self.path.clone()
            } else {
                self.path.with_extension(format!("{}", idx - 1))
            };
            if old.exists() {
                let new = self.path.with_extension(format!("{}", idx));
                let _ = fs::rename(&old, &new);
            }
        }
    }

    fn compress_latest_backup(&self) {
        if !self.compress || self.keep == 0 {
            return;
        }
        let rotated = self.path.with_extension("1");
        if let Ok(data) = fs::read(&rotated) {
            let gz_path = rotated.with_extension("1.gz");
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            if gz.write_all(&data).is_ok() {
                if let Ok(buf) = gz.finish() {
                    let _ = fs::write(&gz_path, buf);
                    let _ = fs::remove_file(&rotated);
                }
            }
        }
    }

    fn reopen_current(&mut self) {
        if let Ok(newf) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = newf;
        }
    }
}

/// Newline-delimited JSON records over a rotating file.  The offline monitor
/// consumes this format; field names are part of the contract.
pub struct JsonLogSink {
    writer: Arc<Mutex<RotatingWriter>>,
}

impl JsonLogSink {
    pub fn new(writer: RotatingWriter) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

impl LogSink for JsonLogSink {
    fn append(&self, record: &serde_json::Value) {
        let line = record.to_string();
        if let Ok(mut guard) = self.writer.lock() {
            if let Err(e) = guard.write_line(&line) {
                tracing::warn!(error=%e, "failed to write telemetry log line");
            }
        }
    }
}

/// Service tag attached to every sample and record.
const SERVICE_NAME: &str = "llm-sentinel";

/// Builds one correlated telemetry record per request and fans it out to the
/// metrics and log sinks.  Always returns a trace id, even with every sink
/// missing or failing.
pub struct TelemetryRecorder {
    metrics: Option<Arc<dyn MetricsSink>>,
    log: Option<Arc<dyn LogSink>>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn new_trace_id() -> String {
    let mut id = uuid::Uuid::new_v4().to_string();
    id.truncate(13);
    id
}

impl TelemetryRecorder {
    pub fn new(metrics: Option<Arc<dyn MetricsSink>>, log: Option<Arc<dyn LogSink>>) -> Self {
        if metrics.is_none() {
            tracing::warn!("metrics disabled: no metrics sink configured");
        }
        if log.is_none() {
            tracing::warn!("telemetry log disabled: LOG_FILE not set");
        }
        Self { metrics, log }
    }

    /// Record one request.  Returns the trace id, the sole externally
    /// visible correlation key, generated on every path.
    pub fn record(
        &self,
        prompt: &str,
        response: &str,
        usage: &UsageStats,
        verdict: &RiskVerdict,
        latency_ms: u64,
        error: bool,
    ) -> String {
        let trace_id = new_trace_id();

        let prompt_len = prompt.chars().count() as u64;
        let response_len = response.chars().count() as u64;
        let length_ratio = round2(response_len as f64 / prompt_len.max(1) as f64);
        let tps = if latency_ms > 0 {
            round2(usage.output_tokens as f64 / (latency_ms as f64 / 1000.0))
        } else {
            0.0
        };

        let snippet = sanitize_snippet(prompt, 40);
        let tags = vec![
            format!("service:{}", SERVICE_NAME),
            format!("trace_id:{}", trace_id),
            format!("model:{}", usage.model_id),
            format!("prompt_snippet:{}", snippet),
            format!("risk_level:{}", verdict.risk.as_str()),
            format!("category:{}", verdict.category.as_str()),
        ];

        if let Some(metrics) = &self.metrics {
            metrics.gauge("sentinel.llm.latency", latency_ms as f64, &tags);
            metrics.gauge("sentinel.llm.length_ratio", length_ratio, &tags);
            metrics.gauge("sentinel.llm.tps", tps, &tags);
            metrics.incr("sentinel.llm.requests", &tags);
            if error {
                metrics.incr("sentinel.llm.error", &tags);
            }
            if verdict.injection_detected || verdict.policy_violation {
                metrics.incr("sentinel.llm.security_violation", &tags);
            }
            if error || verdict.is_high_risk() {
                let severity = if error {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                let title = format!("LLM Incident: {}", trace_id);
                let text = format!(
                    "Model: {}\nRatio: {}\nSnippet: {}...\nRemediation: High latency or risk detected. Investigate token size or fallback to Flash.",
                    usage.model_id,
                    length_ratio,
                    truncate_chars(prompt, 100)
                );
                metrics.event(&title, &text, severity, &tags);
            }
        }

        // Forensic record. Field names (`latency_ms`, `prompt`, `error`,
        // `prompt_injection`, `security.category`) are consumed by the
        // offline monitor and must stay stable.
        let record = serde_json::json!({
            "timestamp": chrono::Utc::now().timestamp(),
            "trace_id": trace_id,
            "prompt": prompt,
            "response": response,
            "prompt_length": prompt_len,
            "response_length": response_len,
            "latency_ms": latency_ms,
            "length_ratio": length_ratio,
            "tokens_per_second": tps,
            "error": error,
            "prompt_injection": verdict.injection_detected,
            "security": verdict,
        });
        if let Some(log) = &self.log {
            log.append(&record);
        }
        tracing::info!(
            target = "telemetry",
            trace_id = %trace_id,
            latency_ms,
            length_ratio,
            tokens_per_second = tps,
            error,
            risk = verdict.risk.as_str(),
            category = verdict.category.as_str(),
            "request recorded"
        );

        trace_id
    }
}
