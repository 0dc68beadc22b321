//! # Span Reporter Demo
//!
//! Runs the reporter end to end against a simulated collector:
//!
//! - A custom `Transport` with per-send latency that rejects every Nth message
//! - Several producer threads calling `report` concurrently
//! - Spans with endpoints, annotations, tags and the occasional error
//! - Live queue gauges while the worker drains
//! - Graceful `close` and a final metrics summary
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (2 producers, 500 spans each)
//! cargo run -p span_reporter --bin demo --release -- --quick
//!
//! # Full mode (8 producers, 5000 spans each)
//! cargo run -p span_reporter --bin demo --release
//! ```

use bytes::Bytes;
use span_reporter::{
    AsyncReporter, Encoding, Endpoint, InMemoryReporterMetrics, RecordedError, ReporterConfig, Span,
    SpanBuildError, SpanKind, Transport, TransportError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Simulated collector: sleeps per send and rejects every `fail_every`th message.
struct SimulatedCollector {
    latency: Duration,
    fail_every: u64,
    sends: AtomicU64,
    spans_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl SimulatedCollector {
    fn new(latency: Duration, fail_every: u64) -> Self {
        Self {
            latency,
            fail_every,
            sends: AtomicU64::new(0),
            spans_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }
}

impl Transport for SimulatedCollector {
    fn encoding(&self) -> Encoding {
        Encoding::Proto3
    }

    fn message_max_bytes(&self) -> usize {
        64 * 1024
    }

    async fn send(&self, encoded_spans: Vec<Bytes>) -> Result<(), TransportError> {
        tokio::time::sleep(self.latency).await;
        let attempt = self.sends.fetch_add(1, Ordering::Relaxed) + 1;
        if attempt % self.fail_every == 0 {
            return Err(TransportError::Rejected {
                status: 503,
                message: "collector overloaded".into(),
            });
        }
        let bytes: usize = encoded_spans.iter().map(Bytes::len).sum();
        self.spans_received
            .fetch_add(encoded_spans.len() as u64, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

const OPERATIONS: [&str; 5] = ["GET /users", "POST /orders", "db.query", "cache.get", "publish"];

fn make_span(producer: u64, seq: u64) -> Result<Span, SpanBuildError> {
    let start = span_reporter::now_micros();
    let mut builder = Span::builder()
        .trace_id(format!("{:016x}{:016x}", producer + 1, seq / 10 + 1))
        .id(format!("{:016x}", (producer << 40) | (seq + 1)))
        .name(OPERATIONS[(seq % 5) as usize])
        .kind(if seq % 2 == 0 { SpanKind::Server } else { SpanKind::Client })
        .start_timestamp(start)
        .finish_timestamp(start + 150 + seq % 1_000)
        .local_endpoint(Endpoint {
            service_name: Some(format!("service-{}", producer)),
            ip: Some(format!("10.0.{}.{}", producer, seq % 250 + 1)),
            port: 8080,
        })
        .annotation(start + 10, "wire.send")
        .tag("producer.id", producer.to_string())
        .tag("seq", seq.to_string());
    if seq % 10 != 0 {
        builder = builder.parent_id(format!("{:016x}", (producer << 40) | (seq / 10 * 10 + 1)));
    }
    if seq % 13 == 0 {
        builder = builder.error(RecordedError::new("Timeout").with_message("upstream timed out"));
    }
    builder.build()
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let quick = args.iter().any(|a| a == "--quick");
    let (producers, spans_per_producer) = if quick { (2u64, 500u64) } else { (8, 5_000) };

    println!("╔══════════════════════════════════════════════╗");
    println!("║            Span Reporter Demo                ║");
    println!("╚══════════════════════════════════════════════╝");
    println!("producers: {}, spans per producer: {}", producers, spans_per_producer);

    let collector = Arc::new(SimulatedCollector::new(Duration::from_millis(2), 7));
    let metrics = Arc::new(InMemoryReporterMetrics::new());
    let config = ReporterConfig::default()
        .with_message_timeout(Duration::from_millis(50))
        .with_close_timeout(Duration::from_secs(5))
        .with_queued_max_spans(20_000);

    let reporter = match AsyncReporter::builder(collector.clone())
        .config(config)
        .metrics(metrics.clone())
        .build()
    {
        Ok(reporter) => Arc::new(reporter),
        Err(e) => {
            eprintln!("failed to build reporter: {}", e);
            return;
        }
    };

    let started = Instant::now();
    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let reporter = Arc::clone(&reporter);
            std::thread::spawn(move || {
                for seq in 0..spans_per_producer {
                    match make_span(producer, seq) {
                        Ok(span) => reporter.report(&span),
                        Err(e) => {
                            eprintln!("producer {}: {}", producer, e);
                            return;
                        }
                    }
                }
            })
        })
        .collect();

    while handles.iter().any(|h| !h.is_finished()) || reporter.queued_spans() > 0 {
        println!(
            "  queued: {:>6} spans / {:>8} bytes   messages: {:>5}",
            reporter.queued_spans(),
            reporter.queued_bytes(),
            metrics.messages()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    for handle in handles {
        if handle.join().is_err() {
            eprintln!("producer thread panicked");
        }
    }

    reporter.close().await;
    let elapsed = started.elapsed();

    println!();
    println!("── Summary ─────────────────────────────────────");
    println!("spans reported:      {}", metrics.spans());
    println!("span bytes:          {}", metrics.span_bytes());
    println!("messages:            {}", metrics.messages());
    println!("message bytes:       {}", metrics.message_bytes());
    println!(
        "messages dropped:    {} (rejected: {})",
        metrics.messages_dropped(),
        metrics.messages_dropped_by(&TransportError::Rejected {
            status: 0,
            message: String::new()
        })
    );
    println!("spans dropped:       {}", metrics.spans_dropped());
    println!(
        "collector received:  {} spans, {} bytes",
        collector.spans_received.load(Ordering::Relaxed),
        collector.bytes_received.load(Ordering::Relaxed)
    );
    println!(
        "throughput:          {:.0} spans/s",
        metrics.spans() as f64 / elapsed.as_secs_f64()
    );
}
