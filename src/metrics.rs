//! Prometheus metrics for the dumper.
//!
//! Exposes:
//! - `fulldump_command_duration_seconds` (histogram)
//! - `fulldump_command_total` (counter with status)
//! - `fulldump_command_inflight` (gauge)
//! - `fulldump_pages_total`, `fulldump_messages_total` (harvest counters)
//! - `fulldump_fetch_retries_total` (failed page requests that were retried)
//! - `fulldump_channels_total` (finished channels by status)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 1s up to ~9 hours; full dumps run long.
    let buckets =
        prometheus::exponential_buckets(1.0, 2.0, 16).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "fulldump_command_duration_seconds",
        "Command duration in seconds",
        &["command"],
        buckets
    )
    .expect("failed to register command duration histogram")
});

static COMMAND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fulldump_command_total",
        "Total command executions by status",
        &["command", "status"]
    )
    .expect("failed to register command counter")
});

static COMMAND_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "fulldump_command_inflight",
        "Number of in-flight commands",
        &["command"]
    )
    .expect("failed to register inflight gauge")
});

static PAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("fulldump_pages_total", "Non-empty history pages fetched")
        .expect("failed to register page counter")
});

static MESSAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("fulldump_messages_total", "Messages received from history pages")
        .expect("failed to register message counter")
});

static RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fulldump_fetch_retries_total",
        "History page requests that failed and were retried"
    )
    .expect("failed to register retry counter")
});

static CHANNELS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fulldump_channels_total",
        "Channels processed by final status",
        &["status"]
    )
    .expect("failed to register channel counter")
});

/// Final state of one channel's dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Written,
    /// Nothing to dump; the output file was removed.
    Empty,
    Failed,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Written => "written",
            ChannelStatus::Empty => "empty",
            ChannelStatus::Failed => "failed",
        }
    }
}

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&COMMAND_DURATION);
    Lazy::force(&COMMAND_TOTAL);
    Lazy::force(&COMMAND_INFLIGHT);
    Lazy::force(&PAGES_TOTAL);
    Lazy::force(&MESSAGES_TOTAL);
    Lazy::force(&RETRIES_TOTAL);
    Lazy::force(&CHANNELS_TOTAL);
}

/// Increment inflight gauge for a command.
pub fn record_command_start(command: &'static str) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).inc();
}

/// Record command completion with duration and status.
pub fn record_command_result(command: &'static str, duration: Duration, success: bool) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).dec();
    COMMAND_DURATION
        .with_label_values(&[command])
        .observe(duration.as_secs_f64());
    COMMAND_TOTAL
        .with_label_values(&[command, if success { "ok" } else { "error" }])
        .inc();
}

/// One non-empty page carrying `messages` new messages.
pub fn record_page(messages: usize) {
    PAGES_TOTAL.inc();
    MESSAGES_TOTAL.inc_by(messages as u64);
}

pub fn record_retry() {
    RETRIES_TOTAL.inc();
}

pub fn record_channel(status: ChannelStatus) {
    CHANNELS_TOTAL.with_label_values(&[status.as_str()]).inc();
}

fn plain_response(status: StatusCode, body: Full<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            Full::from("encode error"),
        ));
    }

    let mut response = plain_response(StatusCode::OK, Full::from(buffer));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(plain_response(StatusCode::NOT_FOUND, Full::new(Bytes::new()))),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn scrape() -> String {
        let response = metrics_response().await.expect("metrics response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn records_successful_command_metrics() {
        let cmd = "test_command_metrics_success";

        record_command_start(cmd);
        assert_eq!(COMMAND_INFLIGHT.with_label_values(&[cmd]).get(), 1);

        record_command_result(cmd, Duration::from_millis(120), true);

        assert_eq!(COMMAND_INFLIGHT.with_label_values(&[cmd]).get(), 0);
        assert_eq!(COMMAND_TOTAL.with_label_values(&[cmd, "ok"]).get(), 1);
        assert_eq!(
            COMMAND_DURATION
                .with_label_values(&[cmd])
                .get_sample_count(),
            1
        );
    }

    #[test]
    fn records_failed_command_metrics() {
        let cmd = "test_command_metrics_error";

        record_command_start(cmd);
        record_command_result(cmd, Duration::from_secs(2), false);

        assert_eq!(COMMAND_TOTAL.with_label_values(&[cmd, "error"]).get(), 1);
    }

    // Harvest counters are process-wide and other tests bump them too, so
    // only lower bounds are checked.
    #[test]
    fn page_and_retry_counters_accumulate() {
        let pages = PAGES_TOTAL.get();
        let messages = MESSAGES_TOTAL.get();
        let retries = RETRIES_TOTAL.get();

        record_page(100);
        record_page(7);
        record_retry();

        assert!(PAGES_TOTAL.get() >= pages + 2);
        assert!(MESSAGES_TOTAL.get() >= messages + 107);
        assert!(RETRIES_TOTAL.get() >= retries + 1);
    }

    #[test]
    fn channels_counted_by_status() {
        let failed = CHANNELS_TOTAL.with_label_values(&["failed"]).get();
        record_channel(ChannelStatus::Failed);
        assert!(CHANNELS_TOTAL.with_label_values(&["failed"]).get() > failed);
    }

    #[tokio::test]
    async fn metrics_response_contains_registered_metrics() {
        let cmd = "test_metrics_response";
        record_command_start(cmd);
        record_command_result(cmd, Duration::from_millis(10), true);
        record_channel(ChannelStatus::Written);

        let text = scrape().await;
        assert!(text.contains("fulldump_command_total"));
        assert!(text.contains("fulldump_command_duration_seconds"));
        assert!(text.contains("fulldump_channels_total"));
        assert!(text.contains(cmd));
    }

    #[tokio::test]
    async fn metrics_response_has_text_content_type() {
        let response = metrics_response().await.expect("metrics response");
        let content_type = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .expect("content type");
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }
}
