//! Status HTTP endpoint
//!
//! - `GET /health` - liveness
//! - `GET /metrics` - relay metrics in Prometheus text format
//! - `GET|POST /update-devices` - refresh the device allow-list now
//!
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::allow_list::AllowListRefresher;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum {}", avg * count);
    let _ = writeln!(output, "{name}_count {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary) -> String {
    let mut output = String::with_capacity(4096);

    write_poll_metrics(&mut output, summary);
    write_dedup_metrics(&mut output, summary);
    write_forward_metrics(&mut output, summary);
    write_allow_list_metrics(&mut output, summary);

    output
}

fn write_poll_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_ticks_total",
        "Poll ticks run",
        MetricType::Counter,
        summary.ticks_total,
    );
    write_metric(
        output,
        "relay_fetch_errors_total",
        "Feed fetches that failed",
        MetricType::Counter,
        summary.fetch_errors_total,
    );
    write_histogram(
        output,
        "relay_fetch_latency_ms",
        "Feed fetch latency in milliseconds",
        &summary.fetch_lat_buckets,
        summary.fetch_lat_avg_ms,
    );
    write_metric(
        output,
        "relay_fetch_latency_p99_ms",
        "99th percentile feed fetch latency",
        MetricType::Gauge,
        summary.fetch_lat_p99_ms,
    );
    write_metric(
        output,
        "relay_rows_total",
        "Feed rows read",
        MetricType::Counter,
        summary.rows_total,
    );
    write_metric(
        output,
        "relay_rows_skipped_total",
        "Malformed feed rows skipped",
        MetricType::Counter,
        summary.rows_skipped_total,
    );
    write_metric(
        output,
        "relay_rows_unrecognized_total",
        "Feed rows with an unknown row mode",
        MetricType::Counter,
        summary.rows_unrecognized_total,
    );
}

fn write_dedup_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_passings_novel_total",
        "Passings not seen within the dedup span",
        MetricType::Counter,
        summary.passings_novel_total,
    );
    write_metric(
        output,
        "relay_passings_suppressed_total",
        "Passings suppressed as duplicates",
        MetricType::Counter,
        summary.passings_suppressed_total,
    );
    write_metric(
        output,
        "relay_status_novel_total",
        "Status pings not seen within the dedup span",
        MetricType::Counter,
        summary.status_novel_total,
    );
    write_metric(
        output,
        "relay_status_suppressed_total",
        "Status pings suppressed as duplicates",
        MetricType::Counter,
        summary.status_suppressed_total,
    );
    write_metric(
        output,
        "relay_passing_window_size",
        "Entries in the passing dedup window",
        MetricType::Gauge,
        summary.passing_window_size,
    );
    write_metric(
        output,
        "relay_status_window_size",
        "Entries in the status dedup window",
        MetricType::Gauge,
        summary.status_window_size,
    );
}

fn write_forward_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_passings_forwarded_total",
        "Passings accepted downstream",
        MetricType::Counter,
        summary.passings_forwarded_total,
    );
    write_metric(
        output,
        "relay_status_forwarded_total",
        "Status pings accepted downstream",
        MetricType::Counter,
        summary.status_forwarded_total,
    );
    write_metric(
        output,
        "relay_not_allowed_total",
        "Novel events dropped for devices outside the allow-list",
        MetricType::Counter,
        summary.not_allowed_total,
    );
    write_metric(
        output,
        "relay_forward_errors_total",
        "Downstream calls that failed or timed out",
        MetricType::Counter,
        summary.forward_errors_total,
    );
}

fn write_allow_list_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_allow_list_refreshes_total",
        "Successful allow-list refreshes",
        MetricType::Counter,
        summary.allow_list_refreshes_total,
    );
    write_metric(
        output,
        "relay_allow_list_refresh_errors_total",
        "Failed allow-list refreshes",
        MetricType::Counter,
        summary.allow_list_refresh_errors_total,
    );
    write_metric(
        output,
        "relay_allow_list_size",
        "Devices in the current allow-list",
        MetricType::Gauge,
        summary.allow_list_size,
    );
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Shared state for request handlers
struct StatusState {
    metrics: Arc<Metrics>,
    refresher: Arc<AllowListRefresher>,
}

async fn route(method: &Method, path: &str, state: &StatusState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&state.metrics.report());
            respond(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body)
        }
        (&Method::GET | &Method::POST, "/update-devices") => {
            match state.refresher.refresh_now().await {
                Ok(size) => {
                    info!(size = size, "manual_allow_list_refresh");
                    respond(StatusCode::OK, "application/json", r#"{"message":"Devices updated"}"#)
                }
                // Failure already logged by the refresher
                Err(_) => respond(
                    StatusCode::BAD_GATEWAY,
                    "application/json",
                    r#"{"message":"Device update failed"}"#,
                ),
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<StatusState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &state).await)
}

/// Start the status HTTP server
pub async fn start_status_server(
    port: u16,
    metrics: Arc<Metrics>,
    refresher: Arc<AllowListRefresher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(StatusState { metrics, refresher });

    info!(port = %port, "status_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "status_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "status_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("status_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
