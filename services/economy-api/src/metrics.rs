use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"]
    ).expect("metric can be created");

    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method", "path"]
    ).expect("metric can be created");

    // NATS metrics
    pub static ref ANNOUNCEMENTS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("announcements_published_total", "Donation announcements forwarded"),
        &["status"]
    ).expect("metric can be created");
}

/// Register all metrics with the service registry
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(ANNOUNCEMENTS_PUBLISHED.clone()))?;
    Ok(())
}

/// Record one finished request; `path` is the route pattern, not the raw path
pub fn observe_request(method: &str, path: &str, status: u16, duration_seconds: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path])
        .observe(duration_seconds);
}

/// Service metrics followed by ledger metrics, in Prometheus text format
pub fn metrics_handler(ledger_metrics: &economy_core::metrics::Metrics) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    let mut output = String::from_utf8_lossy(&buffer).into_owned();
    output.push_str(&ledger_metrics.render()?);
    Ok(output)
}
