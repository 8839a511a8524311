use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Learning Metrics
    pub static ref QUIZ_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_attempts_total",
        "Quiz attempts by outcome (started, passed, failed)",
        &["outcome"]
    )
    .unwrap();

    pub static ref HUB_COMPLETIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "hub_completions_total",
        "Hub completions by source (manual, quiz)",
        &["source"]
    )
    .unwrap();

    pub static ref CERTIFICATES_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "certificates_issued_total",
        "Certificates newly issued"
    )
    .unwrap();

    // Activity stream
    pub static ref ACTIVITY_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "activity_events_total",
        "Activity events published",
        &["type"]
    )
    .unwrap();

    pub static ref ACTIVITY_STREAM_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "activity_stream_connections_active",
        "Number of connected activity stream clients"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics_includes_learning_counters() {
        QUIZ_ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();
        HUB_COMPLETIONS_TOTAL.with_label_values(&["manual"]).inc();
        CERTIFICATES_ISSUED_TOTAL.inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("quiz_attempts_total"));
        assert!(output.contains("hub_completions_total"));
        assert!(output.contains("certificates_issued_total"));
    }
}
