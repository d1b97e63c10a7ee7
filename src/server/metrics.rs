//! Prometheus counters for the optional `/metrics` surface. Registered with
//! the default registry so the text exposition gathers everything in one
//! pass.

use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    static ref REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "tigql_graphql_requests_total",
        "GraphQL requests served"
    )
    .expect("requests counter registration");
    static ref REFRESH_FAILURES: IntCounter = register_int_counter!(
        "tigql_schema_refresh_failures_total",
        "Schema refresh attempts that failed"
    )
    .expect("refresh failure counter registration");
    static ref REFRESH_LAST_SUCCESS: IntGauge = register_int_gauge!(
        "tigql_schema_refresh_last_success_seconds",
        "Unix time of the last successful schema refresh"
    )
    .expect("refresh gauge registration");
}

pub(crate) fn request_served() {
    REQUESTS_TOTAL.inc();
}

pub(crate) fn refresh_failed() {
    REFRESH_FAILURES.inc();
}

pub(crate) fn refresh_succeeded() {
    REFRESH_LAST_SUCCESS.set(Utc::now().timestamp());
}

/// Renders the default registry in the Prometheus text format.
pub(crate) fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&prometheus::gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{refresh_failed, render, request_served};

    /// Passes if counters register once and render in text exposition
    #[test]
    fn counters_render() {
        request_served();
        refresh_failed();
        let text = render();

        assert!(text.contains("tigql_graphql_requests_total"));
        assert!(text.contains("tigql_schema_refresh_failures_total"));
    }
}
