use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static LOGINS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static CONFIG_SAVES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "wfconfig_gateway_http_requests_total",
                    "Editor API request count.",
                ),
                &["route", "method", "status"],
            )
            .expect("create wfconfig_gateway_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "wfconfig_gateway_http_request_duration_seconds",
                    "Editor API request duration in seconds.",
                )
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
                &["route", "method", "outcome"],
            )
            .expect("create wfconfig_gateway_http_request_duration_seconds"),
        )
    })
}

fn logins_total() -> &'static IntCounterVec {
    LOGINS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("wfconfig_gateway_logins_total", "Login attempts by outcome."),
                &["outcome"],
            )
            .expect("create wfconfig_gateway_logins_total"),
        )
    })
}

fn config_saves_total() -> &'static IntCounterVec {
    CONFIG_SAVES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "wfconfig_gateway_config_saves_total",
                    "Configuration record saves by outcome.",
                ),
                &["outcome"],
            )
            .expect("create wfconfig_gateway_config_saves_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

/// `outcome` is one of `ok`, `rejected`, `rate_limited`, `error`.
pub fn observe_login(outcome: &str) {
    logins_total().with_label_values(&[outcome]).inc();
}

/// `outcome` is one of `ok`, `invalid`, `not_found`, `error`.
pub fn observe_config_save(outcome: &str) {
    config_saves_total().with_label_values(&[outcome]).inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = logins_total();
    let _ = config_saves_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
