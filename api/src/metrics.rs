use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("sensorhub_requests_total", "Total API requests per operation"),
        &["operation"]
    )
    .expect("valid metric definition");
    pub static ref REQUEST_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "sensorhub_request_errors_total",
            "Total failed API requests per error kind"
        ),
        &["kind"]
    )
    .expect("valid metric definition");
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "sensorhub_db_failures_total",
        "Total database calls that returned an error"
    ))
    .expect("valid metric definition");
    pub static ref DB_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "sensorhub_db_latency_seconds",
            "Time taken by a single database call"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .expect("valid metric definition");
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEST_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
