use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    detection_duration: Histogram<u64>,
    cars_detected: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("car_detection");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let detection_duration = meter
            .u64_histogram("detection_duration_ms")
            .with_boundaries(exponential_boundaries(25, 2, 9))
            .with_description("Duration of car detection in milliseconds")
            .build();

        let cars_detected = meter
            .u64_counter("cars_detected_total")
            .with_description("Total number of cars detected")
            .build();

        Ok(Metrics {
            request_counter,
            detection_duration,
            cars_detected,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_detection(&self, duration_ms: u64, cars: usize, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.detection_duration.record(duration_ms, &attributes);
        self.cars_detected.add(cars as u64, &attributes);
    }
}

/// `count` bucket bounds starting at `start`, each `factor` times the last.
fn exponential_boundaries(start: u64, factor: u64, count: usize) -> Vec<f64> {
    std::iter::successors(Some(start), |b| b.checked_mul(factor))
        .take(count)
        .map(|b| b as f64)
        .collect()
}
