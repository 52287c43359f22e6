// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Optional OpenTelemetry instrumentation.
//!
//! Compiled in only with the `telemetry` feature, and off at runtime until
//! [`enable`] is called. Without the feature every recorder is a no-op.
#![cfg_attr(not(feature = "telemetry"), allow(dead_code))]

#[cfg(feature = "telemetry")]
mod otel {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;
    use std::time::Duration;

    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Histogram};
    use opentelemetry::trace::SpanKind;
    use opentelemetry::{trace::Tracer, KeyValue};

    const METER_NAME: &str = "sable_jinja_engine";
    const TRACER_NAME: &str = "sable_jinja_engine";

    static ENABLED: AtomicBool = AtomicBool::new(false);
    static HANDLES: OnceLock<Handles> = OnceLock::new();

    struct Handles {
        tracer: opentelemetry::global::BoxedTracer,
        render_hist: Histogram<f64>,
        parse_hist: Histogram<f64>,
        render_counter: Counter<u64>,
        parse_counter: Counter<u64>,
        filter_counter: Counter<u64>,
    }

    impl Handles {
        fn new() -> Self {
            let meter = global::meter(METER_NAME);
            let render_hist = meter
                .f64_histogram("sable.render.duration_ms")
                .with_description("Render duration in milliseconds")
                .init();
            let parse_hist = meter
                .f64_histogram("sable.parse.duration_ms")
                .with_description("Template parse duration in milliseconds")
                .init();
            let render_counter = meter
                .u64_counter("sable.render.count")
                .with_description("Number of template renders")
                .init();
            let parse_counter = meter
                .u64_counter("sable.parse.count")
                .with_description("Number of template parses")
                .init();
            let filter_counter = meter
                .u64_counter("sable.filter.count")
                .with_description("Number of filter invocations")
                .init();
            let tracer = global::tracer(TRACER_NAME);
            Self {
                tracer,
                render_hist,
                parse_hist,
                render_counter,
                parse_counter,
                filter_counter,
            }
        }
    }

    fn handles() -> &'static Handles {
        HANDLES.get_or_init(Handles::new)
    }

    pub fn enable() {
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn disable() {
        ENABLED.store(false, Ordering::Relaxed);
    }

    fn enabled() -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    pub fn record_render(template: &str, duration: Duration) {
        if !enabled() {
            return;
        }
        let hs = handles();
        let duration_ms = duration.as_secs_f64() * 1_000.0;
        let attrs = [KeyValue::new("template.name", template.to_string())];
        hs.render_counter.add(1, &attrs);
        hs.render_hist.record(duration_ms, &attrs);
        let mut span = hs
            .tracer
            .span_builder("Environment::render")
            .with_kind(SpanKind::Internal)
            .start(&hs.tracer);
        span.set_attribute(KeyValue::new("template.name", template.to_string()));
        span.set_attribute(KeyValue::new("render.duration_ms", duration_ms));
        span.end();
    }

    pub fn record_parse(template: &str, duration: Duration) {
        if !enabled() {
            return;
        }
        let hs = handles();
        let duration_ms = duration.as_secs_f64() * 1_000.0;
        let attrs = [KeyValue::new("template.name", template.to_string())];
        hs.parse_counter.add(1, &attrs);
        hs.parse_hist.record(duration_ms, &attrs);
    }

    pub fn record_filter_invocation(name: &str) {
        if !enabled() {
            return;
        }
        let hs = handles();
        let attrs = [KeyValue::new("filter.name", name.to_string())];
        hs.filter_counter.add(1, &attrs);
    }
}

#[cfg(not(feature = "telemetry"))]
mod otel {
    use std::time::Duration;

    pub fn enable() {}
    pub fn disable() {}
    pub fn record_render(_template: &str, _duration: Duration) {}
    pub fn record_parse(_template: &str, _duration: Duration) {}
    pub fn record_filter_invocation(_name: &str) {}
}

pub use otel::{disable, enable, record_filter_invocation, record_parse, record_render};
