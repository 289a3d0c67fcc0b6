#![allow(unused)]
//! Decode + classify throughput benchmarks.
//!
//! # Groups
//!
//! | Group | What it measures |
//! |-------|-----------------|
//! | `classify` | `Classifier::classify` on application and control-plane envelopes |
//! | `pipeline` | Full decode + classify per encoding and envelope shape |
//!
//! # Viewing results
//!
//! ```sh
//! cargo bench --bench classify_bench
//! open target/criterion/report/index.html
//! ```

use std::collections::HashMap;
use std::hint::black_box;

use chrono::DateTime;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sluice::sluice_core::{Classifier, ContainerRef, Encoding, Envelope, LinePipeline, Origin};

fn envelope(container: &str, pod: &str, log: &str, legacy: bool) -> Envelope {
    let labels: HashMap<String, String> = [("app", "foo"), ("type", "web"), ("version", "v2")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Envelope {
        log: log.to_string(),
        stream: "stdout".to_string(),
        origin: Origin {
            namespace: "foo".to_string(),
            pod_id: "5b1b4a5e".to_string(),
            pod_name: pod.to_string(),
            container_name: container.to_string(),
            labels,
            host: "node-1".to_string(),
        },
        container: if legacy {
            ContainerRef::Legacy("5d4b8ee0d0d2".to_string())
        } else {
            ContainerRef::Structured {
                container_id: "5d4b8ee0d0d2".to_string(),
            }
        },
        timestamp: DateTime::parse_from_rfc3339("2018-01-22T20:21:00.123456789+00:00").unwrap(),
    }
}

fn application() -> Envelope {
    envelope("foo-web", "foo-v2-web-2ggow", "GET /healthz 200 1ms", false)
}

fn controller() -> Envelope {
    envelope(
        "deis-controller",
        "deis-controller-3844356438-6hkbf",
        "INFO [foo]: scaled web to 3",
        false,
    )
}

fn classify_bench(c: &mut Criterion) {
    let classifier = Classifier::default();
    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(1));

    let app = application();
    group.bench_function("application", |b| b.iter(|| black_box(classifier.classify(&app))));

    let ctl = controller();
    group.bench_function("control_plane", |b| b.iter(|| black_box(classifier.classify(&ctl))));

    // Controller container whose line does not match the pattern.
    let fallthrough = envelope("deis-controller", "deis-controller-1-2", "plain text", false);
    group.bench_function("controller_fallthrough", |b| {
        b.iter(|| black_box(classifier.classify(&fallthrough)))
    });

    group.finish();
}

fn pipeline_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for encoding in [Encoding::Json, Encoding::MsgPack] {
        let pipeline = LinePipeline::new(encoding, Classifier::default());
        for (shape, legacy) in [("structured", false), ("legacy", true)] {
            let payload = envelope("foo-web", "foo-v2-web-2ggow", "GET /healthz 200 1ms", legacy)
                .encode(encoding)
                .unwrap();
            group.throughput(Throughput::Bytes(payload.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(encoding.to_string(), shape),
                &payload,
                |b, payload| b.iter(|| black_box(pipeline.process(payload))),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, classify_bench, pipeline_bench);
criterion_main!(benches);
