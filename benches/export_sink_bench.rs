use criterion::{black_box, criterion_group, criterion_main, Criterion};

use biosync::config::ExportConfig;
use biosync::export_sink::ExportSink;
use biosync::payload::Payload;
use biosync::synchronizer::Sink;

fn export_push_throughput_bench(c: &mut Criterion) {
    let dir = std::env::temp_dir().join("biosync_bench_export_sink");
    let config = ExportConfig {
        channels: vec!["bench:x".to_string()],
        synced_dir: dir.join("synced").to_string_lossy().to_string(),
        markers_dir: dir.join("markers").to_string_lossy().to_string(),
        ..ExportConfig::default()
    };
    let sink = ExportSink::new(config, "REST".to_string(), 200.0).expect("valid bench config");

    c.bench_function("export_sink_push", |b| {
        let mut k = 0u64;
        b.iter(|| {
            sink.push(black_box(Payload::Sample {
                k,
                t_q: k as f64 * 0.01,
                device: "bench".to_string(),
                pairs: vec![("x".to_string(), Some(1.0))],
            }));
            k += 1;
        })
    });

    sink.stop();
    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(benches, export_push_throughput_bench);
criterion_main!(benches);
