use criterion::{black_box, criterion_group, criterion_main, Criterion};

use biosync::quantizer::{decimal_precision, quantize};

fn quantize_hot_path_bench(c: &mut Criterion) {
    let delta = 0.01;
    let precision = decimal_precision(delta);

    c.bench_function("quantize_hot_path", |b| {
        b.iter(|| {
            for i in 0..1000u64 {
                let t = i as f64 * delta;
                black_box(quantize(black_box(t), black_box(delta), black_box(precision)));
            }
        })
    });
}

criterion_group!(benches, quantize_hot_path_bench);
criterion_main!(benches);
