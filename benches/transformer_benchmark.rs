use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::hint::black_box;
use vit_anomaly::TransformerConfig;
use vit_anomaly::tensor::Tensor;
use vit_anomaly::transformer::{
    AnomalyTransformer, CloneSelection, MultiHeadedSelfAttention, Transformer,
};

fn small_vit() -> TransformerConfig {
    // ViT-B widths with a shallow stack to keep iterations short.
    TransformerConfig {
        num_layers: 2,
        ..TransformerConfig::vit_b16()
    }
}

fn benchmark_attention(c: &mut Criterion) {
    let mut group = c.benchmark_group("attention");
    let mut rng = StdRng::seed_from_u64(0);
    let attn = MultiHeadedSelfAttention::<f32>::init(768, 12, 0.0, &mut rng).unwrap();

    for seq_len in [50, 197] {
        let x = Tensor::<f32, 3>::full([1, seq_len, 768], 0.5);
        group.bench_function(format!("seq {}", seq_len), |b| {
            b.iter(|| attn.forward(black_box(&x), None).unwrap())
        });
    }
    group.finish();
}

fn benchmark_stacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack");
    group.sample_size(10);

    let mut rng = StdRng::seed_from_u64(0);
    let plain = Transformer::<f32>::new(&small_vit(), &mut rng).unwrap();
    let anomaly = AnomalyTransformer::from_transformer(plain.clone()).unwrap();

    let x = Tensor::<f32, 3>::full([1, 197, 768], 0.5);
    let mask = Tensor::<f32, 2>::ones([1, 197]);

    group.bench_function("transformer", |b| {
        b.iter(|| plain.forward(black_box(&x), Some(&mask), None).unwrap())
    });
    group.bench_function("anomaly_all", |b| {
        b.iter(|| {
            anomaly
                .forward(black_box(&x), Some(&mask), &CloneSelection::All)
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, benchmark_attention, benchmark_stacks);
criterion_main!(benches);
