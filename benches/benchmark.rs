#[macro_use]
extern crate criterion;

extern crate cml;
extern crate ndarray;
extern crate rand;
extern crate rand_xorshift;

use criterion::Criterion;
use ndarray::Array2;
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use cml::data::{Interaction, Interactions};
use cml::models::cml::Hyperparameters;
use cml::samplers::two_stage::TwoStageSampler;
use cml::samplers::SamplerConfig;

fn synthetic(num_users: usize, num_items: usize, sample_size: usize) -> Interactions {
    let mut rng = XorShiftRng::seed_from_u64(42);
    let users = Uniform::new(0, num_users);
    let items = Uniform::new(0, num_items);

    let mut data = Interactions::new(num_users, num_items);
    for _ in 0..sample_size {
        data.push(Interaction::new(users.sample(&mut rng), items.sample(&mut rng)));
    }

    data
}

fn config() -> SamplerConfig {
    SamplerConfig::new()
        .batch_size(256)
        .num_negatives(10)
        .num_candidates(200)
        .strict_negative(true)
        .from_seed([42; 16])
}

fn bench_two_stage_step(c: &mut Criterion) {
    c.bench_function("two_stage_step", |b| {
        let data = synthetic(1000, 5000, 20000);
        let mut sampler = TwoStageSampler::new(&data, config()).unwrap();

        let mut rng = XorShiftRng::seed_from_u64(7);
        let noise = Uniform::new(-0.9f32, 0.9);
        let similarities = Array2::zeros((256, 200)).map(|_: &f32| noise.sample(&mut rng));

        b.iter(|| {
            let positives = sampler.draw_positives(256);
            sampler.draw_candidates(200).unwrap();
            sampler.compute_weights(similarities.view(), 32).unwrap();
            sampler.draw_negatives(&positives.user_ids).unwrap()
        })
    });
}

fn bench_cml(c: &mut Criterion) {
    c.bench_function("cml", |b| {
        let data = synthetic(1000, 5000, 20000);
        let mut sampler = TwoStageSampler::new(&data, config()).unwrap();

        let mut model = Hyperparameters::new(data.num_users(), data.num_items())
            .embedding_dim(32)
            .learning_rate(0.05)
            .num_epochs(1)
            .from_seed([7; 16])
            .build();

        b.iter(|| {
            model.fit(&mut sampler).unwrap();
        })
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_two_stage_step, bench_cml
}
criterion_main!(benches);
