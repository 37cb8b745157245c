// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for tensor operations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensor_core::{Shape, Tensor};

fn random(shape: &[usize], seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = shape.iter().product();
    let data = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Tensor::from_data(shape, data).unwrap()
}

fn bench_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul");
    for &n in &[64usize, 128] {
        let a = random(&[n, n], 1);
        let b = random(&[n, n], 2);
        let mut out = Tensor::zeros(Shape::matrix(n, n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| {
                out.matmul(black_box(&a), black_box(&b)).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_softmax(c: &mut Criterion) {
    let x = random(&[64, 1000], 3);
    let mut out = Tensor::zeros([64, 1000]);
    c.bench_function("softmax_64x1000", |bench| {
        bench.iter(|| {
            out.softmax(black_box(&x), -1).unwrap();
        })
    });
}

fn bench_broadcast_add(c: &mut Criterion) {
    let x = random(&[256, 256], 4);
    let row = random(&[256], 5);
    let xt = x.transpose(0, 1).unwrap();
    let mut out = Tensor::zeros([256, 256]);
    let mut group = c.benchmark_group("broadcast_add");
    group.bench_function("contiguous", |bench| {
        bench.iter(|| {
            out.add(black_box(&x), black_box(&row)).unwrap();
        })
    });
    group.bench_function("transposed", |bench| {
        bench.iter(|| {
            out.add(black_box(&xt), black_box(&row)).unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_matmul, bench_softmax, bench_broadcast_add);
criterion_main!(benches);
