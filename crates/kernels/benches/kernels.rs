// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for GEMM, im2col convolution and pooling.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kernels::blas::gemm_nn;
use kernels::conv::{conv2d, Conv2dGeometry};
use kernels::pool::{max_pool2d, Pool2dGeometry};
use kernels::Window;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn bench_gemm(c: &mut Criterion) {
    let mut group = c.benchmark_group("gemm_nn");
    for &n in &[64usize, 128, 256] {
        let a = random(n * n, 1);
        let b = random(n * n, 2);
        let mut out = vec![0.0f32; n * n];
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, &n| {
            bench.iter(|| {
                gemm_nn(&mut out, black_box(&a), black_box(&b), n, n, n, n, n, n, 1.0, 0.0)
                    .unwrap();
            })
        });
    }
    group.finish();
}

fn bench_conv2d(c: &mut Criterion) {
    let geom = Conv2dGeometry::new(8, 16, 32, [32, 32], Window::square(3).with_padding([1, 1]));
    let x = random(geom.input_len(), 3);
    let w = random(geom.weight_len(), 4);
    let b = random(32, 5);
    let [oh, ow] = geom.output().unwrap();
    let mut y = vec![0.0f32; 8 * 32 * oh * ow];
    let mut col = vec![0.0f32; geom.col_len().unwrap()];
    c.bench_function("conv2d_3x3_8x16x32x32", |bench| {
        bench.iter(|| {
            conv2d(&geom, &mut y, black_box(&x), black_box(&w), Some(&b), &mut col).unwrap();
        })
    });
}

fn bench_max_pool(c: &mut Criterion) {
    let geom = Pool2dGeometry::new(8, 32, [64, 64], Window::square(2).with_stride([2, 2]));
    let x = random(geom.input_len(), 6);
    let len = geom.output_len().unwrap();
    let mut y = vec![0.0f32; len];
    let mut idx = vec![0usize; len];
    c.bench_function("max_pool2d_2x2_8x32x64x64", |bench| {
        bench.iter(|| {
            max_pool2d(&geom, &mut y, black_box(&x), Some(&mut idx)).unwrap();
        })
    });
}

criterion_group!(benches, bench_gemm, bench_conv2d, bench_max_pool);
criterion_main!(benches);
