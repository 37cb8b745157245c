// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight initialisation.
//!
//! Weights are Xavier/Glorot uniform, `U(-√(6/(fan_in+fan_out)), +√(…))`;
//! biases start at zero.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensor_core::{Shape, Tensor, TensorError};

/// Per-layer generator: seeded when `seed` is given, from entropy otherwise.
pub fn layer_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

pub fn xavier_bound(fan_in: usize, fan_out: usize) -> f32 {
    (6.0 / (fan_in + fan_out).max(1) as f32).sqrt()
}

/// A fresh tensor drawn from the Xavier uniform distribution.
pub fn xavier_uniform<R: Rng + ?Sized>(
    shape: impl Into<Shape>,
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Result<Tensor, TensorError> {
    let shape = shape.into();
    let bound = xavier_bound(fan_in, fan_out);
    let dist = Uniform::new_inclusive(-bound, bound);
    let data: Vec<f32> = (0..shape.num_elements()).map(|_| dist.sample(rng)).collect();
    Tensor::from_data(shape, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xavier_stays_in_bound() {
        let mut rng = layer_rng(Some(3));
        let t = xavier_uniform([20, 30], 20, 30, &mut rng).unwrap();
        let bound = xavier_bound(20, 30);
        assert_eq!(t.dims(), &[20, 30]);
        assert!(t.to_vec().iter().all(|v| v.abs() <= bound));
        assert!(t.to_vec().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_seeded_rng_replays() {
        let a = xavier_uniform([8], 4, 4, &mut layer_rng(Some(9))).unwrap();
        let b = xavier_uniform([8], 4, 4, &mut layer_rng(Some(9))).unwrap();
        assert_eq!(a.to_vec(), b.to_vec());
    }
}
