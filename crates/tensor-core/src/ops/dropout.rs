// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dropout masks.

use kernels::elementwise::generate_strided;
use rand::Rng;

use crate::{Tensor, TensorError};

impl Tensor {
    /// Fills `self` with `0` where an element is dropped and `scale`
    /// elsewhere, each element dropped with probability `rate`.
    ///
    /// One draw is consumed per element in row-major logical order, so a
    /// seeded `rng` replays the same mask whatever the strides.
    ///
    /// # Errors
    /// [`TensorError::UnsupportedOperation`] when `rate` lies outside `[0, 1)`.
    pub fn dropout_mask<R: Rng + ?Sized>(
        &mut self,
        rate: f32,
        scale: f32,
        rng: &mut R,
    ) -> Result<&mut Self, TensorError> {
        const OP: &str = "dropout_mask";
        if !(0.0..1.0).contains(&rate) {
            return Err(TensorError::unsupported(OP, format!("rate {rate} outside [0, 1)")));
        }
        self.check_writable(OP)?;
        {
            let mut out = self.write_storage();
            generate_strided(self.strided_mut(&mut out), self.dims(), || {
                if rng.gen::<f32>() < rate {
                    0.0
                } else {
                    scale
                }
            })?;
        }
        Ok(self)
    }

    /// `self = input ⊙ mask`.
    pub fn dropout_forward(&mut self, input: &Tensor, mask: &Tensor) -> Result<&mut Self, TensorError> {
        self.mul(input, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mask_values_and_replay() {
        let mut a = Tensor::zeros([64]);
        let mut b = Tensor::zeros([64]);
        a.dropout_mask(0.5, 2.0, &mut StdRng::seed_from_u64(7)).unwrap();
        b.dropout_mask(0.5, 2.0, &mut StdRng::seed_from_u64(7)).unwrap();
        let va = a.to_vec();
        assert_eq!(va, b.to_vec());
        assert!(va.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(va.contains(&0.0) && va.contains(&2.0));
    }

    #[test]
    fn test_zero_rate_keeps_everything() {
        let mut m = Tensor::zeros([16]);
        m.dropout_mask(0.0, 1.0, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(m.to_vec().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_rate_out_of_range() {
        let mut m = Tensor::zeros([4]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(m.dropout_mask(1.0, 1.0, &mut rng).is_err());
        assert!(m.dropout_mask(-0.1, 1.0, &mut rng).is_err());
        assert!(m.dropout_mask(f32::NAN, 1.0, &mut rng).is_err());
    }

    #[test]
    fn test_dropout_forward_multiplies() {
        let x = Tensor::from_slice([3], &[1.0, 2.0, 3.0]).unwrap();
        let mask = Tensor::from_slice([3], &[0.0, 2.0, 2.0]).unwrap();
        let mut y = Tensor::zeros([3]);
        y.dropout_forward(&x, &mask).unwrap();
        assert_eq!(y.to_vec(), vec![0.0, 4.0, 6.0]);
    }
}
