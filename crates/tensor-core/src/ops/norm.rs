// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer normalization.

use std::borrow::Cow;

use kernels::norm;

use crate::access::with_write;
use crate::{Tensor, TensorError};

fn staged<'a>(op: &'static str, t: &'a Tensor) -> Cow<'a, Tensor> {
    if t.is_contiguous() {
        Cow::Borrowed(t)
    } else {
        tracing::warn!(op, "operand not contiguous; staging through a copy");
        Cow::Owned(t.contiguous())
    }
}

impl Tensor {
    /// `self = gamma ⊙ (src − mean) / sqrt(var + eps) + beta`, with mean
    /// and variance taken over the last dimension of `src`.
    ///
    /// `gamma` and `beta` are vectors as long as that dimension.
    ///
    /// # Errors
    /// [`TensorError::ShapeMismatch`] on disagreeing shapes and
    /// [`TensorError::UnsupportedOperation`] for a scalar `src` or a
    /// non-contiguous destination.
    pub fn layer_norm(&mut self, src: &Tensor, gamma: &Tensor, beta: &Tensor, eps: f32) -> Result<&mut Self, TensorError> {
        const OP: &str = "layer_norm";
        self.check_same_shape(OP, src)?;
        self.check_writable(OP)?;
        let Some(&len) = src.dims().last() else {
            return Err(TensorError::unsupported(OP, "scalar input"));
        };
        for p in [gamma, beta] {
            if p.rank() != 1 || p.size() != len {
                return Err(TensorError::shape(OP, p.shape(), src.shape()));
            }
        }
        let Some(d) = self.contiguous_range() else {
            return Err(TensorError::unsupported(OP, "destination must be contiguous"));
        };
        let rows = src.size() / len.max(1);
        let (x, g, b) = (staged(OP, src), staged(OP, gamma), staged(OP, beta));
        let (rx, rg, rb) = (x.contiguous_range(), g.contiguous_range(), b.contiguous_range());
        let (Some(rx), Some(rg), Some(rb)) = (rx, rg, rb) else {
            return Err(TensorError::unsupported(OP, "operand staging failed"));
        };
        with_write(OP, self, [x.as_ref(), g.as_ref(), b.as_ref()], |out, [xs, gs, bs]| {
            norm::layer_norm(&mut out[d], &xs[rx], &gs[rg], &bs[rb], eps, rows, len, None)
        })?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_layer_norm_basic() {
        let x = Tensor::from_slice(Shape::vector(5), &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let mut y = Tensor::zeros(Shape::vector(5));
        y.layer_norm(&x, &Tensor::full([5], 1.0), &Tensor::zeros([5]), 1e-5).unwrap();
        let r = y.to_vec();
        let mean: f32 = r.iter().sum::<f32>() / 5.0;
        let var: f32 = r.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 5.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_layer_norm_is_per_row() {
        let x = Tensor::from_slice(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mut y = Tensor::zeros(Shape::matrix(2, 3));
        y.layer_norm(&x, &Tensor::full([3], 1.0), &Tensor::zeros([3]), 1e-5).unwrap();
        let r = y.to_vec();
        assert!(approx_eq(&r[..3], &r[3..], 1e-5));
    }

    #[test]
    fn test_transposed_source_is_staged() {
        let x = Tensor::from_slice(Shape::matrix(3, 2), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        let xt = x.transpose(0, 1).unwrap();
        let direct = Tensor::from_slice(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let (gamma, beta) = (Tensor::full([3], 2.0), Tensor::full([3], 0.5));
        let mut a = Tensor::zeros(Shape::matrix(2, 3));
        let mut b = Tensor::zeros(Shape::matrix(2, 3));
        a.layer_norm(&xt, &gamma, &beta, 1e-5).unwrap();
        b.layer_norm(&direct, &gamma, &beta, 1e-5).unwrap();
        assert_eq!(a.to_vec(), b.to_vec());
    }

    #[test]
    fn test_rejects_mismatched_affine() {
        let x = Tensor::zeros([2, 3]);
        let mut y = Tensor::zeros([2, 3]);
        assert!(matches!(
            y.layer_norm(&x, &Tensor::zeros([2]), &Tensor::zeros([3]), 1e-5),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }
}
