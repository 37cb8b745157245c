// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Activations and softmax over tensors.

use kernels::activation::{self as act, Activation};

use crate::access::with_write;
use crate::{Tensor, TensorError};

impl Tensor {
    fn softmax_axis(&self, op: &'static str, dim: isize) -> Result<usize, TensorError> {
        self.shape().normalize_axis(dim).ok_or(TensorError::IndexOutOfRange {
            op,
            index: dim.unsigned_abs(),
            bound: self.rank(),
        })
    }

    /// `self = act(src)`.
    pub fn activate(&mut self, f: Activation, src: &Tensor) -> Result<&mut Self, TensorError> {
        let op = f.as_str();
        self.check_same_shape(op, src)?;
        self.check_writable(op)?;
        if let (Some(d), Some(s)) = (self.contiguous_range(), src.contiguous_range()) {
            let n = self.size();
            with_write(op, self, [src], |out, [x]| act::activate(f, &mut out[d], &x[s], n))?;
            return Ok(self);
        }
        with_write(op, self, [src], |out, [x]| {
            act::activate_strided(f, self.strided_mut(out), src.strided(x), self.dims())
        })?;
        Ok(self)
    }

    /// `self = grad · act'(saved)`, where `saved` is the forward input for
    /// ReLU and the forward output for Sigmoid and Tanh.
    pub fn activate_grad(
        &mut self,
        f: Activation,
        grad: &Tensor,
        saved: &Tensor,
    ) -> Result<&mut Self, TensorError> {
        let op = f.as_str();
        self.check_same_shape(op, grad)?;
        self.check_same_shape(op, saved)?;
        self.check_writable(op)?;
        let fast = (
            self.contiguous_range(),
            grad.contiguous_range(),
            saved.contiguous_range(),
        );
        if let (Some(d), Some(g), Some(s)) = fast {
            let n = self.size();
            with_write(op, self, [grad, saved], |out, [gv, sv]| {
                act::activate_grad(f, &mut out[d], &gv[g], &sv[s], n)
            })?;
            return Ok(self);
        }
        with_write(op, self, [grad, saved], |out, [gv, sv]| {
            act::activate_grad_strided(
                f,
                self.strided_mut(out),
                grad.strided(gv),
                saved.strided(sv),
                self.dims(),
            )
        })?;
        Ok(self)
    }

    pub fn relu(&mut self, src: &Tensor) -> Result<&mut Self, TensorError> {
        self.activate(Activation::Relu, src)
    }

    pub fn sigmoid(&mut self, src: &Tensor) -> Result<&mut Self, TensorError> {
        self.activate(Activation::Sigmoid, src)
    }

    /// Softmax of `src` along `dim` (negative counts from the end).
    ///
    /// Each slice subtracts its own maximum before exponentiating.
    pub fn softmax(&mut self, src: &Tensor, dim: isize) -> Result<&mut Self, TensorError> {
        const OP: &str = "softmax";
        self.check_same_shape(OP, src)?;
        self.check_writable(OP)?;
        let axis = src.softmax_axis(OP, dim)?;
        with_write(OP, self, [src], |out, [x]| {
            act::softmax(self.strided_mut(out), src.strided(x), self.dims(), axis)
        })?;
        Ok(self)
    }

    /// `self = log(softmax(src))`, computed without forming the softmax.
    pub fn log_softmax(&mut self, src: &Tensor, dim: isize) -> Result<&mut Self, TensorError> {
        const OP: &str = "log_softmax";
        self.check_same_shape(OP, src)?;
        self.check_writable(OP)?;
        let axis = src.softmax_axis(OP, dim)?;
        with_write(OP, self, [src], |out, [x]| {
            act::log_softmax(self.strided_mut(out), src.strided(x), self.dims(), axis)
        })?;
        Ok(self)
    }

    /// `self = y ⊙ (grad − Σ_dim grad ⊙ y)` for a softmax output `y`.
    pub fn softmax_grad(&mut self, grad: &Tensor, y: &Tensor, dim: isize) -> Result<&mut Self, TensorError> {
        const OP: &str = "softmax_grad";
        self.check_same_shape(OP, grad)?;
        self.check_same_shape(OP, y)?;
        self.check_writable(OP)?;
        let axis = y.softmax_axis(OP, dim)?;
        with_write(OP, self, [grad, y], |out, [g, yv]| {
            act::softmax_grad(
                self.strided_mut(out),
                grad.strided(g),
                y.strided(yv),
                self.dims(),
                axis,
            )
        })?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_softmax_1d() {
        let input = Tensor::from_slice([3], &[1.0, 2.0, 3.0]).unwrap();
        let mut output = Tensor::zeros([3]);
        output.softmax(&input, -1).unwrap();
        let r = output.to_vec();
        assert!(approx_eq(&r, &[0.0900, 0.2447, 0.6652], 1e-4));
        assert!((r.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_numerical_stability() {
        let input = Tensor::from_slice([3], &[1000.0, 1001.0, 1002.0]).unwrap();
        let mut output = Tensor::zeros([3]);
        output.softmax(&input, 0).unwrap();
        let r = output.to_vec();
        assert!(r.iter().all(|x| x.is_finite()));
        assert!((r.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_softmax_along_first_axis() {
        // Column 0 is uniform, column 1 is not.
        let input = Tensor::from_slice([2, 2], &[1.0, 0.0, 1.0, 2.0]).unwrap();
        let mut output = Tensor::zeros([2, 2]);
        output.softmax(&input, 0).unwrap();
        let r = output.to_vec();
        assert!(approx_eq(&[r[0], r[2]], &[0.5, 0.5], 1e-6));
        assert!(r[3] > r[1]);
        assert!((r[1] + r[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_bad_dim() {
        let input = Tensor::zeros([2, 2]);
        let mut output = Tensor::zeros([2, 2]);
        assert!(matches!(
            output.softmax(&input, 2),
            Err(TensorError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_relu_gradient_at_zero() {
        let x = Tensor::from_slice([3], &[-1.0, 0.0, 2.0]).unwrap();
        let g = Tensor::full([3], 1.0);
        let mut dx = Tensor::zeros([3]);
        dx.activate_grad(Activation::Relu, &g, &x).unwrap();
        assert_eq!(dx.to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_sigmoid_strided_matches_contiguous() {
        let x = Tensor::from_data([2, 3], (0..6).map(|v| v as f32 - 2.5).collect()).unwrap();
        let xt = x.transpose(0, 1).unwrap();
        let mut a = Tensor::zeros([3, 2]);
        let mut b = Tensor::zeros([3, 2]);
        a.sigmoid(&xt).unwrap();
        b.sigmoid(&xt.clone()).unwrap();
        assert_eq!(a.to_vec(), b.to_vec());
    }
}
