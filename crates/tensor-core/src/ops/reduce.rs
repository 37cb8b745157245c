// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Axis reductions.
//!
//! The reduced axes are removed from the destination shape. Accumulation
//! runs in increasing linear order over the reduced axes whatever the
//! strides, so results do not depend on layout.

use kernels::reduction::{arg_reduce, reduce, ArgOp, ReduceOp};
use kernels::{StridedMut, MAX_RANK};

use crate::access::{with_read, with_write};
use crate::{Tensor, TensorError};

const ALL: [usize; MAX_RANK] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

impl Tensor {
    fn check_reduce_dst(&self, op: &'static str, dst: &Tensor, axes: &[usize]) -> Result<(), TensorError> {
        for &axis in axes {
            if axis >= self.rank() {
                return Err(TensorError::IndexOutOfRange {
                    op,
                    index: axis,
                    bound: self.rank(),
                });
            }
        }
        let mut kept = self
            .dims()
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, &d)| d);
        let matches = dst.dims().iter().all(|&d| kept.next() == Some(d)) && kept.next().is_none();
        if !matches {
            return Err(TensorError::shape(op, self.shape(), dst.shape()));
        }
        dst.check_writable(op)
    }

    /// Reduces `axes` of `self` into `dst`, whose shape is `self`'s with
    /// those axes removed.
    pub fn reduce(&self, op: ReduceOp, dst: &mut Tensor, axes: &[usize]) -> Result<(), TensorError> {
        const OP: &str = "reduce";
        self.check_reduce_dst(OP, dst, axes)?;
        with_write(OP, dst, [self], |out, [src]| {
            reduce(op, dst.strided_mut(out), self.strided(src), self.dims(), axes)
        })?;
        Ok(())
    }

    pub fn sum(&self, dst: &mut Tensor, axes: &[usize]) -> Result<(), TensorError> {
        self.reduce(ReduceOp::Sum, dst, axes)
    }

    pub fn mean(&self, dst: &mut Tensor, axes: &[usize]) -> Result<(), TensorError> {
        self.reduce(ReduceOp::Mean, dst, axes)
    }

    pub fn max(&self, dst: &mut Tensor, axes: &[usize]) -> Result<(), TensorError> {
        self.reduce(ReduceOp::Max, dst, axes)
    }

    pub fn min(&self, dst: &mut Tensor, axes: &[usize]) -> Result<(), TensorError> {
        self.reduce(ReduceOp::Min, dst, axes)
    }

    fn arg(&self, op: ArgOp, dst: &mut Tensor, axis: usize) -> Result<(), TensorError> {
        const OP: &str = "arg_reduce";
        self.check_reduce_dst(OP, dst, &[axis])?;
        with_write(OP, dst, [self], |out, [src]| {
            arg_reduce(op, dst.strided_mut(out), self.strided(src), self.dims(), axis)
        })?;
        Ok(())
    }

    /// Index of the largest element along `axis`, written as `f32`.
    /// Ties resolve to the smallest index.
    pub fn argmax(&self, dst: &mut Tensor, axis: usize) -> Result<(), TensorError> {
        self.arg(ArgOp::Max, dst, axis)
    }

    pub fn argmin(&self, dst: &mut Tensor, axis: usize) -> Result<(), TensorError> {
        self.arg(ArgOp::Min, dst, axis)
    }

    fn reduce_all(&self, op: ReduceOp) -> Result<f32, TensorError> {
        if self.rank() == 0 {
            return self.at(&[]);
        }
        let axes = &ALL[..self.rank()];
        let mut out = [0.0f32];
        with_read([self], |[src]| {
            reduce(op, StridedMut::new(&mut out, 0, &[]), self.strided(src), self.dims(), axes)
        })?;
        Ok(out[0])
    }

    /// Sum over every element.
    pub fn sum_all(&self) -> Result<f32, TensorError> {
        self.reduce_all(ReduceOp::Sum)
    }

    pub fn mean_all(&self) -> Result<f32, TensorError> {
        self.reduce_all(ReduceOp::Mean)
    }

    pub fn max_all(&self) -> Result<f32, TensorError> {
        self.reduce_all(ReduceOp::Max)
    }
}
