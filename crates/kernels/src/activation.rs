// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Activation functions, their gradients, and softmax along an axis.
//!
//! Pointwise activations reuse the elementwise drivers, so the contiguous
//! and strided forms share one scalar definition.

use crate::elementwise::{map1, map1_strided, map2, map2_strided};
use crate::strided::{check_operand, check_writable, contiguous_strides_into, walk, MAX_RANK};
use crate::{KernelError, StridedMut, StridedRef};

/// Pointwise activations with a closed-form derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => {
                if x > 0.0 || x.is_nan() {
                    x
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => sigmoid_scalar(x),
            Activation::Tanh => x.tanh(),
        }
    }

    /// `grad · f'(·)` given the value saved at forward time.
    ///
    /// `saved` is the forward *input* for `Relu` and the forward *output*
    /// for `Sigmoid` and `Tanh`.
    #[inline]
    pub fn gradient(self, grad: f32, saved: f32) -> f32 {
        match self {
            Activation::Relu => {
                if saved > 0.0 {
                    grad
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => grad * saved * (1.0 - saved),
            Activation::Tanh => grad * (1.0 - saved * saved),
        }
    }

    /// Whether [`Activation::gradient`] expects the forward output.
    pub fn saves_output(self) -> bool {
        !matches!(self, Activation::Relu)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
        }
    }
}

#[inline]
fn sigmoid_scalar(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `dst = act(src)` over `n` contiguous elements.
pub fn activate(act: Activation, dst: &mut [f32], src: &[f32], n: usize) -> Result<(), KernelError> {
    map1(act.as_str(), dst, src, n, |x| act.apply(x))
}

/// `dst = act(src)` over a strided `shape`.
pub fn activate_strided(
    act: Activation,
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    map1_strided(act.as_str(), dst, src, shape, |x| act.apply(x))
}

/// `dst = grad · act'(saved)` over `n` contiguous elements.
pub fn activate_grad(
    act: Activation,
    dst: &mut [f32],
    grad: &[f32],
    saved: &[f32],
    n: usize,
) -> Result<(), KernelError> {
    map2(act.as_str(), dst, grad, saved, n, |g, s| act.gradient(g, s))
}

/// Strided form of [`activate_grad`].
pub fn activate_grad_strided(
    act: Activation,
    dst: StridedMut<'_>,
    grad: StridedRef<'_>,
    saved: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    map2_strided(act.as_str(), dst, grad, saved, shape, |g, s| act.gradient(g, s))
}

pub fn relu(dst: &mut [f32], x: &[f32], n: usize) -> Result<(), KernelError> {
    activate(Activation::Relu, dst, x, n)
}

/// `dst = grad · 1[x > 0]`; the gradient at zero is zero.
pub fn relu_grad(dst: &mut [f32], grad: &[f32], x: &[f32], n: usize) -> Result<(), KernelError> {
    activate_grad(Activation::Relu, dst, grad, x, n)
}

pub fn sigmoid(dst: &mut [f32], x: &[f32], n: usize) -> Result<(), KernelError> {
    activate(Activation::Sigmoid, dst, x, n)
}

/// `dst = grad · y · (1 − y)` from the forward output `y`.
pub fn sigmoid_grad(dst: &mut [f32], grad: &[f32], y: &[f32], n: usize) -> Result<(), KernelError> {
    activate_grad(Activation::Sigmoid, dst, grad, y, n)
}

pub fn tanh(dst: &mut [f32], x: &[f32], n: usize) -> Result<(), KernelError> {
    activate(Activation::Tanh, dst, x, n)
}

/// `dst = grad · (1 − y²)` from the forward output `y`.
pub fn tanh_grad(dst: &mut [f32], grad: &[f32], y: &[f32], n: usize) -> Result<(), KernelError> {
    activate_grad(Activation::Tanh, dst, grad, y, n)
}

// ── Softmax ────────────────────────────────────────────────────

/// The shape with `axis` collapsed to 1, i.e. one entry per slice.
fn slice_shape(
    op: &'static str,
    shape: &[usize],
    axis: usize,
) -> Result<([usize; MAX_RANK], usize), KernelError> {
    if axis >= shape.len() {
        return Err(KernelError::ShapeMismatch {
            op,
            detail: format!("axis {axis} out of range for rank {}", shape.len()),
        });
    }
    if shape.len() > MAX_RANK {
        return Err(KernelError::UnsupportedCombination {
            op,
            detail: format!("rank {} exceeds {MAX_RANK}", shape.len()),
        });
    }
    let mut outer = [0usize; MAX_RANK];
    outer[..shape.len()].copy_from_slice(shape);
    outer[axis] = 1;
    Ok((outer, shape.len()))
}

/// Maximum of one slice, NaN-propagating.
#[inline]
fn slice_max(data: &[f32], base: usize, step: isize, len: usize) -> f32 {
    let mut max = f32::NEG_INFINITY;
    let mut pos = base as isize;
    for _ in 0..len {
        let v = data[pos as usize];
        if v.is_nan() {
            return v;
        }
        if v > max {
            max = v;
        }
        pos += step;
    }
    max
}

/// Softmax of `src` along `axis`, written to `dst`.
///
/// Each slice subtracts its own maximum (taken along `axis`) before
/// exponentiation, then divides by the slice sum.
pub fn softmax(
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    const OP: &str = "softmax";
    let (outer, rank) = slice_shape(OP, shape, axis)?;
    check_operand(OP, "dst", dst.data.len(), dst.offset, dst.strides, shape)?;
    check_writable(OP, dst.strides, shape)?;
    check_operand(OP, "src", src.data.len(), src.offset, src.strides, shape)?;

    let len = shape[axis];
    let (ds, ss) = (dst.strides[axis], src.strides[axis]);
    let out = dst.data;
    walk(
        &outer[..rank],
        [dst.offset, src.offset],
        [dst.strides, src.strides],
        |[d, s]| {
            let max = slice_max(src.data, s, ss, len);
            let mut sum = 0.0f32;
            let (mut dp, mut sp) = (d as isize, s as isize);
            for _ in 0..len {
                let e = (src.data[sp as usize] - max).exp();
                out[dp as usize] = e;
                sum += e;
                dp += ds;
                sp += ss;
            }
            let mut dp = d as isize;
            for _ in 0..len {
                out[dp as usize] /= sum;
                dp += ds;
            }
        },
    );
    Ok(())
}

/// Log-softmax of `src` along `axis`: `x − max − ln Σ exp(x − max)`.
pub fn log_softmax(
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    const OP: &str = "log_softmax";
    let (outer, rank) = slice_shape(OP, shape, axis)?;
    check_operand(OP, "dst", dst.data.len(), dst.offset, dst.strides, shape)?;
    check_writable(OP, dst.strides, shape)?;
    check_operand(OP, "src", src.data.len(), src.offset, src.strides, shape)?;

    let len = shape[axis];
    let (ds, ss) = (dst.strides[axis], src.strides[axis]);
    let out = dst.data;
    walk(
        &outer[..rank],
        [dst.offset, src.offset],
        [dst.strides, src.strides],
        |[d, s]| {
            let max = slice_max(src.data, s, ss, len);
            let mut sum = 0.0f32;
            let mut sp = s as isize;
            for _ in 0..len {
                sum += (src.data[sp as usize] - max).exp();
                sp += ss;
            }
            let shift = max + sum.ln();
            let (mut dp, mut sp) = (d as isize, s as isize);
            for _ in 0..len {
                out[dp as usize] = src.data[sp as usize] - shift;
                dp += ds;
                sp += ss;
            }
        },
    );
    Ok(())
}

/// Softmax backward: `dst = y ⊙ (g − Σ_axis(g ⊙ y))`.
pub fn softmax_grad(
    dst: StridedMut<'_>,
    grad: StridedRef<'_>,
    y: StridedRef<'_>,
    shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    const OP: &str = "softmax_grad";
    let (outer, rank) = slice_shape(OP, shape, axis)?;
    check_operand(OP, "dst", dst.data.len(), dst.offset, dst.strides, shape)?;
    check_writable(OP, dst.strides, shape)?;
    check_operand(OP, "grad", grad.data.len(), grad.offset, grad.strides, shape)?;
    check_operand(OP, "y", y.data.len(), y.offset, y.strides, shape)?;

    let len = shape[axis];
    let (ds, gs, ys) = (dst.strides[axis], grad.strides[axis], y.strides[axis]);
    let out = dst.data;
    walk(
        &outer[..rank],
        [dst.offset, grad.offset, y.offset],
        [dst.strides, grad.strides, y.strides],
        |[d, g, o]| {
            let mut dot = 0.0f32;
            let (mut gp, mut yp) = (g as isize, o as isize);
            for _ in 0..len {
                dot += grad.data[gp as usize] * y.data[yp as usize];
                gp += gs;
                yp += ys;
            }
            let (mut dp, mut gp, mut yp) = (d as isize, g as isize, o as isize);
            for _ in 0..len {
                out[dp as usize] = y.data[yp as usize] * (grad.data[gp as usize] - dot);
                dp += ds;
                gp += gs;
                yp += ys;
            }
        },
    );
    Ok(())
}

/// [`softmax`] over contiguous row-major operands.
pub fn softmax_contiguous(
    dst: &mut [f32],
    src: &[f32],
    shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    let strides = row_major(shape)?;
    let strides = &strides[..shape.len()];
    softmax(
        StridedMut::new(dst, 0, strides),
        StridedRef::new(src, 0, strides),
        shape,
        axis,
    )
}

/// [`log_softmax`] over contiguous row-major operands.
pub fn log_softmax_contiguous(
    dst: &mut [f32],
    src: &[f32],
    shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    let strides = row_major(shape)?;
    let strides = &strides[..shape.len()];
    log_softmax(
        StridedMut::new(dst, 0, strides),
        StridedRef::new(src, 0, strides),
        shape,
        axis,
    )
}

/// [`softmax_grad`] over contiguous row-major operands.
pub fn softmax_grad_contiguous(
    dst: &mut [f32],
    grad: &[f32],
    y: &[f32],
    shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    let strides = row_major(shape)?;
    let strides = &strides[..shape.len()];
    softmax_grad(
        StridedMut::new(dst, 0, strides),
        StridedRef::new(grad, 0, strides),
        StridedRef::new(y, 0, strides),
        shape,
        axis,
    )
}

fn row_major(shape: &[usize]) -> Result<[isize; MAX_RANK], KernelError> {
    if shape.len() > MAX_RANK {
        return Err(KernelError::UnsupportedCombination {
            op: "softmax",
            detail: format!("rank {} exceeds {MAX_RANK}", shape.len()),
        });
    }
    let mut strides = [0isize; MAX_RANK];
    contiguous_strides_into(shape, &mut strides);
    Ok(strides)
}
