// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! BLAS Level 1: vector-vector operations with explicit increments.

use crate::error::check_vector;
use crate::KernelError;

/// `y[i·inc_y] += alpha · x[i·inc_x]` for `i ∈ [0, n)`.
pub fn axpy(
    y: &mut [f32],
    x: &[f32],
    inc_y: usize,
    inc_x: usize,
    n: usize,
    alpha: f32,
) -> Result<(), KernelError> {
    check_vector("axpy", "y", y.len(), n, inc_y)?;
    check_vector("axpy", "x", x.len(), n, inc_x)?;
    if alpha == 0.0 {
        return Ok(());
    }
    if inc_x == 1 && inc_y == 1 {
        for (yi, &xi) in y[..n].iter_mut().zip(&x[..n]) {
            *yi += alpha * xi;
        }
    } else {
        for i in 0..n {
            y[i * inc_y] += alpha * x[i * inc_x];
        }
    }
    Ok(())
}

/// Returns `Σ x[i·inc_x] · y[i·inc_y]`, accumulated in index order.
pub fn dot(
    x: &[f32],
    y: &[f32],
    inc_x: usize,
    inc_y: usize,
    n: usize,
) -> Result<f32, KernelError> {
    check_vector("dot", "x", x.len(), n, inc_x)?;
    check_vector("dot", "y", y.len(), n, inc_y)?;
    let mut sum = 0.0f32;
    for i in 0..n {
        sum += x[i * inc_x] * y[i * inc_y];
    }
    Ok(sum)
}

/// Euclidean norm, computed with a running scale so that large or tiny
/// inputs neither overflow nor underflow.
pub fn nrm2(x: &[f32], inc: usize, n: usize) -> Result<f32, KernelError> {
    check_vector("nrm2", "x", x.len(), n, inc)?;
    let mut scale = 0.0f32;
    let mut ssq = 1.0f32;
    for i in 0..n {
        let v = x[i * inc];
        if v.is_nan() {
            return Ok(f32::NAN);
        }
        if v != 0.0 {
            let abs = v.abs();
            if scale < abs {
                let r = scale / abs;
                ssq = 1.0 + ssq * r * r;
                scale = abs;
            } else {
                let r = abs / scale;
                ssq += r * r;
            }
        }
    }
    Ok(scale * ssq.sqrt())
}

/// Returns `Σ |x[i·inc]|`.
pub fn asum(x: &[f32], inc: usize, n: usize) -> Result<f32, KernelError> {
    check_vector("asum", "x", x.len(), n, inc)?;
    let mut sum = 0.0f32;
    for i in 0..n {
        sum += x[i * inc].abs();
    }
    Ok(sum)
}

/// `x[i·inc] *= alpha`.
pub fn scal(x: &mut [f32], inc: usize, n: usize, alpha: f32) -> Result<(), KernelError> {
    check_vector("scal", "x", x.len(), n, inc)?;
    for i in 0..n {
        x[i * inc] *= alpha;
    }
    Ok(())
}

/// `y[i·inc_y] = x[i·inc_x]`.
pub fn copy(
    y: &mut [f32],
    x: &[f32],
    inc_y: usize,
    inc_x: usize,
    n: usize,
) -> Result<(), KernelError> {
    check_vector("copy", "y", y.len(), n, inc_y)?;
    check_vector("copy", "x", x.len(), n, inc_x)?;
    if inc_x == 1 && inc_y == 1 {
        y[..n].copy_from_slice(&x[..n]);
    } else {
        for i in 0..n {
            y[i * inc_y] = x[i * inc_x];
        }
    }
    Ok(())
}

/// Exchanges `x[i·inc_x]` and `y[i·inc_y]`.
pub fn swap(
    x: &mut [f32],
    y: &mut [f32],
    inc_x: usize,
    inc_y: usize,
    n: usize,
) -> Result<(), KernelError> {
    check_vector("swap", "x", x.len(), n, inc_x)?;
    check_vector("swap", "y", y.len(), n, inc_y)?;
    for i in 0..n {
        std::mem::swap(&mut x[i * inc_x], &mut y[i * inc_y]);
    }
    Ok(())
}

/// Index (in units of `inc`) of the first element with the largest
/// absolute value, or `None` when `n == 0`.
pub fn iamax(x: &[f32], inc: usize, n: usize) -> Result<Option<usize>, KernelError> {
    check_vector("iamax", "x", x.len(), n, inc)?;
    if n == 0 {
        return Ok(None);
    }
    let mut best = 0;
    let mut best_abs = x[0].abs();
    for i in 1..n {
        let v = x[i * inc].abs();
        if v > best_abs {
            best = i;
            best_abs = v;
        }
    }
    Ok(Some(best))
}
