// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! BLAS Level 2: matrix-vector operations on row-major matrices.
//!
//! Vectors are unit-stride. `A` is `M × N` with leading dimension `lda ≥ N`
//! unless stated otherwise.

#![allow(clippy::too_many_arguments)]

use super::{scale_by_beta, triangular_entry, Diag, Transpose, Uplo};
use crate::error::{check_len, check_matrix};
use crate::KernelError;

/// `y = alpha · op(A) · x + beta · y`, dispatching on `trans`.
pub fn gemv(
    trans: Transpose,
    y: &mut [f32],
    a: &[f32],
    x: &[f32],
    lda: usize,
    m: usize,
    n: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    match trans {
        Transpose::No => gemv_n(y, a, x, lda, m, n, alpha, beta),
        Transpose::Yes => gemv_t(y, a, x, lda, m, n, alpha, beta),
    }
}

/// `y[M] = alpha · A[M×N] · x[N] + beta · y`.
pub fn gemv_n(
    y: &mut [f32],
    a: &[f32],
    x: &[f32],
    lda: usize,
    m: usize,
    n: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    check_matrix("gemv_n", "A", a.len(), m, n, lda)?;
    check_len("gemv_n", "x", x.len(), n)?;
    check_len("gemv_n", "y", y.len(), m)?;

    let y = &mut y[..m];
    scale_by_beta(y, beta);
    if alpha == 0.0 {
        return Ok(());
    }
    for (i, yi) in y.iter_mut().enumerate() {
        let row = &a[i * lda..i * lda + n];
        let mut sum = 0.0f32;
        for (&aij, &xj) in row.iter().zip(&x[..n]) {
            sum += aij * xj;
        }
        *yi += alpha * sum;
    }
    Ok(())
}

/// `y[N] = alpha · A[M×N]ᵀ · x[M] + beta · y`.
pub fn gemv_t(
    y: &mut [f32],
    a: &[f32],
    x: &[f32],
    lda: usize,
    m: usize,
    n: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    check_matrix("gemv_t", "A", a.len(), m, n, lda)?;
    check_len("gemv_t", "x", x.len(), m)?;
    check_len("gemv_t", "y", y.len(), n)?;

    let y = &mut y[..n];
    scale_by_beta(y, beta);
    if alpha == 0.0 {
        return Ok(());
    }
    // Row sweep keeps the inner loop contiguous; each y[j] still sums rows
    // in increasing order.
    for (i, &xi) in x[..m].iter().enumerate() {
        let scaled = alpha * xi;
        let row = &a[i * lda..i * lda + n];
        for (yj, &aij) in y.iter_mut().zip(row) {
            *yj += scaled * aij;
        }
    }
    Ok(())
}

/// Rank-1 update `A[M×N] += alpha · x[M] · y[N]ᵀ`.
pub fn ger(
    a: &mut [f32],
    x: &[f32],
    y: &[f32],
    lda: usize,
    m: usize,
    n: usize,
    alpha: f32,
) -> Result<(), KernelError> {
    check_matrix("ger", "A", a.len(), m, n, lda)?;
    check_len("ger", "x", x.len(), m)?;
    check_len("ger", "y", y.len(), n)?;
    if alpha == 0.0 {
        return Ok(());
    }
    for (i, &xi) in x[..m].iter().enumerate() {
        let scaled = alpha * xi;
        let row = &mut a[i * lda..i * lda + n];
        for (aij, &yj) in row.iter_mut().zip(&y[..n]) {
            *aij += scaled * yj;
        }
    }
    Ok(())
}

/// `y = alpha · A · x + beta · y` for symmetric `A[N×N]`, reading only the
/// `uplo` triangle.
pub fn symv(
    y: &mut [f32],
    a: &[f32],
    x: &[f32],
    lda: usize,
    n: usize,
    alpha: f32,
    beta: f32,
    uplo: Uplo,
) -> Result<(), KernelError> {
    check_matrix("symv", "A", a.len(), n, n, lda)?;
    check_len("symv", "x", x.len(), n)?;
    check_len("symv", "y", y.len(), n)?;

    let y = &mut y[..n];
    scale_by_beta(y, beta);
    if alpha == 0.0 {
        return Ok(());
    }
    for (i, yi) in y.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for (j, &xj) in x[..n].iter().enumerate() {
            let stored = match uplo {
                Uplo::Upper => j >= i,
                Uplo::Lower => j <= i,
            };
            let aij = if stored { a[i * lda + j] } else { a[j * lda + i] };
            sum += aij * xj;
        }
        *yi += alpha * sum;
    }
    Ok(())
}

/// `y = op(A) · x` for triangular `A[N×N]`.
///
/// `y` and `x` are distinct slices; callers wanting an in-place update copy
/// `x` first.
pub fn trmv(
    y: &mut [f32],
    a: &[f32],
    x: &[f32],
    lda: usize,
    n: usize,
    uplo: Uplo,
    trans: Transpose,
    diag: Diag,
) -> Result<(), KernelError> {
    check_matrix("trmv", "A", a.len(), n, n, lda)?;
    check_len("trmv", "x", x.len(), n)?;
    check_len("trmv", "y", y.len(), n)?;

    // op(A) is upper triangular for (Upper, No) and (Lower, Yes).
    let upper = matches!(
        (uplo, trans),
        (Uplo::Upper, Transpose::No) | (Uplo::Lower, Transpose::Yes)
    );
    for (i, yi) in y[..n].iter_mut().enumerate() {
        let cols = if upper { i..n } else { 0..i + 1 };
        let mut sum = 0.0f32;
        for j in cols {
            sum += triangular_entry(a, lda, i, j, uplo, trans, diag) * x[j];
        }
        *yi = sum;
    }
    Ok(())
}
