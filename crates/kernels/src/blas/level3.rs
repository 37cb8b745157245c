// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! BLAS Level 3: matrix-matrix operations on row-major matrices.
//!
//! `C` is `M × N` with leading dimension `ldc`. For `op(A)` of shape
//! `M × K`, a non-transposed `A` is stored `M × K` (`lda ≥ K`) and a
//! transposed one `K × M` (`lda ≥ M`); likewise for `B`.
//!
//! GEMM rows of `C` are independent, so with the `parallel` feature they are
//! computed on separate threads. Each `C[i][j]` accumulates over `p` in
//! increasing order regardless of the build.

#![allow(clippy::too_many_arguments)]

use super::{scale_by_beta, triangular_entry, Diag, Side, Transpose, Uplo};
use crate::error::{check_matrix, matrix_span};
use crate::parallel::for_each_chunk;
use crate::KernelError;

/// `C = alpha · op_A(A) · op_B(B) + beta · C`.
pub fn gemm(
    trans_a: Transpose,
    trans_b: Transpose,
    c: &mut [f32],
    a: &[f32],
    b: &[f32],
    ldc: usize,
    lda: usize,
    ldb: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    let (a_rows, a_cols) = match trans_a {
        Transpose::No => (m, k),
        Transpose::Yes => (k, m),
    };
    let (b_rows, b_cols) = match trans_b {
        Transpose::No => (k, n),
        Transpose::Yes => (n, k),
    };
    check_matrix("gemm", "A", a.len(), a_rows, a_cols, lda)?;
    check_matrix("gemm", "B", b.len(), b_rows, b_cols, ldb)?;
    check_matrix("gemm", "C", c.len(), m, n, ldc)?;
    if m == 0 || n == 0 {
        return Ok(());
    }

    let c = &mut c[..matrix_span(m, n, ldc)];
    for_each_chunk(c, ldc, |i, row| {
        let row = &mut row[..n];
        scale_by_beta(row, beta);
        if alpha == 0.0 || k == 0 {
            return;
        }
        match (trans_a, trans_b) {
            (Transpose::No, Transpose::No) => {
                let a_row = &a[i * lda..i * lda + k];
                for (p, &aip) in a_row.iter().enumerate() {
                    let scaled = alpha * aip;
                    let b_row = &b[p * ldb..p * ldb + n];
                    for (cij, &bpj) in row.iter_mut().zip(b_row) {
                        *cij += scaled * bpj;
                    }
                }
            }
            (Transpose::No, Transpose::Yes) => {
                let a_row = &a[i * lda..i * lda + k];
                for (j, cij) in row.iter_mut().enumerate() {
                    let b_row = &b[j * ldb..j * ldb + k];
                    let mut sum = 0.0f32;
                    for (&aip, &bjp) in a_row.iter().zip(b_row) {
                        sum += aip * bjp;
                    }
                    *cij += alpha * sum;
                }
            }
            (Transpose::Yes, Transpose::No) => {
                for p in 0..k {
                    let scaled = alpha * a[p * lda + i];
                    let b_row = &b[p * ldb..p * ldb + n];
                    for (cij, &bpj) in row.iter_mut().zip(b_row) {
                        *cij += scaled * bpj;
                    }
                }
            }
            (Transpose::Yes, Transpose::Yes) => {
                for (j, cij) in row.iter_mut().enumerate() {
                    let b_row = &b[j * ldb..j * ldb + k];
                    let mut sum = 0.0f32;
                    for (p, &bjp) in b_row.iter().enumerate() {
                        sum += a[p * lda + i] * bjp;
                    }
                    *cij += alpha * sum;
                }
            }
        }
    });
    Ok(())
}

/// `C = alpha · A · B + beta · C`.
pub fn gemm_nn(
    c: &mut [f32],
    a: &[f32],
    b: &[f32],
    ldc: usize,
    lda: usize,
    ldb: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    gemm(Transpose::No, Transpose::No, c, a, b, ldc, lda, ldb, m, n, k, alpha, beta)
}

/// `C = alpha · A · Bᵀ + beta · C`.
pub fn gemm_nt(
    c: &mut [f32],
    a: &[f32],
    b: &[f32],
    ldc: usize,
    lda: usize,
    ldb: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    gemm(Transpose::No, Transpose::Yes, c, a, b, ldc, lda, ldb, m, n, k, alpha, beta)
}

/// `C = alpha · Aᵀ · B + beta · C`.
pub fn gemm_tn(
    c: &mut [f32],
    a: &[f32],
    b: &[f32],
    ldc: usize,
    lda: usize,
    ldb: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    gemm(Transpose::Yes, Transpose::No, c, a, b, ldc, lda, ldb, m, n, k, alpha, beta)
}

/// `C = alpha · Aᵀ · Bᵀ + beta · C`.
pub fn gemm_tt(
    c: &mut [f32],
    a: &[f32],
    b: &[f32],
    ldc: usize,
    lda: usize,
    ldb: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    gemm(Transpose::Yes, Transpose::Yes, c, a, b, ldc, lda, ldb, m, n, k, alpha, beta)
}

/// Symmetric rank-k update `C[N×N] = alpha · A · Aᵀ + beta · C` with
/// `A` of shape `N × K`. Only the `uplo` triangle of `C` is touched.
pub fn syrk(
    c: &mut [f32],
    a: &[f32],
    ldc: usize,
    lda: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
    uplo: Uplo,
) -> Result<(), KernelError> {
    check_matrix("syrk", "A", a.len(), n, k, lda)?;
    check_matrix("syrk", "C", c.len(), n, n, ldc)?;

    for i in 0..n {
        let cols = match uplo {
            Uplo::Upper => i..n,
            Uplo::Lower => 0..i + 1,
        };
        let a_i = &a[i * lda..i * lda + k];
        for j in cols {
            let a_j = &a[j * lda..j * lda + k];
            let mut sum = 0.0f32;
            for (&x, &y) in a_i.iter().zip(a_j) {
                sum += x * y;
            }
            let cij = &mut c[i * ldc + j];
            let prior = if beta == 0.0 { 0.0 } else { beta * *cij };
            *cij = alpha * sum + prior;
        }
    }
    Ok(())
}

/// Triangular matrix multiply.
///
/// - `Side::Left`: `C[M×N] = alpha · op(A) · B + beta · C`, `A` is `M × M`.
/// - `Side::Right`: `C[M×N] = alpha · B · op(A) + beta · C`, `A` is `N × N`.
///
/// `B` is `M × N` in both cases.
pub fn trmm(
    c: &mut [f32],
    a: &[f32],
    b: &[f32],
    ldc: usize,
    lda: usize,
    ldb: usize,
    m: usize,
    n: usize,
    alpha: f32,
    beta: f32,
    side: Side,
    uplo: Uplo,
    trans: Transpose,
    diag: Diag,
) -> Result<(), KernelError> {
    let order = match side {
        Side::Left => m,
        Side::Right => n,
    };
    check_matrix("trmm", "A", a.len(), order, order, lda)?;
    check_matrix("trmm", "B", b.len(), m, n, ldb)?;
    check_matrix("trmm", "C", c.len(), m, n, ldc)?;

    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            match side {
                Side::Left => {
                    for p in 0..m {
                        let t = triangular_entry(a, lda, i, p, uplo, trans, diag);
                        if t != 0.0 {
                            sum += t * b[p * ldb + j];
                        }
                    }
                }
                Side::Right => {
                    for p in 0..n {
                        let t = triangular_entry(a, lda, p, j, uplo, trans, diag);
                        if t != 0.0 {
                            sum += b[i * ldb + p] * t;
                        }
                    }
                }
            }
            let cij = &mut c[i * ldc + j];
            let prior = if beta == 0.0 { 0.0 } else { beta * *cij };
            *cij = alpha * sum + prior;
        }
    }
    Ok(())
}
