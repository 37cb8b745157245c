// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batched GEMM and GEMV.
//!
//! [`gemm_batched`] takes one slice per batch item; [`gemm_strided`] and
//! [`gemv_batched`] address every item inside a single buffer at a fixed
//! element stride. Output items must not overlap.

#![allow(clippy::too_many_arguments)]

use super::{gemm, gemv, Transpose};
use crate::error::{check_len, matrix_span};
use crate::parallel::for_each_chunk;
use crate::KernelError;

/// Applies [`gemm`] to each `(C[i], A[i], B[i])` triple.
pub fn gemm_batched(
    trans_a: Transpose,
    trans_b: Transpose,
    c: &mut [&mut [f32]],
    a: &[&[f32]],
    b: &[&[f32]],
    ldc: usize,
    lda: usize,
    ldb: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
) -> Result<(), KernelError> {
    if a.len() != c.len() || b.len() != c.len() {
        return Err(KernelError::ShapeMismatch {
            op: "gemm_batched",
            detail: format!(
                "batch counts differ: C has {}, A has {}, B has {}",
                c.len(),
                a.len(),
                b.len()
            ),
        });
    }
    for ((ci, ai), bi) in c.iter_mut().zip(a).zip(b) {
        gemm(trans_a, trans_b, ci, ai, bi, ldc, lda, ldb, m, n, k, alpha, beta)?;
    }
    Ok(())
}

/// Applies [`gemm`] to `batch_count` matrices laid out in single buffers,
/// item `i` starting at `i · stride_{a,b,c}`.
///
/// `stride_c` must be at least the span of one `C` item so that items do not
/// overlap. With the `parallel` feature, items run on separate threads.
pub fn gemm_strided(
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
    batch_count: usize,
    stride_a: usize,
    stride_b: usize,
    stride_c: usize,
) -> Result<(), KernelError> {
    const OP: &str = "gemm_strided";
    if batch_count == 0 {
        return Ok(());
    }
    let (a_rows, a_cols) = match trans_a {
        Transpose::No => (m, k),
        Transpose::Yes => (k, m),
    };
    let (b_rows, b_cols) = match trans_b {
        Transpose::No => (k, n),
        Transpose::Yes => (n, k),
    };
    let a_item = matrix_span(a_rows, a_cols, lda);
    let b_item = matrix_span(b_rows, b_cols, ldb);
    let c_item = matrix_span(m, n, ldc);
    if batch_count > 1 && stride_c < c_item {
        return Err(KernelError::UnsupportedCombination {
            op: OP,
            detail: format!("stride_c {stride_c} overlaps C items of {c_item} elements"),
        });
    }
    check_len(OP, "A", a.len(), (batch_count - 1) * stride_a + a_item)?;
    check_len(OP, "B", b.len(), (batch_count - 1) * stride_b + b_item)?;
    check_len(OP, "C", c.len(), (batch_count - 1) * stride_c + c_item)?;
    if c_item == 0 {
        return Ok(());
    }

    // Item chunks of stride_c; the shape check above already passed, so the
    // per-item gemm calls cannot fail.
    let chunk = stride_c.max(c_item);
    let c = &mut c[..(batch_count - 1) * chunk + c_item];
    let status = std::sync::Mutex::new(Ok(()));
    for_each_chunk(c, chunk, |i, ci| {
        let ai = &a[i * stride_a..];
        let bi = &b[i * stride_b..];
        if let Err(e) = gemm(trans_a, trans_b, ci, ai, bi, ldc, lda, ldb, m, n, k, alpha, beta) {
            *status.lock().unwrap_or_else(|p| p.into_inner()) = Err(e);
        }
    });
    status.into_inner().unwrap_or_else(|p| p.into_inner())
}

/// Applies [`gemv`] to `batch_count` problems: `y_i = alpha · op(A_i) · x_i
/// + beta · y_i` with item `i` at `i · stride_{a,x,y}`.
pub fn gemv_batched(
    trans: Transpose,
    y: &mut [f32],
    a: &[f32],
    x: &[f32],
    lda: usize,
    m: usize,
    n: usize,
    alpha: f32,
    beta: f32,
    batch_count: usize,
    stride_a: usize,
    stride_x: usize,
    stride_y: usize,
) -> Result<(), KernelError> {
    const OP: &str = "gemv_batched";
    if batch_count == 0 {
        return Ok(());
    }
    let (x_len, y_len) = match trans {
        Transpose::No => (n, m),
        Transpose::Yes => (m, n),
    };
    if batch_count > 1 && stride_y < y_len {
        return Err(KernelError::UnsupportedCombination {
            op: OP,
            detail: format!("stride_y {stride_y} overlaps y items of {y_len} elements"),
        });
    }
    check_len(OP, "A", a.len(), (batch_count - 1) * stride_a + matrix_span(m, n, lda))?;
    check_len(OP, "x", x.len(), (batch_count - 1) * stride_x + x_len)?;
    check_len(OP, "y", y.len(), (batch_count - 1) * stride_y + y_len)?;
    for i in 0..batch_count {
        gemv(
            trans,
            &mut y[i * stride_y..],
            &a[i * stride_a..],
            &x[i * stride_x..],
            lda,
            m,
            n,
            alpha,
            beta,
        )?;
    }
    Ok(())
}
