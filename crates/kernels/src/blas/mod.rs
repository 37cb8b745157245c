// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! BLAS-style linear algebra over row-major FP32 slices.
//!
//! Signatures follow the classical BLAS argument order with the output
//! first. Matrices are row-major: the leading dimension is the distance in
//! elements between the starts of consecutive rows. Vector increments are
//! element strides and must be positive.
//!
//! When `beta == 0` the destination is overwritten without being read, so
//! NaN in an uninitialised output does not leak into the result.

mod batched;
mod level1;
mod level2;
mod level3;

pub use batched::{gemm_batched, gemm_strided, gemv_batched};
pub use level1::{asum, axpy, copy, dot, iamax, nrm2, scal, swap};
pub use level2::{gemv, gemv_n, gemv_t, ger, symv, trmv};
pub use level3::{gemm, gemm_nn, gemm_nt, gemm_tn, gemm_tt, syrk, trmm};

/// Whether an operand is used as stored or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transpose {
    #[default]
    No,
    Yes,
}

impl Transpose {
    /// Returns `Yes` when `flag` is true.
    pub fn from_bool(flag: bool) -> Self {
        if flag {
            Transpose::Yes
        } else {
            Transpose::No
        }
    }

    /// Returns the opposite flag.
    pub fn flip(self) -> Self {
        match self {
            Transpose::No => Transpose::Yes,
            Transpose::Yes => Transpose::No,
        }
    }

    pub fn is_transposed(self) -> bool {
        self == Transpose::Yes
    }
}

/// Which triangle of a symmetric or triangular matrix is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uplo {
    Upper,
    Lower,
}

/// Whether a triangular matrix has an implicit unit diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diag {
    NonUnit,
    Unit,
}

/// Whether the triangular operand multiplies from the left or the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Element `(row, col)` of `op(A)` for a triangular `A`, zero outside the
/// referenced triangle.
#[inline]
pub(crate) fn triangular_entry(
    a: &[f32],
    lda: usize,
    row: usize,
    col: usize,
    uplo: Uplo,
    trans: Transpose,
    diag: Diag,
) -> f32 {
    let (r, c) = match trans {
        Transpose::No => (row, col),
        Transpose::Yes => (col, row),
    };
    let inside = match uplo {
        Uplo::Upper => c >= r,
        Uplo::Lower => c <= r,
    };
    if !inside {
        0.0
    } else if r == c && diag == Diag::Unit {
        1.0
    } else {
        a[r * lda + c]
    }
}

/// Applies `y = beta * y` with the BLAS convention for `beta == 0`.
#[inline]
pub(crate) fn scale_by_beta(y: &mut [f32], beta: f32) {
    if beta == 0.0 {
        y.iter_mut().for_each(|v| *v = 0.0);
    } else if beta != 1.0 {
        y.iter_mut().for_each(|v| *v *= beta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangular_entry_upper() {
        // [[1, 2], [3, 4]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let e = |r, c, t, d| triangular_entry(&a, 2, r, c, Uplo::Upper, t, d);
        assert_eq!(e(0, 1, Transpose::No, Diag::NonUnit), 2.0);
        assert_eq!(e(1, 0, Transpose::No, Diag::NonUnit), 0.0);
        assert_eq!(e(1, 0, Transpose::Yes, Diag::NonUnit), 2.0);
        assert_eq!(e(1, 1, Transpose::No, Diag::Unit), 1.0);
    }

    #[test]
    fn test_scale_by_beta_zero_clears_nan() {
        let mut y = [f32::NAN, 2.0];
        scale_by_beta(&mut y, 0.0);
        assert_eq!(y, [0.0, 0.0]);
    }

    #[test]
    fn test_transpose_flags() {
        assert_eq!(Transpose::from_bool(true), Transpose::Yes);
        assert_eq!(Transpose::Yes.flip(), Transpose::No);
        assert!(!Transpose::default().is_transposed());
    }
}
