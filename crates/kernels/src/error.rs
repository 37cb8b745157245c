// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for primitive kernels.

/// Errors raised by kernel argument validation.
///
/// Kernels never fail on numeric content: NaN and Inf propagate through
/// arithmetic like any other value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// Slice lengths, leading dimensions or shape vectors disagree with the
    /// declared problem size.
    #[error("shape mismatch in {op}: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },

    /// A dimension that must be positive is zero, or a window does not fit.
    #[error("degenerate shape in {op}: {detail}")]
    DegenerateShape { op: &'static str, detail: String },

    /// The arguments are individually valid but cannot be combined.
    #[error("unsupported combination in {op}: {detail}")]
    UnsupportedCombination { op: &'static str, detail: String },
}

/// Number of elements addressed by `n` items spaced `inc` apart.
pub(crate) fn span(n: usize, inc: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n - 1) * inc + 1
    }
}

/// Number of elements addressed by a row-major `rows × cols` matrix with
/// leading dimension `ld`.
pub(crate) fn matrix_span(rows: usize, cols: usize, ld: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        (rows - 1) * ld + cols
    }
}

/// Checks that `len` covers `required` elements.
pub(crate) fn check_len(
    op: &'static str,
    name: &str,
    len: usize,
    required: usize,
) -> Result<(), KernelError> {
    if len < required {
        return Err(KernelError::ShapeMismatch {
            op,
            detail: format!("{name} has {len} elements, needs at least {required}"),
        });
    }
    Ok(())
}

/// Checks a vector operand described by an element count and increment.
pub(crate) fn check_vector(
    op: &'static str,
    name: &str,
    len: usize,
    n: usize,
    inc: usize,
) -> Result<(), KernelError> {
    if inc == 0 {
        return Err(KernelError::DegenerateShape {
            op,
            detail: format!("increment of {name} must be positive"),
        });
    }
    check_len(op, name, len, span(n, inc))
}

/// Checks a row-major matrix operand.
pub(crate) fn check_matrix(
    op: &'static str,
    name: &str,
    len: usize,
    rows: usize,
    cols: usize,
    ld: usize,
) -> Result<(), KernelError> {
    if cols > 0 && ld < cols {
        return Err(KernelError::ShapeMismatch {
            op,
            detail: format!("leading dimension of {name} is {ld}, smaller than its {cols} columns"),
        });
    }
    check_len(op, name, len, matrix_span(rows, cols, ld))
}
