// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor operations.

use crate::Shape;

/// Errors that can occur during tensor operations.
///
/// NaN and Inf are values, never errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer length does not match the shape.
    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// A slice bound, axis or element index lies outside its range.
    #[error("index {index} out of range for {op} (bound {bound})")]
    IndexOutOfRange {
        op: &'static str,
        index: usize,
        bound: usize,
    },

    /// A view cannot be reinterpreted with the requested shape without a copy.
    #[error("cannot reshape {from} into {to} without copying")]
    NonReshapable { from: Shape, to: Shape },

    /// The operation is not defined for these operands, e.g. writing
    /// through a broadcast view.
    #[error("unsupported operation {op}: {detail}")]
    UnsupportedOperation { op: &'static str, detail: String },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype:?} for operation {op}")]
    UnsupportedDType {
        op: &'static str,
        dtype: crate::DType,
    },

    /// A serialized tensor record is malformed.
    #[error("tensor codec: {detail}")]
    Codec { detail: String },

    #[error(transparent)]
    Kernel(#[from] kernels::KernelError),
}

impl TensorError {
    pub(crate) fn shape(op: &'static str, lhs: &Shape, rhs: &Shape) -> Self {
        TensorError::ShapeMismatch {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        }
    }

    pub(crate) fn unsupported(op: &'static str, detail: impl Into<String>) -> Self {
        TensorError::UnsupportedOperation {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn codec(detail: impl Into<String>) -> Self {
        TensorError::Codec {
            detail: detail.into(),
        }
    }
}
