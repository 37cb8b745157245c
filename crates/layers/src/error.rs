// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the layer framework.

use tensor_core::{Shape, TensorError};

use crate::ParamId;

/// Errors raised by layer construction and execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayerError {
    /// A method was called in the wrong lifecycle state, e.g. backward
    /// before forward or forward with a shape other than the init shape.
    #[error("lifecycle violation in layer '{layer}': {detail}")]
    Lifecycle { layer: String, detail: String },

    /// `set_param` named an id this layer does not register.
    #[error("layer '{layer}' has no parameter {id}")]
    UnknownParameter { layer: String, id: ParamId },

    #[error("shape mismatch in layer '{layer}': expected {expected}, got {actual}")]
    ShapeMismatch {
        layer: String,
        expected: Shape,
        actual: Shape,
    },

    /// The layer does not implement the requested operation.
    #[error("layer '{layer}' does not support {op}")]
    Unsupported { layer: String, op: String },

    /// The layer configuration cannot describe a valid layer.
    #[error("invalid configuration for layer '{layer}': {detail}")]
    InvalidConfig { layer: String, detail: String },

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Kernel(#[from] kernels::KernelError),
}

impl LayerError {
    pub(crate) fn lifecycle(layer: &str, detail: impl Into<String>) -> Self {
        LayerError::Lifecycle {
            layer: layer.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn shape(layer: &str, expected: &Shape, actual: &Shape) -> Self {
        LayerError::ShapeMismatch {
            layer: layer.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        }
    }

    pub(crate) fn config(layer: &str, detail: impl Into<String>) -> Self {
        LayerError::InvalidConfig {
            layer: layer.to_string(),
            detail: detail.into(),
        }
    }
}
