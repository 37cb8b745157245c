// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for models, optimizers, losses and checkpoints.

use layers::LayerError;
use std::path::PathBuf;
use tensor_core::{Shape, TensorError};

/// Errors surfaced by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A layer failed; tagged with its position in the model.
    #[error("layer {index} ('{name}'): {source}")]
    Layer {
        index: usize,
        name: String,
        #[source]
        source: LayerError,
    },

    /// The model input does not have the shape the model was built for.
    #[error("model expects input {expected}, got {actual}")]
    InputShape { expected: Shape, actual: Shape },

    /// An optimizer could not update a parameter.
    #[error("optimizer error: {detail}")]
    Optimizer { detail: String },

    /// A loss computation failed.
    #[error("loss error: {0}")]
    Loss(#[from] TensorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A checkpoint could not be written, read or applied.
    #[error("checkpoint '{}': {detail}", path.display())]
    Checkpoint { path: PathBuf, detail: String },
}

impl RuntimeError {
    pub(crate) fn layer(index: usize, name: &str, source: LayerError) -> Self {
        Self::Layer {
            index,
            name: name.to_string(),
            source,
        }
    }

    pub(crate) fn checkpoint(path: &std::path::Path, detail: impl Into<String>) -> Self {
        Self::Checkpoint {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}
