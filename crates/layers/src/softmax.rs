// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Softmax layer.

use tensor_core::{Shape, Tensor};

use crate::{Layer, LayerBase, LayerError};

/// Softmax along `dim`; negative values count from the last axis.
///
/// Backward uses `y ⊙ (g − Σ_dim g ⊙ y)` on the stored output, computed
/// slice by slice without scratch tensors.
#[derive(Debug)]
pub struct Softmax {
    base: LayerBase,
    dim: isize,
}

impl Softmax {
    pub fn new(dim: isize) -> Self {
        Self {
            base: LayerBase::new("softmax", None, false),
            dim,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = LayerBase::new("softmax", Some(name.into()), false);
        self
    }

    pub fn dim(&self) -> isize {
        self.dim
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl Layer for Softmax {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "softmax"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        if input_shape.normalize_axis(self.dim).is_none() {
            return Err(LayerError::config(
                self.base.name(),
                format!("dim {} out of range for {input_shape}", self.dim),
            ));
        }
        Ok(input_shape.clone())
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let io = self.base.io();
        io.output.softmax(io.input, self.dim)?;
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let io = self.base.io();
        io.grad_input.softmax_grad(grad_output, io.output, self.dim)?;
        Ok(self.base.finish_backward())
    }
}
