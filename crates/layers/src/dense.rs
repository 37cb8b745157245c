// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fully connected layer.

use kernels::blas;
use serde::{Deserialize, Serialize};
use tensor_core::{Shape, Tensor, Transpose};

use crate::init::{layer_rng, xavier_uniform};
use crate::layer::contiguous_or_copy;
use crate::{Layer, LayerBase, LayerError, ParamId};

fn default_true() -> bool {
    true
}

/// Configuration for [`Dense`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseConfig {
    pub in_features: usize,
    pub out_features: usize,
    #[serde(default = "default_true")]
    pub bias: bool,
    /// Seed for the weight initialiser; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl DenseConfig {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            bias: true,
            seed: None,
            name: None,
        }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// `output = input · W + b` with `W ∈ [in, out]` and `b ∈ [out]`.
///
/// Accepts `[in]` (GEMV) or `[batch, in]` (GEMM) inputs.
#[derive(Debug)]
pub struct Dense {
    base: LayerBase,
    config: DenseConfig,
    /// Per-batch bias gradient before it is accumulated.
    bias_scratch: Option<Tensor>,
}

impl Dense {
    pub fn new(config: DenseConfig) -> Result<Self, LayerError> {
        let base = LayerBase::new("dense", config.name.clone(), true).with_contiguous_input();
        if config.in_features == 0 || config.out_features == 0 {
            return Err(LayerError::config(
                base.name(),
                format!("features {} -> {}", config.in_features, config.out_features),
            ));
        }
        Ok(Self {
            base,
            config,
            bias_scratch: None,
        })
    }

    pub fn config(&self) -> &DenseConfig {
        &self.config
    }
}

impl Layer for Dense {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "dense"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        let expected = Shape::vector(self.config.in_features);
        match input_shape.dims() {
            [i] if *i == self.config.in_features => Ok(Shape::vector(self.config.out_features)),
            [b, i] if *i == self.config.in_features => Ok(Shape::matrix(*b, self.config.out_features)),
            _ => Err(LayerError::shape(self.base.name(), &expected, input_shape)),
        }
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        let (i, o) = (self.config.in_features, self.config.out_features);
        let mut rng = layer_rng(self.config.seed);
        self.base.register(ParamId::Weights, xavier_uniform([i, o], i, o, &mut rng)?);
        if self.config.bias {
            self.base.register(ParamId::Biases, Tensor::zeros([o]));
            if input_shape.rank() == 2 {
                self.bias_scratch = Some(Tensor::zeros([o]));
            }
        }
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let io = self.base.io();
        let name = io.name;
        let w = io
            .params
            .get(ParamId::Weights)
            .ok_or_else(|| LayerError::lifecycle(name, "weights missing"))?;
        if io.input.rank() == 1 {
            io.output.matvec(&w.data, io.input, Transpose::Yes)?;
        } else {
            io.output
                .gemm(io.input, &w.data, Transpose::No, Transpose::No, 1.0, 0.0)?;
        }
        if let Some(b) = io.params.get(ParamId::Biases) {
            io.output.add_(&b.data)?;
        }
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let io = self.base.io();
        let name = io.name;
        let batched = io.input.rank() == 2;

        {
            let w = io
                .params
                .get(ParamId::Weights)
                .ok_or_else(|| LayerError::lifecycle(name, "weights missing"))?;
            if batched {
                io.grad_input
                    .gemm(grad_output, &w.data, Transpose::No, Transpose::Yes, 1.0, 0.0)?;
            } else {
                io.grad_input.matvec(&w.data, grad_output, Transpose::No)?;
            }
        }

        if let Some(gw) = io.params.get_mut(ParamId::Weights).and_then(|p| p.grad.as_mut()) {
            if batched {
                gw.gemm(io.input, grad_output, Transpose::Yes, Transpose::No, 1.0, 1.0)?;
            } else {
                let g = contiguous_or_copy(name, grad_output);
                let (i, o) = (self.config.in_features, self.config.out_features);
                let x = io.input.data()?;
                let gv = g.data()?;
                let mut acc = gw.data_mut()?;
                blas::ger(&mut acc, &x, &gv, o, i, o, 1.0)?;
            }
        }

        if let Some(gb) = io.params.get_mut(ParamId::Biases).and_then(|p| p.grad.as_mut()) {
            match self.bias_scratch.as_mut() {
                Some(scratch) if batched => {
                    grad_output.sum(scratch, &[0])?;
                    gb.add_(scratch)?;
                }
                _ => {
                    gb.add_(grad_output)?;
                }
            }
        }
        Ok(self.base.finish_backward())
    }
}
