// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Normalization layers.
//!
//! [`BatchNorm2D`] normalizes each channel with batch statistics while
//! training and with running statistics at inference. [`LayerNorm`]
//! normalizes each row over its last dimension and behaves the same in
//! both modes. Both scale by `gamma` and shift by `beta`.

use kernels::norm::{
    channel_moments, channel_normalize, channel_normalize_backward, layer_norm, layer_norm_backward,
};
use serde::{Deserialize, Serialize};
use tensor_core::{Shape, Tensor};

use crate::layer::contiguous_or_copy;
use crate::{Layer, LayerBase, LayerError, ParamId, ParamMap};

fn default_eps() -> f32 {
    1e-5
}

fn default_momentum() -> f32 {
    0.1
}

/// The data of `id`, or a lifecycle error naming `layer`.
fn param_data<'p>(params: &'p ParamMap, id: ParamId, layer: &str) -> Result<&'p Tensor, LayerError> {
    params
        .get(id)
        .map(|p| &p.data)
        .ok_or_else(|| LayerError::lifecycle(layer, format!("{id} missing")))
}

// ── BatchNorm2D ────────────────────────────────────────────────

/// Configuration for [`BatchNorm2D`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormConfig {
    /// Channel count `C` of `[N, C, ...]` inputs.
    pub num_features: usize,
    #[serde(default = "default_eps")]
    pub eps: f32,
    /// Weight of the newest batch in the running statistics.
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    #[serde(default)]
    pub name: Option<String>,
}

impl BatchNormConfig {
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            eps: default_eps(),
            momentum: default_momentum(),
            name: None,
        }
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Per-channel batch normalization of `[N, C, H, W]` inputs.
///
/// `[N, C]` and `[N, C, L]` inputs are accepted too; everything after the
/// channel axis is pooled into the statistics.
///
/// Training forwards use the batch mean and biased variance, then fold
/// them into `running_mean` and `running_var` (unbiased) with `momentum`.
/// Inference forwards use the running statistics. The running statistics
/// are buffers: checkpointed with the parameters, never trained.
#[derive(Debug)]
pub struct BatchNorm2D {
    base: LayerBase,
    config: BatchNormConfig,
    training: bool,
    /// Mode of the last forward, which backward must match.
    batch_stats: bool,
    /// `(batch, channels, plane)` of the initialised input.
    dims: (usize, usize, usize),
    /// Statistics applied by the last forward.
    mean: Vec<f32>,
    inv_std: Vec<f32>,
    var: Vec<f32>,
}

impl BatchNorm2D {
    pub const KIND: &'static str = "batch_norm2d";

    pub fn new(config: BatchNormConfig) -> Result<Self, LayerError> {
        let base = LayerBase::new(Self::KIND, config.name.clone(), true).with_contiguous_input();
        if config.num_features == 0 {
            return Err(LayerError::config(base.name(), "num_features must be positive"));
        }
        if config.eps.is_nan() || config.eps <= 0.0 {
            return Err(LayerError::config(base.name(), format!("eps {} must be positive", config.eps)));
        }
        if !(0.0..=1.0).contains(&config.momentum) {
            return Err(LayerError::config(
                base.name(),
                format!("momentum {} outside [0, 1]", config.momentum),
            ));
        }
        Ok(Self {
            base,
            config,
            training: true,
            batch_stats: false,
            dims: (0, 0, 0),
            mean: Vec::new(),
            inv_std: Vec::new(),
            var: Vec::new(),
        })
    }

    pub fn config(&self) -> &BatchNormConfig {
        &self.config
    }

    pub fn is_training(&self) -> bool {
        self.training
    }
}

/// `running = (1 − momentum) · running + momentum · factor · batch` for the
/// running mean (factor 1) and variance (`unbias`).
fn fold_running(
    params: &mut ParamMap,
    layer: &str,
    mean: &[f32],
    var: &[f32],
    momentum: f32,
    unbias: f32,
) -> Result<(), LayerError> {
    for (id, batch, factor) in [(ParamId::RunningMean, mean, 1.0), (ParamId::RunningVar, var, unbias)] {
        let slot = params
            .get_mut(id)
            .ok_or_else(|| LayerError::lifecycle(layer, format!("{id} missing")))?;
        let mut running = slot.data.data_mut()?;
        for (r, &b) in running.iter_mut().zip(batch) {
            *r = (1.0 - momentum) * *r + momentum * factor * b;
        }
    }
    Ok(())
}

impl Layer for BatchNorm2D {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        let dims = input_shape.dims();
        if !(2..=4).contains(&dims.len()) || dims[1] != self.config.num_features {
            let expected = Shape::new(vec![dims.first().copied().unwrap_or(1), self.config.num_features]);
            return Err(LayerError::shape(self.base.name(), &expected, input_shape));
        }
        Ok(input_shape.clone())
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        let dims = input_shape.dims();
        let c = self.config.num_features;
        self.dims = (dims[0], c, dims[2..].iter().product());
        if self.dims.0 * self.dims.2 == 0 {
            return Err(LayerError::config(self.base.name(), format!("empty input {input_shape}")));
        }
        self.base.register(ParamId::Gamma, Tensor::full([c], 1.0));
        self.base.register(ParamId::Beta, Tensor::zeros([c]));
        self.base.register_buffer(ParamId::RunningMean, Tensor::zeros([c]));
        self.base.register_buffer(ParamId::RunningVar, Tensor::full([c], 1.0));
        self.mean = vec![0.0; c];
        self.inv_std = vec![0.0; c];
        self.var = vec![0.0; c];
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let (n, c, plane) = self.dims;
        let eps = self.config.eps;
        let io = self.base.io();
        let name = io.name;
        {
            let x = io.input.data()?;
            if self.training {
                channel_moments(&mut self.mean, &mut self.var, &x, n, c, plane)?;
                for (s, &v) in self.inv_std.iter_mut().zip(&self.var) {
                    *s = 1.0 / (v + eps).sqrt();
                }
            } else {
                let rm = param_data(io.params, ParamId::RunningMean, name)?.data()?;
                let rv = param_data(io.params, ParamId::RunningVar, name)?.data()?;
                self.mean.copy_from_slice(&rm);
                for (s, &v) in self.inv_std.iter_mut().zip(rv.iter()) {
                    *s = 1.0 / (v + eps).sqrt();
                }
            }
            let gamma = param_data(io.params, ParamId::Gamma, name)?.data()?;
            let beta = param_data(io.params, ParamId::Beta, name)?.data()?;
            let mut y = io.output.data_mut()?;
            channel_normalize(&mut y, &x, &self.mean, &self.inv_std, &gamma, &beta, n, c, plane)?;
        }
        if self.training {
            let count = (n * plane) as f32;
            let unbias = if count > 1.0 { count / (count - 1.0) } else { 1.0 };
            fold_running(io.params, name, &self.mean, &self.var, self.config.momentum, unbias)?;
        }
        self.batch_stats = self.training;
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let (n, c, plane) = self.dims;
        let g = contiguous_or_copy(self.base.name(), grad_output);
        let io = self.base.io();

        {
            let (mut gamma, mut grad_gamma, mut grad_beta) = (None, None, None);
            for (id, p) in io.params.iter_mut() {
                match id {
                    ParamId::Gamma => {
                        gamma = Some(&p.data);
                        grad_gamma = p.grad.as_mut();
                    }
                    ParamId::Beta => grad_beta = p.grad.as_mut(),
                    _ => {}
                }
            }
            let gamma = gamma
                .ok_or_else(|| LayerError::lifecycle(io.name, "gamma missing"))?
                .data()?;
            let mut gg = grad_gamma.map(|t| t.data_mut()).transpose()?;
            let mut gb = grad_beta.map(|t| t.data_mut()).transpose()?;
            let gy = g.data()?;
            let x = io.input.data()?;
            let mut gi = io.grad_input.data_mut()?;
            channel_normalize_backward(
                &mut gi,
                gg.as_deref_mut(),
                gb.as_deref_mut(),
                &gy,
                &x,
                &self.mean,
                &self.inv_std,
                &gamma,
                n,
                c,
                plane,
                self.batch_stats,
            )?;
        }
        Ok(self.base.finish_backward())
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

// ── LayerNorm ──────────────────────────────────────────────────

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNormConfig {
    /// Length of the last input dimension.
    pub features: usize,
    #[serde(default = "default_eps")]
    pub eps: f32,
    #[serde(default)]
    pub name: Option<String>,
}

impl LayerNormConfig {
    pub fn new(features: usize) -> Self {
        Self {
            features,
            eps: default_eps(),
            name: None,
        }
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Normalization over the last dimension of any input of rank ≥ 1.
#[derive(Debug)]
pub struct LayerNorm {
    base: LayerBase,
    config: LayerNormConfig,
    rows: usize,
    /// Row statistics of the last forward.
    mean: Vec<f32>,
    inv_std: Vec<f32>,
}

impl LayerNorm {
    pub const KIND: &'static str = "layer_norm";

    pub fn new(config: LayerNormConfig) -> Result<Self, LayerError> {
        let base = LayerBase::new(Self::KIND, config.name.clone(), true).with_contiguous_input();
        if config.features == 0 {
            return Err(LayerError::config(base.name(), "features must be positive"));
        }
        if config.eps.is_nan() || config.eps <= 0.0 {
            return Err(LayerError::config(base.name(), format!("eps {} must be positive", config.eps)));
        }
        Ok(Self {
            base,
            config,
            rows: 0,
            mean: Vec::new(),
            inv_std: Vec::new(),
        })
    }

    pub fn config(&self) -> &LayerNormConfig {
        &self.config
    }
}

impl Layer for LayerNorm {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        match input_shape.dims().last() {
            Some(&f) if f == self.config.features => Ok(input_shape.clone()),
            _ => Err(LayerError::shape(
                self.base.name(),
                &Shape::vector(self.config.features),
                input_shape,
            )),
        }
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        let f = self.config.features;
        self.rows = input_shape.num_elements() / f;
        if self.rows == 0 {
            return Err(LayerError::config(self.base.name(), format!("empty input {input_shape}")));
        }
        self.base.register(ParamId::Gamma, Tensor::full([f], 1.0));
        self.base.register(ParamId::Beta, Tensor::zeros([f]));
        self.mean = vec![0.0; self.rows];
        self.inv_std = vec![0.0; self.rows];
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let (rows, len, eps) = (self.rows, self.config.features, self.config.eps);
        let io = self.base.io();
        {
            let x = io.input.data()?;
            let gamma = param_data(io.params, ParamId::Gamma, io.name)?.data()?;
            let beta = param_data(io.params, ParamId::Beta, io.name)?.data()?;
            let mut y = io.output.data_mut()?;
            let stats = Some((&mut self.mean[..], &mut self.inv_std[..]));
            layer_norm(&mut y, &x, &gamma, &beta, eps, rows, len, stats)?;
        }
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let (rows, len) = (self.rows, self.config.features);
        let g = contiguous_or_copy(self.base.name(), grad_output);
        let io = self.base.io();

        {
            let (mut gamma, mut grad_gamma, mut grad_beta) = (None, None, None);
            for (id, p) in io.params.iter_mut() {
                match id {
                    ParamId::Gamma => {
                        gamma = Some(&p.data);
                        grad_gamma = p.grad.as_mut();
                    }
                    ParamId::Beta => grad_beta = p.grad.as_mut(),
                    _ => {}
                }
            }
            let gamma = gamma
                .ok_or_else(|| LayerError::lifecycle(io.name, "gamma missing"))?
                .data()?;
            let mut gg = grad_gamma.map(|t| t.data_mut()).transpose()?;
            let mut gb = grad_beta.map(|t| t.data_mut()).transpose()?;
            let gy = g.data()?;
            let x = io.input.data()?;
            let mut gi = io.grad_input.data_mut()?;
            layer_norm_backward(
                &mut gi,
                gg.as_deref_mut(),
                gb.as_deref_mut(),
                &gy,
                &x,
                &self.mean,
                &self.inv_std,
                &gamma,
                rows,
                len,
            )?;
        }
        Ok(self.base.finish_backward())
    }
}
