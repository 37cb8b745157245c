// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Inverted dropout.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tensor_core::{Shape, Tensor};

use crate::init::layer_rng;
use crate::{Layer, LayerBase, LayerError};

fn default_rate() -> f32 {
    0.5
}

/// Configuration for [`Dropout`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    /// Drop probability in `[0, 1)`.
    #[serde(default = "default_rate")]
    pub rate: f32,
    /// Seed for the mask generator; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            seed: None,
            name: None,
        }
    }
}

impl DropoutConfig {
    pub fn new(rate: f32) -> Self {
        Self {
            rate,
            ..Default::default()
        }
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

/// Zeroes each element with probability `rate` during training and scales
/// the survivors by `1 / (1 - rate)`; identity at inference.
///
/// The layer owns its generator, so a seeded config replays the same masks.
#[derive(Debug)]
pub struct Dropout {
    base: LayerBase,
    rate: f32,
    training: bool,
    /// Mode of the last forward, which backward must match.
    masked: bool,
    rng: StdRng,
    mask: Option<Tensor>,
}

impl Dropout {
    pub fn new(config: DropoutConfig) -> Result<Self, LayerError> {
        let base = LayerBase::new("dropout", config.name, false);
        if !(0.0..1.0).contains(&config.rate) {
            return Err(LayerError::config(
                base.name(),
                format!("rate {} outside [0, 1)", config.rate),
            ));
        }
        Ok(Self {
            base,
            rate: config.rate,
            training: true,
            masked: false,
            rng: layer_rng(config.seed),
            mask: None,
        })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// The mask of the last training forward.
    pub fn mask(&self) -> Option<&Tensor> {
        self.mask.as_ref()
    }
}

impl Layer for Dropout {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "dropout"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        Ok(input_shape.clone())
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        self.mask = Some(Tensor::zeros(input_shape.clone()));
        self.base.allocate(input_shape, input_shape.clone());
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let io = self.base.io();
        match self.mask.as_mut() {
            Some(mask) if self.training => {
                mask.dropout_mask(self.rate, 1.0 / (1.0 - self.rate), &mut self.rng)?;
                io.output.dropout_forward(io.input, mask)?;
            }
            _ => {
                io.output.copy_from(io.input)?;
            }
        }
        self.masked = self.training;
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let io = self.base.io();
        match self.mask.as_ref() {
            Some(mask) if self.masked => {
                io.grad_input.mul(grad_output, mask)?;
            }
            _ => {
                io.grad_input.copy_from(grad_output)?;
            }
        }
        Ok(self.base.finish_backward())
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
