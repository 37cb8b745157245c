// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pointwise activation layers.

use tensor_core::{Activation, Shape, Tensor};

use crate::{Layer, LayerBase, LayerError};

fn activation_forward<'a>(
    base: &'a mut LayerBase,
    f: Activation,
    input: &Tensor,
) -> Result<&'a Tensor, LayerError> {
    base.begin_forward(input)?;
    let io = base.io();
    io.output.activate(f, io.input)?;
    Ok(base.finish_forward())
}

/// ReLU's derivative reads the forward input; Sigmoid's and Tanh's read
/// the forward output.
fn activation_backward<'a>(
    base: &'a mut LayerBase,
    f: Activation,
    grad_output: &Tensor,
) -> Result<&'a Tensor, LayerError> {
    base.begin_backward(grad_output)?;
    let io = base.io();
    let saved: &Tensor = if f.saves_output() { &*io.output } else { io.input };
    io.grad_input.activate_grad(f, grad_output, saved)?;
    Ok(base.finish_backward())
}

macro_rules! activation_layer {
    ($(#[$doc:meta])* $name:ident, $f:expr, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            base: LayerBase,
        }

        impl $name {
            pub fn new() -> Self {
                Self { base: LayerBase::new($kind, None, false) }
            }

            pub fn with_name(name: impl Into<String>) -> Self {
                Self { base: LayerBase::new($kind, Some(name.into()), false) }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Layer for $name {
            fn base(&self) -> &LayerBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut LayerBase {
                &mut self.base
            }

            fn kind(&self) -> &'static str {
                $kind
            }

            fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
                Ok(input_shape.clone())
            }

            fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
                if self.base.needs_init(input_shape)? {
                    self.base.allocate(input_shape, input_shape.clone());
                }
                Ok(())
            }

            fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
                activation_forward(&mut self.base, $f, input)
            }

            fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
                activation_backward(&mut self.base, $f, grad_output)
            }
        }
    };
}

activation_layer!(
    /// `max(0, x)`; the gradient at 0 is 0.
    ReLU,
    Activation::Relu,
    "relu"
);
activation_layer!(
    /// `1 / (1 + e^-x)`.
    Sigmoid,
    Activation::Sigmoid,
    "sigmoid"
);
activation_layer!(Tanh, Activation::Tanh, "tanh");
