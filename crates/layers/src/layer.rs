// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The layer protocol and its shared bookkeeping.
//!
//! ```text
//! Uninitialised ──init──▶ Initialised ──forward──▶ Forwarded ◀──┐
//!                                                   │  ▲        │ forward
//!                                           backward│  │forward │
//!                                                   ▼  │        │
//!                                                Backwarded ────┘
//! ```
//!
//! Every buffer a layer writes is allocated in `init`, except parameter
//! gradients (first backward) and the input staging copy (first
//! non-contiguous input).

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tensor_core::{Shape, Tensor};
use tracing::{debug, warn};

use crate::{LayerError, ParamId, ParamMap, Parameter};

/// Lifecycle position of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerState {
    Uninitialised,
    Initialised,
    Forwarded,
    Backwarded,
}

impl LayerState {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerState::Uninitialised => "uninitialised",
            LayerState::Initialised => "initialised",
            LayerState::Forwarded => "forwarded",
            LayerState::Backwarded => "backwarded",
        }
    }
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"{prefix}_{n}"` with `n` drawn from a process-wide counter.
pub fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("{prefix}_{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// `tensor` itself when contiguous, otherwise a contiguous copy.
pub(crate) fn contiguous_or_copy<'a>(layer: &str, tensor: &'a Tensor) -> Cow<'a, Tensor> {
    if tensor.is_contiguous() {
        Cow::Borrowed(tensor)
    } else {
        warn!(layer = %layer, "operand not contiguous; staging through a copy");
        Cow::Owned(tensor.contiguous())
    }
}

// ── Layer trait ────────────────────────────────────────────────

/// A stateful operator with a forward and a backward pass.
///
/// Implementors keep their bookkeeping in a [`LayerBase`] and get `name`,
/// `parameters`, `set_param`, `can_learn`, `set_can_learn`, `zero_grad`
/// and `state` for free.
pub trait Layer: Send + fmt::Debug {
    fn base(&self) -> &LayerBase;

    fn base_mut(&mut self) -> &mut LayerBase;

    /// Short type name, e.g. `"dense"`.
    fn kind(&self) -> &'static str;

    /// The shape `forward` produces for `input_shape`. Pure.
    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError>;

    /// Allocates the output, gradient and parameter buffers.
    ///
    /// Calling it again with the same shape is a no-op; with another shape
    /// it is a [`LayerError::Lifecycle`].
    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError>;

    /// Runs the forward pass into the owned output buffer.
    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError>;

    /// Accumulates parameter gradients and returns the gradient with
    /// respect to the last forward input.
    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError>;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn state(&self) -> LayerState {
        self.base().state()
    }

    /// Value copies of the registered parameters.
    fn parameters(&self) -> ParamMap {
        self.base().params().clone()
    }

    fn set_param(&mut self, id: ParamId, param: Parameter) -> Result<(), LayerError> {
        self.base_mut().set_param(id, param)
    }

    fn can_learn(&self) -> bool {
        self.base().can_learn()
    }

    fn set_can_learn(&mut self, can_learn: bool) {
        self.base_mut().set_can_learn(can_learn);
    }

    fn zero_grad(&mut self) -> Result<(), LayerError> {
        self.base_mut().zero_grad()
    }

    /// Switches between training and inference behaviour.
    fn set_training(&mut self, _training: bool) {}

    /// The owned output buffer.
    fn output(&self) -> &Tensor {
        self.base().output()
    }
}

// ── Shared bookkeeping ─────────────────────────────────────────

/// Split borrows of a layer's buffers for one pass.
pub struct LayerIo<'a> {
    pub name: &'a str,
    /// The stored forward input, or its contiguous staging copy.
    pub input: &'a Tensor,
    pub output: &'a mut Tensor,
    pub grad_input: &'a mut Tensor,
    pub params: &'a mut ParamMap,
}

/// Name, lifecycle state, stored input, owned output and input gradient,
/// and the parameter registry of one layer.
#[derive(Debug)]
pub struct LayerBase {
    name: String,
    can_learn: bool,
    contiguous_input: bool,
    state: LayerState,
    input_shape: Option<Shape>,
    input: Tensor,
    staging: Option<Tensor>,
    output: Tensor,
    grad_input: Tensor,
    params: ParamMap,
    /// Slots holding state that is saved but never trained.
    buffers: [bool; ParamId::COUNT],
}

impl LayerBase {
    /// A base named `name`, or `"{prefix}_{n}"` when `name` is `None`.
    pub fn new(prefix: &str, name: Option<String>, can_learn: bool) -> Self {
        Self {
            name: name.unwrap_or_else(|| unique_name(prefix)),
            can_learn,
            contiguous_input: false,
            state: LayerState::Uninitialised,
            input_shape: None,
            input: Tensor::zeros(Shape::scalar()),
            staging: None,
            output: Tensor::zeros(Shape::scalar()),
            grad_input: Tensor::zeros(Shape::scalar()),
            params: ParamMap::new(),
            buffers: [false; ParamId::COUNT],
        }
    }

    /// Stages non-contiguous inputs through a contiguous copy before the
    /// layer sees them.
    pub fn with_contiguous_input(mut self) -> Self {
        self.contiguous_input = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn can_learn(&self) -> bool {
        self.can_learn
    }

    /// Turning learning off releases the gradient buffers. Buffer slots
    /// never learn.
    pub fn set_can_learn(&mut self, can_learn: bool) {
        self.can_learn = can_learn;
        for (id, p) in self.params.iter_mut() {
            if self.buffers[id.as_index()] {
                continue;
            }
            p.requires_grad = can_learn;
            if !can_learn {
                p.grad = None;
            }
        }
    }

    /// The shape passed to `init`, once initialised.
    pub fn input_shape(&self) -> Option<&Shape> {
        self.input_shape.as_ref()
    }

    pub fn output(&self) -> &Tensor {
        &self.output
    }

    pub fn grad_input(&self) -> &Tensor {
        &self.grad_input
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamMap {
        &mut self.params
    }

    pub fn io(&mut self) -> LayerIo<'_> {
        let input = match &self.staging {
            Some(staged) if self.contiguous_input && !self.input.is_contiguous() => staged,
            _ => &self.input,
        };
        LayerIo {
            name: &self.name,
            input,
            output: &mut self.output,
            grad_input: &mut self.grad_input,
            params: &mut self.params,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// `Ok(true)` when `init` has work to do, `Ok(false)` when the layer is
    /// already initialised with `input_shape`.
    pub fn needs_init(&self, input_shape: &Shape) -> Result<bool, LayerError> {
        match &self.input_shape {
            None => Ok(true),
            Some(s) if s == input_shape => Ok(false),
            Some(s) => Err(LayerError::lifecycle(
                &self.name,
                format!("already initialised with {s}, re-init with {input_shape}"),
            )),
        }
    }

    /// Allocates the output and input-gradient buffers and enters
    /// `Initialised`.
    pub fn allocate(&mut self, input_shape: &Shape, output_shape: Shape) {
        debug!(
            layer = %self.name,
            input = %input_shape,
            output = %output_shape,
            params = self.params.num_elements(),
            "layer initialised"
        );
        self.output = Tensor::zeros(output_shape);
        self.grad_input = Tensor::zeros(input_shape.clone());
        // Placeholder until the first forward; rebinding reuses its
        // metadata buffers.
        self.input = self.grad_input.view();
        self.input_shape = Some(input_shape.clone());
        self.state = LayerState::Initialised;
    }

    /// Registers a trainable parameter.
    pub fn register(&mut self, id: ParamId, data: Tensor) {
        debug!(layer = %self.name, param = %id, shape = %data.shape(), "parameter allocated");
        let mut param = Parameter::new(data);
        param.requires_grad = self.can_learn;
        self.params.insert(id, param);
    }

    /// Registers non-trainable state such as running statistics. It is
    /// listed and checkpointed with the parameters but gets no gradient.
    pub fn register_buffer(&mut self, id: ParamId, data: Tensor) {
        debug!(layer = %self.name, param = %id, shape = %data.shape(), "buffer allocated");
        let mut param = Parameter::new(data);
        param.requires_grad = false;
        self.params.insert(id, param);
        self.buffers[id.as_index()] = true;
    }

    pub fn is_buffer(&self, id: ParamId) -> bool {
        self.buffers[id.as_index()]
    }

    /// Validates and stores `input` for this forward pass.
    pub fn begin_forward(&mut self, input: &Tensor) -> Result<(), LayerError> {
        let Some(expected) = &self.input_shape else {
            return Err(LayerError::lifecycle(&self.name, "forward before init"));
        };
        if input.shape() != expected {
            return Err(LayerError::lifecycle(
                &self.name,
                format!("initialised for {expected}, forward got {}", input.shape()),
            ));
        }
        if input.shares_storage(&self.output) || input.shares_storage(&self.grad_input) {
            return Err(LayerError::Unsupported {
                layer: self.name.clone(),
                op: "forward over its own output or gradient buffer".to_string(),
            });
        }
        self.input.rebind(input);
        if self.contiguous_input && !input.is_contiguous() {
            warn!(layer = %self.name, "input not contiguous; staging through a copy");
            let staged = self
                .staging
                .get_or_insert_with(|| Tensor::zeros(input.shape().clone()));
            staged.copy_from(input)?;
        }
        Ok(())
    }

    pub fn finish_forward(&mut self) -> &Tensor {
        self.state = LayerState::Forwarded;
        &self.output
    }

    /// Validates `grad_output` and allocates parameter gradients on first
    /// use.
    pub fn begin_backward(&mut self, grad_output: &Tensor) -> Result<(), LayerError> {
        if !matches!(self.state, LayerState::Forwarded | LayerState::Backwarded) {
            return Err(LayerError::lifecycle(
                &self.name,
                format!("backward in state {}", self.state),
            ));
        }
        if grad_output.shape() != self.output.shape() {
            return Err(LayerError::shape(&self.name, self.output.shape(), grad_output.shape()));
        }
        if self.can_learn {
            for (id, p) in self.params.iter_mut() {
                if p.requires_grad && p.ensure_grad() {
                    debug!(layer = %self.name, param = %id, "gradient allocated");
                }
            }
        }
        Ok(())
    }

    pub fn finish_backward(&mut self) -> &Tensor {
        self.state = LayerState::Backwarded;
        &self.grad_input
    }

    // ── Parameters ─────────────────────────────────────────────

    /// Replaces a registered parameter.
    pub fn set_param(&mut self, id: ParamId, mut param: Parameter) -> Result<(), LayerError> {
        let Some(current) = self.params.get(id) else {
            return Err(LayerError::UnknownParameter {
                layer: self.name.clone(),
                id,
            });
        };
        if param.shape() != current.shape() {
            return Err(LayerError::shape(&self.name, current.shape(), param.shape()));
        }
        if let Some(g) = &param.grad {
            if g.shape() != current.shape() {
                return Err(LayerError::shape(&self.name, current.shape(), g.shape()));
            }
        }
        if !param.data.is_contiguous() {
            param.data = param.data.contiguous();
        }
        if self.buffers[id.as_index()] {
            param.requires_grad = false;
            param.grad = None;
        }
        self.params.insert(id, param);
        Ok(())
    }

    pub fn zero_grad(&mut self) -> Result<(), LayerError> {
        for (_, p) in self.params.iter_mut() {
            p.zero_grad()?;
        }
        Ok(())
    }
}
