// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Parameter optimizers.
//!
//! An optimizer sees one [`Parameter`] at a time and rewrites its `data`
//! from its `grad`. Stateful optimizers key their per-parameter state on
//! [`ParamUid`], which survives the value copies the model stages during
//! an update.

use std::collections::HashMap;

use layers::{ParamUid, Parameter};
use tensor_core::{Tensor, TensorError};
use tracing::debug;

use crate::RuntimeError;

/// Updates a parameter in place from its gradient.
pub trait Optimizer: Send + std::fmt::Debug {
    /// Short identifier, e.g. `"sgd"`.
    fn name(&self) -> &'static str;

    /// Applies one step to `param`.
    ///
    /// Parameters without a gradient, or with `requires_grad` unset, are
    /// left untouched.
    fn update(&mut self, param: &mut Parameter) -> Result<(), RuntimeError>;
}

fn optimizer_error(op: &str, err: TensorError) -> RuntimeError {
    RuntimeError::Optimizer {
        detail: format!("{op}: {err}"),
    }
}

/// Splits `param` into its data and gradient when it takes part in the
/// step.
fn step_operands<'a>(
    op: &str,
    param: &'a mut Parameter,
) -> Result<Option<(&'a mut Tensor, &'a Tensor)>, RuntimeError> {
    let Parameter {
        data,
        grad,
        requires_grad,
        ..
    } = param;
    let Some(grad) = grad.as_ref().filter(|_| *requires_grad) else {
        return Ok(None);
    };
    if grad.shape() != data.shape() {
        return Err(RuntimeError::Optimizer {
            detail: format!(
                "{op}: gradient {} does not match parameter {}",
                grad.shape(),
                data.shape()
            ),
        });
    }
    Ok(Some((data, grad)))
}

fn check_rate(op: &str, learning_rate: f32) -> Result<(), RuntimeError> {
    if learning_rate > 0.0 && learning_rate.is_finite() {
        Ok(())
    } else {
        Err(RuntimeError::Config(format!(
            "{op}: learning rate must be positive, got {learning_rate}"
        )))
    }
}

// ── SGD ────────────────────────────────────────────────────────

/// `w -= lr · (g + wd · w)`.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
    weight_decay: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Result<Self, RuntimeError> {
        check_rate("sgd", learning_rate)?;
        Ok(Self {
            learning_rate,
            weight_decay: 0.0,
        })
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn update(&mut self, param: &mut Parameter) -> Result<(), RuntimeError> {
        let Some((data, grad)) = step_operands("sgd", param)? else {
            return Ok(());
        };
        if self.weight_decay != 0.0 {
            data.scale_(1.0 - self.learning_rate * self.weight_decay)
                .map_err(|e| optimizer_error("sgd", e))?;
        }
        data.axpy_(-self.learning_rate, grad)
            .map_err(|e| optimizer_error("sgd", e))?;
        Ok(())
    }
}

// ── Momentum ───────────────────────────────────────────────────

/// `v = μ·v + g; w -= lr·v`.
#[derive(Debug)]
pub struct Momentum {
    learning_rate: f32,
    momentum: f32,
    velocity: HashMap<ParamUid, Tensor>,
}

impl Momentum {
    pub fn new(learning_rate: f32, momentum: f32) -> Result<Self, RuntimeError> {
        check_rate("momentum", learning_rate)?;
        if !(0.0..1.0).contains(&momentum) {
            return Err(RuntimeError::Config(format!(
                "momentum: coefficient must lie in [0, 1), got {momentum}"
            )));
        }
        Ok(Self {
            learning_rate,
            momentum,
            velocity: HashMap::new(),
        })
    }

    /// Number of parameters with velocity state.
    pub fn tracked(&self) -> usize {
        self.velocity.len()
    }
}

impl Optimizer for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn update(&mut self, param: &mut Parameter) -> Result<(), RuntimeError> {
        let uid = param.uid();
        let Some((data, grad)) = step_operands("momentum", param)? else {
            return Ok(());
        };
        let v = self.velocity.entry(uid).or_insert_with(|| {
            debug!(param = uid.get(), shape = %grad.shape(), "momentum velocity allocated");
            Tensor::zeros(grad.shape().clone())
        });
        v.scale_(self.momentum)
            .and_then(|v| v.add_(grad))
            .map_err(|e| optimizer_error("momentum", e))?;
        data.axpy_(-self.learning_rate, v)
            .map_err(|e| optimizer_error("momentum", e))?;
        Ok(())
    }
}

// ── Adam ───────────────────────────────────────────────────────

#[derive(Debug)]
struct AdamState {
    m: Vec<f32>,
    v: Vec<f32>,
    step: i32,
}

/// Adam with bias-corrected moments.
///
/// ```text
/// m = β1·m + (1 − β1)·g
/// v = β2·v + (1 − β2)·g²
/// w -= lr · m̂ / (√v̂ + ε),  m̂ = m / (1 − β1ᵗ), v̂ = v / (1 − β2ᵗ)
/// ```
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    state: HashMap<ParamUid, AdamState>,
}

impl Adam {
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Result<Self, RuntimeError> {
        check_rate("adam", learning_rate)?;
        for (label, beta) in [("beta1", beta1), ("beta2", beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(RuntimeError::Config(format!(
                    "adam: {label} must lie in [0, 1), got {beta}"
                )));
            }
        }
        if epsilon <= 0.0 {
            return Err(RuntimeError::Config(format!(
                "adam: epsilon must be positive, got {epsilon}"
            )));
        }
        Ok(Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            state: HashMap::new(),
        })
    }

    /// Steps taken for the parameter with `uid`.
    pub fn steps(&self, uid: ParamUid) -> Option<i32> {
        self.state.get(&uid).map(|s| s.step)
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            state: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn update(&mut self, param: &mut Parameter) -> Result<(), RuntimeError> {
        let uid = param.uid();
        let Some((data, grad)) = step_operands("adam", param)? else {
            return Ok(());
        };
        let n = grad.shape().num_elements();
        let st = self.state.entry(uid).or_insert_with(|| {
            debug!(param = uid.get(), elements = n, "adam moments allocated");
            AdamState {
                m: vec![0.0; n],
                v: vec![0.0; n],
                step: 0,
            }
        });
        st.step += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        let c1 = 1.0 - b1.powi(st.step);
        let c2 = 1.0 - b2.powi(st.step);

        let g = grad.data().map_err(|e| optimizer_error("adam", e))?;
        let mut w = data.data_mut().map_err(|e| optimizer_error("adam", e))?;
        for (((w, &g), m), v) in w.iter_mut().zip(g.iter()).zip(&mut st.m).zip(&mut st.v) {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            let m_hat = *m / c1;
            let v_hat = *v / c2;
            *w -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
        Ok(())
    }
}
