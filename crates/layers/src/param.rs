// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Trainable parameters and the per-layer parameter registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tensor_core::{Shape, Tensor, TensorError};

/// Names a parameter slot within one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamId {
    Weights,
    Biases,
    Kernels,
    Mask,
    RunningMean,
    RunningVar,
    Gamma,
    Beta,
}

impl ParamId {
    pub const COUNT: usize = 8;

    pub const ALL: [ParamId; Self::COUNT] = [
        ParamId::Weights,
        ParamId::Biases,
        ParamId::Kernels,
        ParamId::Mask,
        ParamId::RunningMean,
        ParamId::RunningVar,
        ParamId::Gamma,
        ParamId::Beta,
    ];

    /// Dense slot index in `0..COUNT`.
    pub fn as_index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamId::Weights => "weights",
            ParamId::Biases => "biases",
            ParamId::Kernels => "kernels",
            ParamId::Mask => "mask",
            ParamId::RunningMean => "running_mean",
            ParamId::RunningVar => "running_var",
            ParamId::Gamma => "gamma",
            ParamId::Beta => "beta",
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-unique identity of a parameter. Value copies keep it, so
/// optimizer state can follow a parameter through `parameters()` and
/// `set_param` round trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamUid(u64);

impl ParamUid {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ParamUid(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// A tensor plus an optional gradient of the same shape.
///
/// `Clone` deep-copies both tensors and keeps the [`ParamUid`].
#[derive(Debug, Clone)]
pub struct Parameter {
    pub data: Tensor,
    pub grad: Option<Tensor>,
    pub requires_grad: bool,
    uid: ParamUid,
}

impl Parameter {
    /// A trainable parameter with no gradient allocated yet.
    pub fn new(data: Tensor) -> Self {
        Self {
            data,
            grad: None,
            requires_grad: true,
            uid: ParamUid::next(),
        }
    }

    pub fn uid(&self) -> ParamUid {
        self.uid
    }

    pub fn shape(&self) -> &Shape {
        self.data.shape()
    }

    /// Allocates a zeroed gradient if there is none. Returns whether an
    /// allocation happened.
    pub fn ensure_grad(&mut self) -> bool {
        if self.grad.is_some() {
            return false;
        }
        self.grad = Some(Tensor::zeros(self.data.shape().clone()));
        true
    }

    /// Zeroes the gradient in place, if allocated.
    pub fn zero_grad(&mut self) -> Result<(), TensorError> {
        if let Some(g) = self.grad.as_mut() {
            g.fill(0.0)?;
        }
        Ok(())
    }
}

/// Fixed-size parameter registry indexed by [`ParamId`].
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    slots: [Option<Parameter>; ParamId::COUNT],
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ParamId) -> Option<&Parameter> {
        self.slots[id.as_index()].as_ref()
    }

    pub fn get_mut(&mut self, id: ParamId) -> Option<&mut Parameter> {
        self.slots[id.as_index()].as_mut()
    }

    /// Stores `param` under `id`, returning the previous occupant.
    pub fn insert(&mut self, id: ParamId, param: Parameter) -> Option<Parameter> {
        self.slots[id.as_index()].replace(param)
    }

    pub fn remove(&mut self, id: ParamId) -> Option<Parameter> {
        self.slots[id.as_index()].take()
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.slots[id.as_index()].is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupied slots in `ParamId` order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Parameter)> {
        ParamId::ALL
            .into_iter()
            .zip(&self.slots)
            .filter_map(|(id, slot)| slot.as_ref().map(|p| (id, p)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ParamId, &mut Parameter)> {
        ParamId::ALL
            .into_iter()
            .zip(&mut self.slots)
            .filter_map(|(id, slot)| slot.as_mut().map(|p| (id, p)))
    }

    pub fn into_entries(self) -> impl Iterator<Item = (ParamId, Parameter)> {
        ParamId::ALL
            .into_iter()
            .zip(self.slots)
            .filter_map(|(id, slot)| slot.map(|p| (id, p)))
    }

    /// Total number of parameter elements.
    pub fn num_elements(&self) -> usize {
        self.iter().map(|(_, p)| p.data.size()).sum()
    }
}
