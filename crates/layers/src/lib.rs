// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # layers
//!
//! Neural-network layers over `tensor-core` tensors.
//!
//! This crate provides:
//! - [`Layer`]: the object-safe forward/backward contract, with
//!   [`LayerBase`] carrying the shared bookkeeping (name, lifecycle state,
//!   owned output and input-gradient buffers, parameter slots).
//! - [`Parameter`] and [`ParamMap`]: learnable tensors keyed by [`ParamId`].
//! - Concrete layers: [`Dense`], [`Conv1D`]/[`Conv2D`], max/average/global
//!   pooling, [`Flatten`], [`Reshape`], activations, [`Softmax`],
//!   [`Dropout`], [`BatchNorm2D`] and [`LayerNorm`].
//!
//! # Lifecycle
//! `init` allocates every buffer once for a fixed input shape; `forward`
//! and `backward` then write into those buffers and return borrows of
//! them. Parameter gradients are allocated on the first backward and
//! accumulate until `zero_grad`.

mod activation;
mod conv;
mod dense;
mod dropout;
mod error;
pub mod init;
mod layer;
mod norm;
mod param;
mod pool;
mod reshape;
mod softmax;

pub use activation::{ReLU, Sigmoid, Tanh};
pub use conv::{Conv, Conv1D, Conv2D, ConvConfig};
pub use dense::{Dense, DenseConfig};
pub use dropout::{Dropout, DropoutConfig};
pub use error::LayerError;
pub use layer::{unique_name, Layer, LayerBase, LayerIo, LayerState};
pub use norm::{BatchNorm2D, BatchNormConfig, LayerNorm, LayerNormConfig};
pub use param::{ParamId, ParamMap, ParamUid, Parameter};
pub use pool::{AvgPool2D, GlobalAvgPool2D, MaxPool2D, PoolConfig};
pub use reshape::{Flatten, Reshape};
pub use softmax::Softmax;
