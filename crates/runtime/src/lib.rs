// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Sequential models built from the `layers` framework, plus the pieces
//! needed to train them.
//!
//! # Type-State Pipeline
//! ```text
//! SequentialBuilder → Sequential<Built> → Sequential<Ready>
//! ```
//! Transitions are compile-time checked: only a `Ready` model can run a
//! forward or backward pass.
//!
//! # Training
//! [`train_step`] chains `zero_grad → forward → loss → backward → update`.
//! [`Sequential::fit`] repeats it over a dataset as configured by a
//! [`TrainingConfig`], recording [`TrainingMetrics`] when profiling is on.
//! [`Checkpoint`] saves and restores every parameter of a model.

mod checkpoint;
mod config;
mod error;
mod loss;
mod metrics;
mod optimizer;
mod sequential;

pub use checkpoint::{Checkpoint, CheckpointRecord};
pub use config::TrainingConfig;
pub use error::RuntimeError;
pub use loss::{train_step, Loss, PROB_FLOOR};
pub use metrics::{LayerMetrics, TrainingMetrics};
pub use optimizer::{Adam, Momentum, Optimizer, Sgd};
pub use sequential::{Built, ModelState, Ready, Sequential, SequentialBuilder};
