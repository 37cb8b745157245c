// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Reference-counted FP32 tensors over the `kernels` crate.
//!
//! This crate provides:
//! - [`Tensor`]: shape, signed strides and an offset over shared storage.
//!   Views (slice, transpose, permute, flip, broadcast, reshape) share the
//!   buffer; `clone` makes a contiguous deep copy.
//! - [`Shape`] and [`DType`] descriptors.
//! - Destination-based math: elementwise with broadcasting, reductions,
//!   GEMM/matmul, activations, softmax and dropout masks.
//! - [`codec`]: a small binary record format for single tensors.
//!
//! # Design Goals
//! - Zero-copy views wherever the strides allow.
//! - No heap allocation in hot paths; results go into caller-owned tensors.
//! - Strided and contiguous paths agree bit for bit.
//! - Clean error types via `thiserror`.

mod access;
pub mod codec;
mod dtype;
mod error;
mod ops;
mod shape;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use kernels::activation::Activation;
pub use kernels::blas::Transpose;
pub use kernels::elementwise::{BinaryOp, CompareOp, UnaryOp};
pub use kernels::reduction::{ArgOp, ReduceOp};
pub use shape::Shape;
pub use tensor::{Tensor, TensorRead, TensorWrite};
