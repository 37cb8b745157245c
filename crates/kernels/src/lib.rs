// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # kernels
//!
//! Pure FP32 compute kernels over raw slices.
//!
//! Everything in this crate borrows its operands and owns nothing: there
//! are no tensor objects and no heap allocation. Shapes, leading dimensions
//! and strides are passed explicitly and validated against the slice
//! lengths before any element is touched.
//!
//! - [`blas`]: BLAS Level 1–3 plus batched/strided GEMM and GEMV.
//! - [`elementwise`]: unary, binary, comparison and `where` ops with a
//!   contiguous fast path and a stride-walking path that honours broadcasting.
//! - [`reduction`]: sum/mean/max/min over axis lists, argmax/argmin.
//! - [`activation`]: ReLU/Sigmoid/Tanh/Softmax and their gradients.
//! - [`conv`]: im2col/col2im and 1D/2D/3D convolution (dilated, grouped,
//!   depthwise, transposed) with backward kernels.
//! - [`pool`]: max/avg/global/adaptive pooling with backward kernels.
//! - [`norm`]: per-channel batch and per-row layer normalization.
//!
//! # Determinism
//! Every reduction accumulates in increasing linear order over the reduced
//! index space, so the strided and contiguous paths agree bit for bit. With
//! the `parallel` feature, work is split only across independent outputs,
//! which keeps results identical to the single-threaded build.

#![allow(clippy::too_many_arguments)]

pub mod activation;
pub mod blas;
pub mod conv;
pub mod elementwise;
mod error;
pub mod norm;
mod parallel;
pub mod pool;
pub mod reduction;
mod strided;
mod window;

pub use error::KernelError;
pub use strided::{contiguous_strides, StridedMut, StridedRef, MAX_RANK};
pub use window::Window;
