// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor operations.
//!
//! Every operation is a method on [`Tensor`](crate::Tensor). Out-of-place
//! forms write into `self` as a pre-allocated destination and return it
//! for chaining; the trailing-underscore forms update `self` in place.
//! Nothing here allocates unless a slow path is documented and logged.

mod activation;
mod dropout;
mod elementwise;
mod linalg;
mod norm;
mod reduce;
