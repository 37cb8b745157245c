// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Lock discipline for operations touching several tensors at once.
//!
//! Operands are read-locked first, then the destination is write-locked.
//! An operand whose storage is also the destination's is copied before the
//! write lock is taken, and operands repeating an earlier storage reuse its
//! guard, so no lock is ever requested twice by the same thread.

use std::sync::RwLockReadGuard;

use crate::Tensor;

pub(crate) enum Source<'a> {
    Locked(RwLockReadGuard<'a, Vec<f32>>),
    Snapshot(Vec<f32>),
    /// Same storage as the operand at this index.
    SameAs(usize),
}

pub(crate) fn read_sources<'a, const N: usize>(
    op: &'static str,
    dst: Option<&Tensor>,
    srcs: [&'a Tensor; N],
) -> [Source<'a>; N] {
    let mut out: [Option<Source<'a>>; N] = std::array::from_fn(|_| None);
    for i in 0..N {
        let src = srcs[i];
        let source = if let Some(j) = (0..i).find(|&j| srcs[j].shares_storage(src)) {
            Source::SameAs(j)
        } else if dst.is_some_and(|d| d.shares_storage(src)) {
            tracing::warn!(op, operand = i, "operand aliases the destination; reading from a snapshot");
            Source::Snapshot(src.read_storage().clone())
        } else {
            Source::Locked(src.read_storage())
        };
        out[i] = Some(source);
    }
    out.map(|s| s.unwrap_or(Source::Snapshot(Vec::new())))
}

pub(crate) fn resolve<'s>(sources: &'s [Source<'_>], i: usize) -> &'s [f32] {
    match &sources[i] {
        Source::Locked(guard) => &guard[..],
        Source::Snapshot(data) => &data[..],
        Source::SameAs(j) => resolve(sources, *j),
    }
}

/// Runs `f` with the destination's storage and every operand's storage.
pub(crate) fn with_write<const N: usize, R>(
    op: &'static str,
    dst: &Tensor,
    srcs: [&Tensor; N],
    f: impl FnOnce(&mut [f32], [&[f32]; N]) -> R,
) -> R {
    let sources = read_sources(op, Some(dst), srcs);
    let views: [&[f32]; N] = std::array::from_fn(|i| resolve(&sources, i));
    let mut out = dst.write_storage();
    f(&mut out, views)
}

/// Runs `f` with every operand's storage.
pub(crate) fn with_read<const N: usize, R>(
    srcs: [&Tensor; N],
    f: impl FnOnce([&[f32]; N]) -> R,
) -> R {
    let sources = read_sources("read", None, srcs);
    let views: [&[f32]; N] = std::array::from_fn(|i| resolve(&sources, i));
    f(views)
}
