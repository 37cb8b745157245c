// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pooling over `D` spatial axes.
//!
//! Operands are contiguous `[batch, channels, *spatial]`. Padded taps never
//! contribute: max pooling skips them and average pooling divides by the
//! number of taps that landed inside the input, both forward and backward.
//! Max-pool indices are absolute positions in the input buffer, so one
//! scatter ([`max_pool_backward`]) serves windowed, global and adaptive
//! max pooling.

use crate::error::check_len;
use crate::window::{advance, tap_source, unravel};
use crate::{KernelError, Window};

/// Index recorded for a window that saw no valid input.
pub const NO_INDEX: usize = usize::MAX;

/// Problem description for windowed pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry<const D: usize> {
    pub batch: usize,
    pub channels: usize,
    pub input: [usize; D],
    pub window: Window<D>,
}

pub type Pool1dGeometry = PoolGeometry<1>;
pub type Pool2dGeometry = PoolGeometry<2>;
pub type Pool3dGeometry = PoolGeometry<3>;

impl<const D: usize> PoolGeometry<D> {
    pub fn new(batch: usize, channels: usize, input: [usize; D], window: Window<D>) -> Self {
        Self {
            batch,
            channels,
            input,
            window,
        }
    }

    /// Output spatial extent; padding may not exceed half the kernel.
    pub fn output(&self) -> Result<[usize; D], KernelError> {
        for axis in 0..D {
            if self.window.padding[axis] > self.window.kernel[axis] / 2 {
                return Err(KernelError::UnsupportedCombination {
                    op: "pool",
                    detail: format!(
                        "axis {axis}: padding {} exceeds half of kernel {}",
                        self.window.padding[axis], self.window.kernel[axis]
                    ),
                });
            }
        }
        self.window.output_extent("pool", self.input)
    }

    pub fn planes(&self) -> usize {
        self.batch * self.channels
    }

    pub fn input_len(&self) -> usize {
        self.planes() * self.input.iter().product::<usize>()
    }

    pub fn output_len(&self) -> Result<usize, KernelError> {
        Ok(self.planes() * self.output()?.iter().product::<usize>())
    }
}

/// Absolute input indices covered by one window, in scan order, padding
/// skipped.
#[derive(Clone)]
struct Taps<'a, const D: usize> {
    window: &'a Window<D>,
    extent: &'a [usize; D],
    pos: [usize; D],
    base: usize,
    next: usize,
    len: usize,
}

impl<const D: usize> Iterator for Taps<'_, D> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next < self.len {
            let k = unravel(self.next, &self.window.kernel);
            self.next += 1;
            if let Some(i) = tap_source(&self.pos, &k, self.window, self.extent) {
                return Some(self.base + i);
            }
        }
        None
    }
}

/// Calls `f(output_index, taps)` for every output element.
fn for_each_window<const D: usize>(
    geom: &PoolGeometry<D>,
    out: [usize; D],
    mut f: impl FnMut(usize, Taps<'_, D>),
) {
    let in_plane: usize = geom.input.iter().product();
    let out_plane: usize = out.iter().product();
    let len = geom.window.window_len();
    for p in 0..geom.planes() {
        let mut pos = [0usize; D];
        for o in 0..out_plane {
            f(
                p * out_plane + o,
                Taps {
                    window: &geom.window,
                    extent: &geom.input,
                    pos,
                    base: p * in_plane,
                    next: 0,
                    len,
                },
            );
            advance(&mut pos, &out);
        }
    }
}

/// Maximum over `taps`; the first maximum wins and NaN propagates.
#[inline]
fn argmax_of(input: &[f32], taps: impl Iterator<Item = usize>) -> (f32, usize) {
    let mut best = f32::NEG_INFINITY;
    let mut best_i = NO_INDEX;
    for i in taps {
        let v = input[i];
        if best_i == NO_INDEX || v > best || (v.is_nan() && !best.is_nan()) {
            best = v;
            best_i = i;
        }
    }
    (best, best_i)
}

// ── Windowed pooling ───────────────────────────────────────────

/// Max pooling. When `indices` is given it receives, per output element,
/// the absolute input index of the selected maximum.
pub fn max_pool<const D: usize>(
    geom: &PoolGeometry<D>,
    output: &mut [f32],
    input: &[f32],
    mut indices: Option<&mut [usize]>,
) -> Result<(), KernelError> {
    const OP: &str = "max_pool";
    let out_len = geom.output_len()?;
    let out = geom.output()?;
    check_len(OP, "input", input.len(), geom.input_len())?;
    check_len(OP, "output", output.len(), out_len)?;
    if let Some(idx) = indices.as_deref() {
        check_len(OP, "indices", idx.len(), out_len)?;
    }
    for_each_window(geom, out, |o, taps| {
        let (v, i) = argmax_of(input, taps);
        output[o] = v;
        if let Some(idx) = indices.as_deref_mut() {
            idx[o] = i;
        }
    });
    Ok(())
}

/// Routes each output gradient to its recorded maximum, overwriting
/// `input_grad`. Serves every max pooling that produced `indices`.
pub fn max_pool_backward(
    input_grad: &mut [f32],
    output_grad: &[f32],
    indices: &[usize],
) -> Result<(), KernelError> {
    const OP: &str = "max_pool_backward";
    check_len(OP, "indices", indices.len(), output_grad.len())?;
    if let Some(&bad) = indices
        .iter()
        .find(|&&i| i != NO_INDEX && i >= input_grad.len())
    {
        return Err(KernelError::ShapeMismatch {
            op: OP,
            detail: format!("index {bad} outside input gradient of {}", input_grad.len()),
        });
    }
    input_grad.fill(0.0);
    for (&g, &i) in output_grad.iter().zip(indices) {
        if i != NO_INDEX {
            input_grad[i] += g;
        }
    }
    Ok(())
}

/// Average pooling over the valid taps of each window.
pub fn avg_pool<const D: usize>(
    geom: &PoolGeometry<D>,
    output: &mut [f32],
    input: &[f32],
) -> Result<(), KernelError> {
    const OP: &str = "avg_pool";
    let out_len = geom.output_len()?;
    let out = geom.output()?;
    check_len(OP, "input", input.len(), geom.input_len())?;
    check_len(OP, "output", output.len(), out_len)?;
    for_each_window(geom, out, |o, taps| {
        let (mut sum, mut count) = (0.0f32, 0usize);
        for i in taps {
            sum += input[i];
            count += 1;
        }
        output[o] = if count == 0 { 0.0 } else { sum / count as f32 };
    });
    Ok(())
}

/// Spreads each output gradient evenly over the valid taps of its window,
/// overwriting `input_grad`.
pub fn avg_pool_backward<const D: usize>(
    geom: &PoolGeometry<D>,
    input_grad: &mut [f32],
    output_grad: &[f32],
) -> Result<(), KernelError> {
    const OP: &str = "avg_pool_backward";
    let out_len = geom.output_len()?;
    let out = geom.output()?;
    check_len(OP, "input_grad", input_grad.len(), geom.input_len())?;
    check_len(OP, "output_grad", output_grad.len(), out_len)?;
    input_grad[..geom.input_len()].fill(0.0);
    for_each_window(geom, out, |o, taps| {
        let count = taps.clone().count();
        if count == 0 {
            return;
        }
        let share = output_grad[o] / count as f32;
        for i in taps {
            input_grad[i] += share;
        }
    });
    Ok(())
}

// ── Global pooling ─────────────────────────────────────────────
//
// Global pools see each `[plane]`-sized channel as a whole, so they take
// the flattened spatial size instead of a geometry.

/// Mean of every channel plane: `[B, C, *spatial] -> [B, C]`.
pub fn global_avg_pool(
    output: &mut [f32],
    input: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
) -> Result<(), KernelError> {
    const OP: &str = "global_avg_pool";
    check_plane(OP, plane)?;
    check_len(OP, "input", input.len(), batch * channels * plane)?;
    check_len(OP, "output", output.len(), batch * channels)?;
    for (o, chunk) in output.iter_mut().zip(input.chunks_exact(plane)).take(batch * channels) {
        *o = chunk.iter().sum::<f32>() / plane as f32;
    }
    Ok(())
}

/// Spreads each channel's gradient evenly over its plane; overwrites
/// `input_grad`.
pub fn global_avg_pool_backward(
    input_grad: &mut [f32],
    output_grad: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
) -> Result<(), KernelError> {
    const OP: &str = "global_avg_pool_backward";
    check_plane(OP, plane)?;
    check_len(OP, "input_grad", input_grad.len(), batch * channels * plane)?;
    check_len(OP, "output_grad", output_grad.len(), batch * channels)?;
    let scale = 1.0 / plane as f32;
    for (&g, chunk) in output_grad
        .iter()
        .zip(input_grad.chunks_exact_mut(plane))
        .take(batch * channels)
    {
        chunk.fill(g * scale);
    }
    Ok(())
}

/// Maximum of every channel plane, optionally recording absolute indices.
pub fn global_max_pool(
    output: &mut [f32],
    input: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
    mut indices: Option<&mut [usize]>,
) -> Result<(), KernelError> {
    const OP: &str = "global_max_pool";
    check_plane(OP, plane)?;
    check_len(OP, "input", input.len(), batch * channels * plane)?;
    check_len(OP, "output", output.len(), batch * channels)?;
    if let Some(idx) = indices.as_deref() {
        check_len(OP, "indices", idx.len(), batch * channels)?;
    }
    for (o, out) in output.iter_mut().enumerate().take(batch * channels) {
        let base = o * plane;
        let (v, i) = argmax_of(input, base..base + plane);
        *out = v;
        if let Some(idx) = indices.as_deref_mut() {
            idx[o] = i;
        }
    }
    Ok(())
}

fn check_plane(op: &'static str, plane: usize) -> Result<(), KernelError> {
    if plane == 0 {
        return Err(KernelError::DegenerateShape {
            op,
            detail: "empty spatial plane".into(),
        });
    }
    Ok(())
}

// ── Adaptive pooling ───────────────────────────────────────────

/// Bin `[start, end)` of output cell `o` when `input` cells are split into
/// `output` bins.
#[inline]
fn bin(o: usize, input: usize, output: usize) -> (usize, usize) {
    (o * input / output, (o + 1) * input / output)
}

fn check_adaptive<const D: usize>(
    op: &'static str,
    input: [usize; D],
    output: [usize; D],
) -> Result<(), KernelError> {
    for axis in 0..D {
        if output[axis] == 0 || input[axis] == 0 {
            return Err(KernelError::DegenerateShape {
                op,
                detail: format!("axis {axis}: {} -> {}", input[axis], output[axis]),
            });
        }
        if output[axis] > input[axis] {
            return Err(KernelError::UnsupportedCombination {
                op,
                detail: format!(
                    "axis {axis}: cannot pool {} cells into {} bins",
                    input[axis], output[axis]
                ),
            });
        }
    }
    Ok(())
}

/// Calls `f(output_index, cells)` per output element with the absolute input
/// indices of its adaptive bin, in scan order.
fn for_each_bin<const D: usize>(
    planes: usize,
    input: [usize; D],
    output: [usize; D],
    mut f: impl FnMut(usize, &mut dyn Iterator<Item = usize>),
) {
    let in_plane: usize = input.iter().product();
    let out_plane: usize = output.iter().product();
    for p in 0..planes {
        let mut pos = [0usize; D];
        for o in 0..out_plane {
            let mut lo = [0usize; D];
            let mut extent = [0usize; D];
            for axis in 0..D {
                let (s, e) = bin(pos[axis], input[axis], output[axis]);
                lo[axis] = s;
                extent[axis] = e - s;
            }
            let count: usize = extent.iter().product();
            let base = p * in_plane;
            let mut cells = (0..count).map(|c| {
                let rel = unravel(c, &extent);
                let mut linear = 0usize;
                for axis in 0..D {
                    linear = linear * input[axis] + lo[axis] + rel[axis];
                }
                base + linear
            });
            f(p * out_plane + o, &mut cells);
            advance(&mut pos, &output);
        }
    }
}

/// Adaptive average pooling: `bin_start = ⌊o·in/out⌋`,
/// `bin_end = ⌊(o+1)·in/out⌋`. Requires `output ≤ input` per axis.
pub fn adaptive_avg_pool<const D: usize>(
    output: &mut [f32],
    input: &[f32],
    batch: usize,
    channels: usize,
    input_extent: [usize; D],
    output_extent: [usize; D],
) -> Result<(), KernelError> {
    const OP: &str = "adaptive_avg_pool";
    check_adaptive(OP, input_extent, output_extent)?;
    let planes = batch * channels;
    check_len(OP, "input", input.len(), planes * input_extent.iter().product::<usize>())?;
    check_len(OP, "output", output.len(), planes * output_extent.iter().product::<usize>())?;
    for_each_bin(planes, input_extent, output_extent, |o, cells| {
        let (mut sum, mut count) = (0.0f32, 0usize);
        for i in cells {
            sum += input[i];
            count += 1;
        }
        output[o] = sum / count as f32;
    });
    Ok(())
}

/// Adaptive max pooling with the bins of [`adaptive_avg_pool`].
pub fn adaptive_max_pool<const D: usize>(
    output: &mut [f32],
    input: &[f32],
    batch: usize,
    channels: usize,
    input_extent: [usize; D],
    output_extent: [usize; D],
    mut indices: Option<&mut [usize]>,
) -> Result<(), KernelError> {
    const OP: &str = "adaptive_max_pool";
    check_adaptive(OP, input_extent, output_extent)?;
    let planes = batch * channels;
    let out_len = planes * output_extent.iter().product::<usize>();
    check_len(OP, "input", input.len(), planes * input_extent.iter().product::<usize>())?;
    check_len(OP, "output", output.len(), out_len)?;
    if let Some(idx) = indices.as_deref() {
        check_len(OP, "indices", idx.len(), out_len)?;
    }
    for_each_bin(planes, input_extent, output_extent, |o, cells| {
        let (v, i) = argmax_of(input, cells);
        output[o] = v;
        if let Some(idx) = indices.as_deref_mut() {
            idx[o] = i;
        }
    });
    Ok(())
}

// ── Per-dimension wrappers ─────────────────────────────────────

macro_rules! pool_wrappers {
    ($d:literal, $max:ident, $avg:ident, $avg_bw:ident, $ada_avg:ident, $ada_max:ident) => {
        pub fn $max(
            geom: &PoolGeometry<$d>,
            output: &mut [f32],
            input: &[f32],
            indices: Option<&mut [usize]>,
        ) -> Result<(), KernelError> {
            max_pool(geom, output, input, indices)
        }

        pub fn $avg(
            geom: &PoolGeometry<$d>,
            output: &mut [f32],
            input: &[f32],
        ) -> Result<(), KernelError> {
            avg_pool(geom, output, input)
        }

        pub fn $avg_bw(
            geom: &PoolGeometry<$d>,
            input_grad: &mut [f32],
            output_grad: &[f32],
        ) -> Result<(), KernelError> {
            avg_pool_backward(geom, input_grad, output_grad)
        }

        pub fn $ada_avg(
            output: &mut [f32],
            input: &[f32],
            batch: usize,
            channels: usize,
            input_extent: [usize; $d],
            output_extent: [usize; $d],
        ) -> Result<(), KernelError> {
            adaptive_avg_pool(output, input, batch, channels, input_extent, output_extent)
        }

        pub fn $ada_max(
            output: &mut [f32],
            input: &[f32],
            batch: usize,
            channels: usize,
            input_extent: [usize; $d],
            output_extent: [usize; $d],
            indices: Option<&mut [usize]>,
        ) -> Result<(), KernelError> {
            adaptive_max_pool(
                output,
                input,
                batch,
                channels,
                input_extent,
                output_extent,
                indices,
            )
        }
    };
}

pool_wrappers!(
    1,
    max_pool1d,
    avg_pool1d,
    avg_pool1d_backward,
    adaptive_avg_pool1d,
    adaptive_max_pool1d
);
pool_wrappers!(
    2,
    max_pool2d,
    avg_pool2d,
    avg_pool2d_backward,
    adaptive_avg_pool2d,
    adaptive_max_pool2d
);
pool_wrappers!(
    3,
    max_pool3d,
    avg_pool3d,
    avg_pool3d_backward,
    adaptive_avg_pool3d,
    adaptive_max_pool3d
);
