// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Convolution over `D` spatial axes via im2col + GEMM.
//!
//! Layouts are row-major and contiguous:
//!
//! | operand    | layout                                   |
//! |------------|------------------------------------------|
//! | input      | `[batch, in_channels, *input]`           |
//! | weights    | `[out_channels, in_channels / groups, *kernel]` |
//! | output     | `[batch, out_channels, *output]`         |
//! | column     | `[in_channels / groups · Πkernel, Πoutput]` |
//!
//! The column buffer holds one image and one group at a time and is
//! supplied by the caller, so no entry point allocates. Transposed
//! convolution stores its weights as `[in_channels, out_channels / groups,
//! *kernel]` and is the adjoint of the forward convolution with the same
//! window.

use crate::blas::{gemm_nn, gemm_nt, gemm_tn};
use crate::error::check_len;
use crate::window::{advance, tap_source, unravel};
use crate::{KernelError, Window};

// ── Geometry ───────────────────────────────────────────────────

/// Problem description shared by every convolution entry point.
///
/// For transposed convolution `in_channels` and `input` still describe
/// the tensor fed *into* the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry<const D: usize> {
    pub batch: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub groups: usize,
    pub input: [usize; D],
    pub window: Window<D>,
}

pub type Conv1dGeometry = ConvGeometry<1>;
pub type Conv2dGeometry = ConvGeometry<2>;
pub type Conv3dGeometry = ConvGeometry<3>;

impl<const D: usize> ConvGeometry<D> {
    pub fn new(
        batch: usize,
        in_channels: usize,
        out_channels: usize,
        input: [usize; D],
        window: Window<D>,
    ) -> Self {
        Self {
            batch,
            in_channels,
            out_channels,
            groups: 1,
            input,
            window,
        }
    }

    /// One group per input channel, `multiplier` filters each.
    pub fn depthwise(
        batch: usize,
        channels: usize,
        multiplier: usize,
        input: [usize; D],
        window: Window<D>,
    ) -> Self {
        Self::new(batch, channels, channels * multiplier, input, window).with_groups(channels)
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    fn check_channels(&self, op: &'static str) -> Result<(), KernelError> {
        if self.in_channels == 0 || self.out_channels == 0 || self.groups == 0 {
            return Err(KernelError::DegenerateShape {
                op,
                detail: format!(
                    "channels {} -> {} with {} groups",
                    self.in_channels, self.out_channels, self.groups
                ),
            });
        }
        if self.in_channels % self.groups != 0 || self.out_channels % self.groups != 0 {
            return Err(KernelError::UnsupportedCombination {
                op,
                detail: format!(
                    "{} groups do not divide channels {} -> {}",
                    self.groups, self.in_channels, self.out_channels
                ),
            });
        }
        Ok(())
    }

    /// Spatial extent of the forward convolution output.
    pub fn output(&self) -> Result<[usize; D], KernelError> {
        self.check_channels("conv")?;
        self.window.output_extent("conv", self.input)
    }

    /// Spatial extent of the transposed convolution output.
    pub fn transposed_output(&self, output_padding: [usize; D]) -> Result<[usize; D], KernelError> {
        self.check_channels("conv_transposed")?;
        self.window
            .transposed_extent("conv_transposed", self.input, output_padding)
    }

    /// Column scratch length for [`conv_forward`] and its gradients.
    pub fn col_len(&self) -> Result<usize, KernelError> {
        let out = self.output()?;
        Ok(self.in_channels / self.groups * self.window.window_len() * out.iter().product::<usize>())
    }

    /// Column scratch length for the transposed convolution family.
    pub fn transposed_col_len(&self) -> Result<usize, KernelError> {
        self.check_channels("conv_transposed")?;
        Ok(self.out_channels / self.groups
            * self.window.window_len()
            * self.input.iter().product::<usize>())
    }

    /// Number of weights; identical for the forward and transposed layouts.
    pub fn weight_len(&self) -> usize {
        self.out_channels * (self.in_channels / self.groups.max(1)) * self.window.window_len()
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.in_channels * self.input.iter().product::<usize>()
    }
}

// ── Column transforms ──────────────────────────────────────────

/// Unfolds `channels` planes of `extent` onto a `grid` of window positions.
fn unfold<const D: usize>(
    col: &mut [f32],
    input: &[f32],
    channels: usize,
    extent: [usize; D],
    grid: [usize; D],
    window: &Window<D>,
) {
    let plane: usize = extent.iter().product();
    let positions: usize = grid.iter().product();
    let taps = window.window_len();
    for c in 0..channels {
        let src = &input[c * plane..(c + 1) * plane];
        for t in 0..taps {
            let k = unravel(t, &window.kernel);
            let row = (c * taps + t) * positions;
            let mut o = [0usize; D];
            for dst in &mut col[row..row + positions] {
                *dst = match tap_source(&o, &k, window, &extent) {
                    Some(i) => src[i],
                    None => 0.0,
                };
                advance(&mut o, &grid);
            }
        }
    }
}

/// Adjoint of [`unfold`]: scatters columns back, accumulating into `image`.
fn fold<const D: usize>(
    image: &mut [f32],
    col: &[f32],
    channels: usize,
    extent: [usize; D],
    grid: [usize; D],
    window: &Window<D>,
) {
    let plane: usize = extent.iter().product();
    let positions: usize = grid.iter().product();
    let taps = window.window_len();
    for c in 0..channels {
        let dst = &mut image[c * plane..(c + 1) * plane];
        for t in 0..taps {
            let k = unravel(t, &window.kernel);
            let row = (c * taps + t) * positions;
            let mut o = [0usize; D];
            for &v in &col[row..row + positions] {
                if let Some(i) = tap_source(&o, &k, window, &extent) {
                    dst[i] += v;
                }
                advance(&mut o, &grid);
            }
        }
    }
}

// ── im2col / col2im ────────────────────────────────────────────

/// Unfolds `channels` contiguous planes into a `[channels · Πk, Πout]`
/// column matrix. Padded taps read as zero.
pub fn im2col<const D: usize>(
    col: &mut [f32],
    input: &[f32],
    channels: usize,
    extent: [usize; D],
    window: &Window<D>,
) -> Result<(), KernelError> {
    const OP: &str = "im2col";
    let grid = window.output_extent(OP, extent)?;
    let plane: usize = extent.iter().product();
    let positions: usize = grid.iter().product();
    check_len(OP, "input", input.len(), channels * plane)?;
    check_len(OP, "col", col.len(), channels * window.window_len() * positions)?;
    unfold(col, input, channels, extent, grid, window);
    Ok(())
}

/// Folds a column matrix back onto `channels` planes, adding into `image`.
///
/// Overlapping windows sum; taps that landed in the padding are dropped.
pub fn col2im<const D: usize>(
    image: &mut [f32],
    col: &[f32],
    channels: usize,
    extent: [usize; D],
    window: &Window<D>,
) -> Result<(), KernelError> {
    const OP: &str = "col2im";
    let grid = window.output_extent(OP, extent)?;
    let plane: usize = extent.iter().product();
    let positions: usize = grid.iter().product();
    check_len(OP, "image", image.len(), channels * plane)?;
    check_len(OP, "col", col.len(), channels * window.window_len() * positions)?;
    fold(image, col, channels, extent, grid, window);
    Ok(())
}

// ── Forward convolution ────────────────────────────────────────

struct Dims {
    cin_g: usize,
    cout_g: usize,
    k: usize,
    in_plane: usize,
    out_plane: usize,
}

impl Dims {
    fn new<const D: usize>(geom: &ConvGeometry<D>, out: &[usize; D]) -> Self {
        let cin_g = geom.in_channels / geom.groups;
        Self {
            cin_g,
            cout_g: geom.out_channels / geom.groups,
            k: cin_g * geom.window.window_len(),
            in_plane: geom.input.iter().product(),
            out_plane: out.iter().product(),
        }
    }
}

fn add_bias(output: &mut [f32], bias: &[f32], batch: usize, channels: usize, plane: usize) {
    for n in 0..batch {
        for (c, &b) in bias[..channels].iter().enumerate() {
            let start = (n * channels + c) * plane;
            for v in &mut output[start..start + plane] {
                *v += b;
            }
        }
    }
}

/// `output = conv(input, weights) + bias`.
pub fn conv_forward<const D: usize>(
    geom: &ConvGeometry<D>,
    output: &mut [f32],
    input: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    col: &mut [f32],
) -> Result<(), KernelError> {
    const OP: &str = "conv_forward";
    let out = geom.output()?;
    let d = Dims::new(geom, &out);
    check_len(OP, "input", input.len(), geom.input_len())?;
    check_len(OP, "output", output.len(), geom.batch * geom.out_channels * d.out_plane)?;
    check_len(OP, "weights", weights.len(), geom.weight_len())?;
    check_len(OP, "col", col.len(), d.k * d.out_plane)?;
    if let Some(b) = bias {
        check_len(OP, "bias", b.len(), geom.out_channels)?;
    }

    let col = &mut col[..d.k * d.out_plane];
    for n in 0..geom.batch {
        for g in 0..geom.groups {
            let x0 = (n * geom.in_channels + g * d.cin_g) * d.in_plane;
            unfold(col, &input[x0..], d.cin_g, geom.input, out, &geom.window);
            let y0 = (n * geom.out_channels + g * d.cout_g) * d.out_plane;
            let w0 = g * d.cout_g * d.k;
            gemm_nn(
                &mut output[y0..y0 + d.cout_g * d.out_plane],
                &weights[w0..w0 + d.cout_g * d.k],
                col,
                d.out_plane,
                d.k,
                d.out_plane,
                d.cout_g,
                d.out_plane,
                d.k,
                1.0,
                0.0,
            )?;
        }
    }
    if let Some(b) = bias {
        add_bias(output, b, geom.batch, geom.out_channels, d.out_plane);
    }
    Ok(())
}

/// Gradient with respect to the input; overwrites `input_grad`.
pub fn conv_input_grad<const D: usize>(
    geom: &ConvGeometry<D>,
    input_grad: &mut [f32],
    output_grad: &[f32],
    weights: &[f32],
    col: &mut [f32],
) -> Result<(), KernelError> {
    const OP: &str = "conv_input_grad";
    let out = geom.output()?;
    let d = Dims::new(geom, &out);
    check_len(OP, "input_grad", input_grad.len(), geom.input_len())?;
    check_len(OP, "output_grad", output_grad.len(), geom.batch * geom.out_channels * d.out_plane)?;
    check_len(OP, "weights", weights.len(), geom.weight_len())?;
    check_len(OP, "col", col.len(), d.k * d.out_plane)?;

    input_grad[..geom.input_len()].fill(0.0);
    let col = &mut col[..d.k * d.out_plane];
    for n in 0..geom.batch {
        for g in 0..geom.groups {
            let y0 = (n * geom.out_channels + g * d.cout_g) * d.out_plane;
            let w0 = g * d.cout_g * d.k;
            gemm_tn(
                col,
                &weights[w0..w0 + d.cout_g * d.k],
                &output_grad[y0..y0 + d.cout_g * d.out_plane],
                d.out_plane,
                d.k,
                d.out_plane,
                d.k,
                d.out_plane,
                d.cout_g,
                1.0,
                0.0,
            )?;
            let x0 = (n * geom.in_channels + g * d.cin_g) * d.in_plane;
            fold(&mut input_grad[x0..], col, d.cin_g, geom.input, out, &geom.window);
        }
    }
    Ok(())
}

/// Gradient with respect to the weights.
///
/// With `accumulate` the result is added to `kernel_grad`; otherwise it
/// overwrites it.
pub fn conv_kernel_grad<const D: usize>(
    geom: &ConvGeometry<D>,
    kernel_grad: &mut [f32],
    input: &[f32],
    output_grad: &[f32],
    col: &mut [f32],
    accumulate: bool,
) -> Result<(), KernelError> {
    const OP: &str = "conv_kernel_grad";
    let out = geom.output()?;
    let d = Dims::new(geom, &out);
    check_len(OP, "kernel_grad", kernel_grad.len(), geom.weight_len())?;
    check_len(OP, "input", input.len(), geom.input_len())?;
    check_len(OP, "output_grad", output_grad.len(), geom.batch * geom.out_channels * d.out_plane)?;
    check_len(OP, "col", col.len(), d.k * d.out_plane)?;

    if !accumulate {
        kernel_grad[..geom.weight_len()].fill(0.0);
    }
    let col = &mut col[..d.k * d.out_plane];
    for n in 0..geom.batch {
        for g in 0..geom.groups {
            let x0 = (n * geom.in_channels + g * d.cin_g) * d.in_plane;
            unfold(col, &input[x0..], d.cin_g, geom.input, out, &geom.window);
            let y0 = (n * geom.out_channels + g * d.cout_g) * d.out_plane;
            let w0 = g * d.cout_g * d.k;
            gemm_nt(
                &mut kernel_grad[w0..w0 + d.cout_g * d.k],
                &output_grad[y0..y0 + d.cout_g * d.out_plane],
                col,
                d.k,
                d.out_plane,
                d.out_plane,
                d.cout_g,
                d.k,
                d.out_plane,
                1.0,
                1.0,
            )?;
        }
    }
    Ok(())
}

/// Bias gradient: the output gradient summed over batch and space.
///
/// Layout-only, so it serves every dimensionality and the transposed
/// family alike.
pub fn conv_bias_grad(
    bias_grad: &mut [f32],
    output_grad: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
    accumulate: bool,
) -> Result<(), KernelError> {
    const OP: &str = "conv_bias_grad";
    check_len(OP, "bias_grad", bias_grad.len(), channels)?;
    check_len(OP, "output_grad", output_grad.len(), batch * channels * plane)?;
    if !accumulate {
        bias_grad[..channels].fill(0.0);
    }
    for n in 0..batch {
        for (c, b) in bias_grad[..channels].iter_mut().enumerate() {
            let start = (n * channels + c) * plane;
            for &g in &output_grad[start..start + plane] {
                *b += g;
            }
        }
    }
    Ok(())
}

// ── Transposed convolution ─────────────────────────────────────

/// Transposed convolution: scatters each input element through the kernel
/// onto the (larger) output, then adds `bias`.
pub fn conv_transposed<const D: usize>(
    geom: &ConvGeometry<D>,
    output_padding: [usize; D],
    output: &mut [f32],
    input: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    col: &mut [f32],
) -> Result<(), KernelError> {
    const OP: &str = "conv_transposed";
    let out = geom.transposed_output(output_padding)?;
    let (cin_g, cout_g) = (geom.in_channels / geom.groups, geom.out_channels / geom.groups);
    let k = cout_g * geom.window.window_len();
    let in_plane: usize = geom.input.iter().product();
    let out_plane: usize = out.iter().product();
    check_len(OP, "input", input.len(), geom.input_len())?;
    check_len(OP, "output", output.len(), geom.batch * geom.out_channels * out_plane)?;
    check_len(OP, "weights", weights.len(), geom.weight_len())?;
    check_len(OP, "col", col.len(), k * in_plane)?;
    if let Some(b) = bias {
        check_len(OP, "bias", b.len(), geom.out_channels)?;
    }

    output[..geom.batch * geom.out_channels * out_plane].fill(0.0);
    let col = &mut col[..k * in_plane];
    for n in 0..geom.batch {
        for g in 0..geom.groups {
            let x0 = (n * geom.in_channels + g * cin_g) * in_plane;
            let w0 = g * cin_g * k;
            gemm_tn(
                col,
                &weights[w0..w0 + cin_g * k],
                &input[x0..x0 + cin_g * in_plane],
                in_plane,
                k,
                in_plane,
                k,
                in_plane,
                cin_g,
                1.0,
                0.0,
            )?;
            let y0 = (n * geom.out_channels + g * cout_g) * out_plane;
            fold(&mut output[y0..], col, cout_g, out, geom.input, &geom.window);
        }
    }
    if let Some(b) = bias {
        add_bias(output, b, geom.batch, geom.out_channels, out_plane);
    }
    Ok(())
}

/// Input gradient of [`conv_transposed`]: a forward convolution of the
/// output gradient with the same weights. Overwrites `input_grad`.
pub fn conv_transposed_input_grad<const D: usize>(
    geom: &ConvGeometry<D>,
    output_padding: [usize; D],
    input_grad: &mut [f32],
    output_grad: &[f32],
    weights: &[f32],
    col: &mut [f32],
) -> Result<(), KernelError> {
    const OP: &str = "conv_transposed_input_grad";
    let out = geom.transposed_output(output_padding)?;
    let (cin_g, cout_g) = (geom.in_channels / geom.groups, geom.out_channels / geom.groups);
    let k = cout_g * geom.window.window_len();
    let in_plane: usize = geom.input.iter().product();
    let out_plane: usize = out.iter().product();
    check_len(OP, "input_grad", input_grad.len(), geom.input_len())?;
    check_len(OP, "output_grad", output_grad.len(), geom.batch * geom.out_channels * out_plane)?;
    check_len(OP, "weights", weights.len(), geom.weight_len())?;
    check_len(OP, "col", col.len(), k * in_plane)?;

    let col = &mut col[..k * in_plane];
    for n in 0..geom.batch {
        for g in 0..geom.groups {
            let y0 = (n * geom.out_channels + g * cout_g) * out_plane;
            unfold(col, &output_grad[y0..], cout_g, out, geom.input, &geom.window);
            let x0 = (n * geom.in_channels + g * cin_g) * in_plane;
            let w0 = g * cin_g * k;
            gemm_nn(
                &mut input_grad[x0..x0 + cin_g * in_plane],
                &weights[w0..w0 + cin_g * k],
                col,
                in_plane,
                k,
                in_plane,
                cin_g,
                in_plane,
                k,
                1.0,
                0.0,
            )?;
        }
    }
    Ok(())
}

/// Weight gradient of [`conv_transposed`], overwriting unless `accumulate`.
pub fn conv_transposed_kernel_grad<const D: usize>(
    geom: &ConvGeometry<D>,
    output_padding: [usize; D],
    kernel_grad: &mut [f32],
    input: &[f32],
    output_grad: &[f32],
    col: &mut [f32],
    accumulate: bool,
) -> Result<(), KernelError> {
    const OP: &str = "conv_transposed_kernel_grad";
    let out = geom.transposed_output(output_padding)?;
    let (cin_g, cout_g) = (geom.in_channels / geom.groups, geom.out_channels / geom.groups);
    let k = cout_g * geom.window.window_len();
    let in_plane: usize = geom.input.iter().product();
    let out_plane: usize = out.iter().product();
    check_len(OP, "kernel_grad", kernel_grad.len(), geom.weight_len())?;
    check_len(OP, "input", input.len(), geom.input_len())?;
    check_len(OP, "output_grad", output_grad.len(), geom.batch * geom.out_channels * out_plane)?;
    check_len(OP, "col", col.len(), k * in_plane)?;

    if !accumulate {
        kernel_grad[..geom.weight_len()].fill(0.0);
    }
    let col = &mut col[..k * in_plane];
    for n in 0..geom.batch {
        for g in 0..geom.groups {
            let y0 = (n * geom.out_channels + g * cout_g) * out_plane;
            unfold(col, &output_grad[y0..], cout_g, out, geom.input, &geom.window);
            let x0 = (n * geom.in_channels + g * cin_g) * in_plane;
            let w0 = g * cin_g * k;
            gemm_nt(
                &mut kernel_grad[w0..w0 + cin_g * k],
                &input[x0..x0 + cin_g * in_plane],
                col,
                k,
                in_plane,
                in_plane,
                cin_g,
                k,
                in_plane,
                1.0,
                1.0,
            )?;
        }
    }
    Ok(())
}

// ── Per-dimension wrappers ─────────────────────────────────────

macro_rules! conv_wrappers {
    ($d:literal, $fwd:ident, $ig:ident, $kg:ident, $tr:ident, $tig:ident, $tkg:ident) => {
        pub fn $fwd(
            geom: &ConvGeometry<$d>,
            output: &mut [f32],
            input: &[f32],
            weights: &[f32],
            bias: Option<&[f32]>,
            col: &mut [f32],
        ) -> Result<(), KernelError> {
            conv_forward(geom, output, input, weights, bias, col)
        }

        pub fn $ig(
            geom: &ConvGeometry<$d>,
            input_grad: &mut [f32],
            output_grad: &[f32],
            weights: &[f32],
            col: &mut [f32],
        ) -> Result<(), KernelError> {
            conv_input_grad(geom, input_grad, output_grad, weights, col)
        }

        pub fn $kg(
            geom: &ConvGeometry<$d>,
            kernel_grad: &mut [f32],
            input: &[f32],
            output_grad: &[f32],
            col: &mut [f32],
            accumulate: bool,
        ) -> Result<(), KernelError> {
            conv_kernel_grad(geom, kernel_grad, input, output_grad, col, accumulate)
        }

        pub fn $tr(
            geom: &ConvGeometry<$d>,
            output_padding: [usize; $d],
            output: &mut [f32],
            input: &[f32],
            weights: &[f32],
            bias: Option<&[f32]>,
            col: &mut [f32],
        ) -> Result<(), KernelError> {
            conv_transposed(geom, output_padding, output, input, weights, bias, col)
        }

        pub fn $tig(
            geom: &ConvGeometry<$d>,
            output_padding: [usize; $d],
            input_grad: &mut [f32],
            output_grad: &[f32],
            weights: &[f32],
            col: &mut [f32],
        ) -> Result<(), KernelError> {
            conv_transposed_input_grad(geom, output_padding, input_grad, output_grad, weights, col)
        }

        pub fn $tkg(
            geom: &ConvGeometry<$d>,
            output_padding: [usize; $d],
            kernel_grad: &mut [f32],
            input: &[f32],
            output_grad: &[f32],
            col: &mut [f32],
            accumulate: bool,
        ) -> Result<(), KernelError> {
            conv_transposed_kernel_grad(
                geom,
                output_padding,
                kernel_grad,
                input,
                output_grad,
                col,
                accumulate,
            )
        }
    };
}

conv_wrappers!(
    1,
    conv1d,
    conv1d_input_grad,
    conv1d_kernel_grad,
    conv1d_transposed,
    conv1d_transposed_input_grad,
    conv1d_transposed_kernel_grad
);
conv_wrappers!(
    2,
    conv2d,
    conv2d_input_grad,
    conv2d_kernel_grad,
    conv2d_transposed,
    conv2d_transposed_input_grad,
    conv2d_transposed_kernel_grad
);
conv_wrappers!(
    3,
    conv3d,
    conv3d_input_grad,
    conv3d_kernel_grad,
    conv3d_transposed,
    conv3d_transposed_input_grad,
    conv3d_transposed_kernel_grad
);
