// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sliding-window geometry shared by convolution and pooling.

use crate::KernelError;

/// Kernel, stride, padding and dilation along `D` spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<const D: usize> {
    pub kernel: [usize; D],
    pub stride: [usize; D],
    pub padding: [usize; D],
    pub dilation: [usize; D],
}

impl<const D: usize> Window<D> {
    /// Unit stride, no padding, no dilation.
    pub fn new(kernel: [usize; D]) -> Self {
        Self {
            kernel,
            stride: [1; D],
            padding: [0; D],
            dilation: [1; D],
        }
    }

    /// The same kernel extent on every axis.
    pub fn square(kernel: usize) -> Self {
        Self::new([kernel; D])
    }

    pub fn with_stride(mut self, stride: [usize; D]) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: [usize; D]) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_dilation(mut self, dilation: [usize; D]) -> Self {
        self.dilation = dilation;
        self
    }

    /// Number of taps in one window.
    pub fn window_len(&self) -> usize {
        self.kernel.iter().product()
    }

    /// Span of the dilated kernel along `axis`.
    pub fn effective_kernel(&self, axis: usize) -> usize {
        self.dilation[axis] * (self.kernel[axis] - 1) + 1
    }

    /// Rejects zero kernel, stride or dilation entries.
    pub fn validate(&self, op: &'static str) -> Result<(), KernelError> {
        for axis in 0..D {
            if self.kernel[axis] == 0 || self.stride[axis] == 0 || self.dilation[axis] == 0 {
                return Err(KernelError::DegenerateShape {
                    op,
                    detail: format!(
                        "axis {axis}: kernel {}, stride {}, dilation {} must all be positive",
                        self.kernel[axis], self.stride[axis], self.dilation[axis]
                    ),
                });
            }
        }
        Ok(())
    }

    /// `floor((in + 2·pad − dilation·(k − 1) − 1) / stride) + 1` per axis.
    pub fn output_extent(&self, op: &'static str, input: [usize; D]) -> Result<[usize; D], KernelError> {
        self.validate(op)?;
        let mut out = [0usize; D];
        for axis in 0..D {
            let padded = input[axis] + 2 * self.padding[axis];
            let span = self.effective_kernel(axis);
            if input[axis] == 0 || padded < span {
                return Err(KernelError::DegenerateShape {
                    op,
                    detail: format!(
                        "axis {axis}: window span {span} exceeds padded input {padded}"
                    ),
                });
            }
            out[axis] = (padded - span) / self.stride[axis] + 1;
        }
        Ok(out)
    }

    /// Output extent of a transposed convolution:
    /// `(in − 1)·stride − 2·pad + dilation·(k − 1) + output_padding + 1`.
    ///
    /// `output_padding` must be smaller than `max(stride, dilation)` on
    /// each axis.
    pub fn transposed_extent(
        &self,
        op: &'static str,
        input: [usize; D],
        output_padding: [usize; D],
    ) -> Result<[usize; D], KernelError> {
        self.validate(op)?;
        let mut out = [0usize; D];
        for axis in 0..D {
            if output_padding[axis] >= self.stride[axis].max(self.dilation[axis]) {
                return Err(KernelError::UnsupportedCombination {
                    op,
                    detail: format!(
                        "axis {axis}: output padding {} must be below max(stride, dilation)",
                        output_padding[axis]
                    ),
                });
            }
            if input[axis] == 0 {
                return Err(KernelError::DegenerateShape {
                    op,
                    detail: format!("axis {axis}: empty input"),
                });
            }
            let full = (input[axis] - 1) * self.stride[axis]
                + self.effective_kernel(axis)
                + output_padding[axis];
            let trim = 2 * self.padding[axis];
            if full <= trim {
                return Err(KernelError::DegenerateShape {
                    op,
                    detail: format!("axis {axis}: padding {} leaves no output", self.padding[axis]),
                });
            }
            out[axis] = full - trim;
        }
        Ok(out)
    }
}

// ── Index helpers ──────────────────────────────────────────────

#[inline]
pub(crate) fn unravel<const D: usize>(mut linear: usize, extent: &[usize; D]) -> [usize; D] {
    let mut idx = [0usize; D];
    for axis in (0..D).rev() {
        idx[axis] = linear % extent[axis];
        linear /= extent[axis];
    }
    idx
}

#[inline]
pub(crate) fn advance<const D: usize>(idx: &mut [usize; D], extent: &[usize; D]) {
    for axis in (0..D).rev() {
        idx[axis] += 1;
        if idx[axis] < extent[axis] {
            return;
        }
        idx[axis] = 0;
    }
}

/// Linear input position read by output position `o` through tap `k`, or
/// `None` when it falls in the padding.
#[inline]
pub(crate) fn tap_source<const D: usize>(
    o: &[usize; D],
    k: &[usize; D],
    window: &Window<D>,
    extent: &[usize; D],
) -> Option<usize> {
    let mut linear = 0usize;
    for axis in 0..D {
        let pos = (o[axis] * window.stride[axis] + k[axis] * window.dilation[axis]) as isize
            - window.padding[axis] as isize;
        if pos < 0 || pos as usize >= extent[axis] {
            return None;
        }
        linear = linear * extent[axis] + pos as usize;
    }
    Some(linear)
}
