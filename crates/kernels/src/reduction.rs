// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Axis reductions.
//!
//! Reductions remove the listed axes: the destination shape is the source
//! shape with those axes dropped, in their input order. For each output
//! element the reduced sub-space is visited in increasing row-major order,
//! so the result depends only on the logical values and never on how either
//! operand is strided.

use crate::strided::{check_operand, check_writable, contiguous_strides_into, walk, MAX_RANK};
use crate::{KernelError, StridedMut, StridedRef};

/// Reductions over an axis list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    /// NaN-propagating maximum.
    Max,
    /// NaN-propagating minimum.
    Min,
}

/// Index-producing reductions along a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgOp {
    Max,
    Min,
}

/// Kept and reduced views of a source layout.
struct Split {
    kept_shape: [usize; MAX_RANK],
    kept_strides: [isize; MAX_RANK],
    kept: usize,
    red_shape: [usize; MAX_RANK],
    red_strides: [isize; MAX_RANK],
    red: usize,
}

fn split_axes(
    op: &'static str,
    shape: &[usize],
    strides: &[isize],
    axes: &[usize],
) -> Result<Split, KernelError> {
    if axes.is_empty() {
        return Err(KernelError::UnsupportedCombination {
            op,
            detail: "no axis to reduce".into(),
        });
    }
    let mut marked = [false; MAX_RANK];
    for &axis in axes {
        if axis >= shape.len() {
            return Err(KernelError::ShapeMismatch {
                op,
                detail: format!("axis {axis} out of range for rank {}", shape.len()),
            });
        }
        if marked[axis] {
            return Err(KernelError::UnsupportedCombination {
                op,
                detail: format!("axis {axis} listed twice"),
            });
        }
        marked[axis] = true;
    }

    let mut split = Split {
        kept_shape: [0; MAX_RANK],
        kept_strides: [0; MAX_RANK],
        kept: 0,
        red_shape: [0; MAX_RANK],
        red_strides: [0; MAX_RANK],
        red: 0,
    };
    for (axis, (&d, &s)) in shape.iter().zip(strides).enumerate() {
        if marked[axis] {
            split.red_shape[split.red] = d;
            split.red_strides[split.red] = s;
            split.red += 1;
        } else {
            split.kept_shape[split.kept] = d;
            split.kept_strides[split.kept] = s;
            split.kept += 1;
        }
    }
    Ok(split)
}

/// Reduces `src` (logical shape `src_shape`) over `axes` into `dst`.
///
/// `Sum` over an empty axis yields `0`; the other ops reject it with
/// [`KernelError::DegenerateShape`].
pub fn reduce(
    op: ReduceOp,
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    src_shape: &[usize],
    axes: &[usize],
) -> Result<(), KernelError> {
    const OP: &str = "reduce";
    check_operand(OP, "src", src.data.len(), src.offset, src.strides, src_shape)?;
    let split = split_axes(OP, src_shape, src.strides, axes)?;
    let kept_shape = &split.kept_shape[..split.kept];
    let red_shape = &split.red_shape[..split.red];
    let red_strides = &split.red_strides[..split.red];

    check_operand(OP, "dst", dst.data.len(), dst.offset, dst.strides, kept_shape)?;
    check_writable(OP, dst.strides, kept_shape)?;

    let count: usize = red_shape.iter().product();
    if count == 0 && op != ReduceOp::Sum {
        return Err(KernelError::DegenerateShape {
            op: OP,
            detail: format!("{op:?} over an empty axis"),
        });
    }

    let out = dst.data;
    let data = src.data;
    walk(
        kept_shape,
        [dst.offset, src.offset],
        [dst.strides, &split.kept_strides[..split.kept]],
        |[d, base]| {
            let mut acc = match op {
                ReduceOp::Sum | ReduceOp::Mean => 0.0f32,
                ReduceOp::Max => f32::NEG_INFINITY,
                ReduceOp::Min => f32::INFINITY,
            };
            walk(red_shape, [base], [red_strides], |[i]| {
                let v = data[i];
                match op {
                    ReduceOp::Sum | ReduceOp::Mean => acc += v,
                    ReduceOp::Max => {
                        if v.is_nan() || v > acc {
                            acc = if acc.is_nan() { acc } else { v };
                        }
                    }
                    ReduceOp::Min => {
                        if v.is_nan() || v < acc {
                            acc = if acc.is_nan() { acc } else { v };
                        }
                    }
                }
            });
            out[d] = if op == ReduceOp::Mean {
                acc / count as f32
            } else {
                acc
            };
        },
    );
    Ok(())
}

/// [`reduce`] for contiguous row-major operands.
pub fn reduce_contiguous(
    op: ReduceOp,
    dst: &mut [f32],
    src: &[f32],
    src_shape: &[usize],
    axes: &[usize],
) -> Result<(), KernelError> {
    let (src_strides, dst_strides, dst_rank) = contiguous_pair(src_shape, axes)?;
    reduce(
        op,
        StridedMut::new(dst, 0, &dst_strides[..dst_rank]),
        StridedRef::new(src, 0, &src_strides[..src_shape.len()]),
        src_shape,
        axes,
    )
}

/// Writes the index of the extreme element along `axis` as an `f32`.
///
/// Ties resolve to the smallest index. An empty axis is rejected with
/// [`KernelError::DegenerateShape`].
pub fn arg_reduce(
    op: ArgOp,
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    src_shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    const OP: &str = "arg_reduce";
    check_operand(OP, "src", src.data.len(), src.offset, src.strides, src_shape)?;
    let split = split_axes(OP, src_shape, src.strides, &[axis])?;
    let kept_shape = &split.kept_shape[..split.kept];
    check_operand(OP, "dst", dst.data.len(), dst.offset, dst.strides, kept_shape)?;
    check_writable(OP, dst.strides, kept_shape)?;

    let extent = src_shape[axis];
    if extent == 0 {
        return Err(KernelError::DegenerateShape {
            op: OP,
            detail: format!("axis {axis} is empty"),
        });
    }
    let step = src.strides[axis];
    let out = dst.data;
    let data = src.data;
    walk(
        kept_shape,
        [dst.offset, src.offset],
        [dst.strides, &split.kept_strides[..split.kept]],
        |[d, base]| {
            let mut best = 0usize;
            let mut best_val = data[base];
            let mut pos = base as isize;
            for i in 1..extent {
                pos += step;
                let v = data[pos as usize];
                let better = match op {
                    ArgOp::Max => v > best_val,
                    ArgOp::Min => v < best_val,
                };
                if better {
                    best = i;
                    best_val = v;
                }
            }
            out[d] = best as f32;
        },
    );
    Ok(())
}

/// [`arg_reduce`] for contiguous row-major operands.
pub fn arg_reduce_contiguous(
    op: ArgOp,
    dst: &mut [f32],
    src: &[f32],
    src_shape: &[usize],
    axis: usize,
) -> Result<(), KernelError> {
    let (src_strides, dst_strides, dst_rank) = contiguous_pair(src_shape, &[axis])?;
    arg_reduce(
        op,
        StridedMut::new(dst, 0, &dst_strides[..dst_rank]),
        StridedRef::new(src, 0, &src_strides[..src_shape.len()]),
        src_shape,
        axis,
    )
}

/// Contiguous strides of a source shape and of its reduced shape.
fn contiguous_pair(
    src_shape: &[usize],
    axes: &[usize],
) -> Result<([isize; MAX_RANK], [isize; MAX_RANK], usize), KernelError> {
    if src_shape.len() > MAX_RANK {
        return Err(KernelError::UnsupportedCombination {
            op: "reduce",
            detail: format!("rank {} exceeds {MAX_RANK}", src_shape.len()),
        });
    }
    let mut src_strides = [0isize; MAX_RANK];
    contiguous_strides_into(src_shape, &mut src_strides);
    let mut kept = [0usize; MAX_RANK];
    let mut rank = 0;
    for (axis, &d) in src_shape.iter().enumerate() {
        if !axes.contains(&axis) {
            kept[rank] = d;
            rank += 1;
        }
    }
    let mut dst_strides = [0isize; MAX_RANK];
    contiguous_strides_into(&kept[..rank], &mut dst_strides);
    Ok((src_strides, dst_strides, rank))
}

#[cfg(test)]
mod tests {
    use super::*;

    // [[1, 2, 3], [4, 5, 6]]
    const X: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

    #[test]
    fn test_sum_each_axis() {
        let mut rows = [0.0; 3];
        reduce_contiguous(ReduceOp::Sum, &mut rows, &X, &[2, 3], &[0]).unwrap();
        assert_eq!(rows, [5.0, 7.0, 9.0]);

        let mut cols = [0.0; 2];
        reduce_contiguous(ReduceOp::Sum, &mut cols, &X, &[2, 3], &[1]).unwrap();
        assert_eq!(cols, [6.0, 15.0]);

        let mut all = [0.0; 1];
        reduce_contiguous(ReduceOp::Sum, &mut all, &X, &[2, 3], &[0, 1]).unwrap();
        assert_eq!(all, [21.0]);
    }

    #[test]
    fn test_mean_max_min() {
        let mut out = [0.0; 2];
        reduce_contiguous(ReduceOp::Mean, &mut out, &X, &[2, 3], &[1]).unwrap();
        assert_eq!(out, [2.0, 5.0]);
        reduce_contiguous(ReduceOp::Max, &mut out, &X, &[2, 3], &[1]).unwrap();
        assert_eq!(out, [3.0, 6.0]);
        reduce_contiguous(ReduceOp::Min, &mut out, &X, &[2, 3], &[1]).unwrap();
        assert_eq!(out, [1.0, 4.0]);
    }

    #[test]
    fn test_max_propagates_nan() {
        let mut out = [0.0; 1];
        reduce_contiguous(ReduceOp::Max, &mut out, &[1.0, f32::NAN, 3.0], &[3], &[0]).unwrap();
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_strided_source_is_bit_identical() {
        let logical: Vec<f32> = (0..24).map(|i| 0.1 * i as f32 + 0.013).collect();
        // Same values stored as the [4, 3, 2] transpose of the logical [2, 3, 4].
        let mut stored = vec![0.0; 24];
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..4 {
                    stored[k * 6 + j * 2 + i] = logical[i * 12 + j * 4 + k];
                }
            }
        }
        let mut want = [0.0; 3];
        reduce_contiguous(ReduceOp::Sum, &mut want, &logical, &[2, 3, 4], &[0, 2]).unwrap();

        let mut got = [0.0; 3];
        reduce(
            ReduceOp::Sum,
            StridedMut::new(&mut got, 0, &[1]),
            StridedRef::new(&stored, 0, &[1, 2, 6]),
            &[2, 3, 4],
            &[0, 2],
        )
        .unwrap();
        assert_eq!(want.map(f32::to_bits), got.map(f32::to_bits));
    }

    #[test]
    fn test_reduce_errors() {
        let mut out = [0.0; 2];
        let err = reduce_contiguous(ReduceOp::Sum, &mut out, &X, &[2, 3], &[]).unwrap_err();
        assert!(matches!(err, KernelError::UnsupportedCombination { .. }));
        let err = reduce_contiguous(ReduceOp::Sum, &mut out, &X, &[2, 3], &[2]).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { .. }));
        let err = reduce_contiguous(ReduceOp::Sum, &mut out, &X, &[2, 3], &[1, 1]).unwrap_err();
        assert!(matches!(err, KernelError::UnsupportedCombination { .. }));
    }

    #[test]
    fn test_empty_axis() {
        let mut out = [7.0; 2];
        reduce_contiguous(ReduceOp::Sum, &mut out, &[], &[2, 0], &[1]).unwrap();
        assert_eq!(out, [0.0, 0.0]);
        let err = reduce_contiguous(ReduceOp::Max, &mut out, &[], &[2, 0], &[1]).unwrap_err();
        assert!(matches!(err, KernelError::DegenerateShape { .. }));
    }

    #[test]
    fn test_argmax_tie_breaks_to_smallest_index() {
        let x = [3.0, 7.0, 7.0, 1.0, 1.0, 0.0];
        let mut out = [0.0; 2];
        arg_reduce_contiguous(ArgOp::Max, &mut out, &x, &[2, 3], 1).unwrap();
        assert_eq!(out, [1.0, 0.0]);
        arg_reduce_contiguous(ArgOp::Min, &mut out, &x, &[2, 3], 1).unwrap();
        assert_eq!(out, [0.0, 2.0]);

        let mut cols = [0.0; 3];
        arg_reduce_contiguous(ArgOp::Max, &mut cols, &x, &[2, 3], 0).unwrap();
        assert_eq!(cols, [0.0, 0.0, 0.0]);
    }
}
