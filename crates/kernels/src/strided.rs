// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Strided operands and the mixed-radix index walker.
//!
//! A strided operand is a buffer, the offset of logical index `(0, …, 0)`,
//! and one signed element stride per axis. A stride of zero replicates the
//! operand along that axis (broadcasting); negative strides walk backwards.

use crate::KernelError;

/// Highest rank accepted by the strided kernels.
pub const MAX_RANK: usize = 16;

/// A read-only strided operand.
#[derive(Debug, Clone, Copy)]
pub struct StridedRef<'a> {
    pub data: &'a [f32],
    pub offset: usize,
    pub strides: &'a [isize],
}

impl<'a> StridedRef<'a> {
    pub fn new(data: &'a [f32], offset: usize, strides: &'a [isize]) -> Self {
        Self {
            data,
            offset,
            strides,
        }
    }
}

/// A writable strided operand.
#[derive(Debug)]
pub struct StridedMut<'a> {
    pub data: &'a mut [f32],
    pub offset: usize,
    pub strides: &'a [isize],
}

impl<'a> StridedMut<'a> {
    pub fn new(data: &'a mut [f32], offset: usize, strides: &'a [isize]) -> Self {
        Self {
            data,
            offset,
            strides,
        }
    }

    /// Reborrows the operand read-only.
    pub fn reborrow(&self) -> StridedRef<'_> {
        StridedRef {
            data: &*self.data,
            offset: self.offset,
            strides: self.strides,
        }
    }
}

/// Row-major strides for `shape`, in elements.
pub fn contiguous_strides(shape: &[usize]) -> Vec<isize> {
    let mut strides = vec![0isize; shape.len()];
    let mut acc = 1isize;
    for (s, &d) in strides.iter_mut().zip(shape).rev() {
        *s = acc;
        acc *= d.max(1) as isize;
    }
    strides
}

/// Writes row-major strides for `shape` into a fixed array.
pub(crate) fn contiguous_strides_into(shape: &[usize], out: &mut [isize; MAX_RANK]) {
    let mut acc = 1isize;
    for (s, &d) in out[..shape.len()].iter_mut().zip(shape).rev() {
        *s = acc;
        acc *= d.max(1) as isize;
    }
}

/// Validates rank and that every addressed element lies inside the buffer.
pub(crate) fn check_operand(
    op: &'static str,
    name: &str,
    len: usize,
    offset: usize,
    strides: &[isize],
    shape: &[usize],
) -> Result<(), KernelError> {
    if shape.len() > MAX_RANK {
        return Err(KernelError::UnsupportedCombination {
            op,
            detail: format!("rank {} exceeds the supported maximum of {MAX_RANK}", shape.len()),
        });
    }
    if strides.len() != shape.len() {
        return Err(KernelError::ShapeMismatch {
            op,
            detail: format!(
                "{name} has {} strides for a rank-{} shape",
                strides.len(),
                shape.len()
            ),
        });
    }
    if shape.contains(&0) {
        return Ok(());
    }
    let mut lo = offset as isize;
    let mut hi = offset as isize;
    for (&d, &s) in shape.iter().zip(strides) {
        let reach = (d as isize - 1) * s;
        if reach < 0 {
            lo += reach;
        } else {
            hi += reach;
        }
    }
    if lo < 0 || hi >= len as isize {
        return Err(KernelError::ShapeMismatch {
            op,
            detail: format!("{name} addresses elements [{lo}, {hi}] of a buffer of {len}"),
        });
    }
    Ok(())
}

/// Rejects destinations that would write one element more than once
/// through a zero stride.
pub(crate) fn check_writable(
    op: &'static str,
    strides: &[isize],
    shape: &[usize],
) -> Result<(), KernelError> {
    for (axis, (&d, &s)) in shape.iter().zip(strides).enumerate() {
        if d > 1 && s == 0 {
            return Err(KernelError::UnsupportedCombination {
                op,
                detail: format!("destination is broadcast along axis {axis}"),
            });
        }
    }
    Ok(())
}

/// Visits every logical index of `shape` in row-major order, passing the
/// element offsets of `N` operands to `f`.
///
/// The innermost axis runs as a tight loop; outer axes advance through a
/// mixed-radix counter. Operands must already be validated.
pub(crate) fn walk<const N: usize, F>(
    shape: &[usize],
    base: [usize; N],
    strides: [&[isize]; N],
    mut f: F,
) where
    F: FnMut([usize; N]),
{
    let rank = shape.len();
    if shape.contains(&0) {
        return;
    }
    if rank == 0 {
        f(base);
        return;
    }

    let inner = shape[rank - 1];
    let inner_step: [isize; N] = std::array::from_fn(|k| strides[k][rank - 1]);
    let mut pos: [isize; N] = std::array::from_fn(|k| base[k] as isize);
    let mut counter = [0usize; MAX_RANK];

    loop {
        let mut p = pos;
        for _ in 0..inner {
            f(std::array::from_fn(|k| p[k] as usize));
            for k in 0..N {
                p[k] += inner_step[k];
            }
        }

        // Advance the outer axes.
        let mut axis = rank - 1;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            counter[axis] += 1;
            for k in 0..N {
                pos[k] += strides[k][axis];
            }
            if counter[axis] < shape[axis] {
                break;
            }
            for k in 0..N {
                pos[k] -= strides[k][axis] * shape[axis] as isize;
            }
            counter[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[5]), vec![1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn test_contiguous_strides_into_matches() {
        let mut out = [0isize; MAX_RANK];
        contiguous_strides_into(&[3, 1, 2], &mut out);
        assert_eq!(&out[..3], contiguous_strides(&[3, 1, 2]).as_slice());
    }

    const ROW_MAJOR: &[isize] = &[3, 1];
    const TRANSPOSED: &[isize] = &[1, 2];
    const BROADCAST_ROW: &[isize] = &[0, 1];
    const REVERSED: &[isize] = &[-1];
    const NONE: &[isize] = &[];

    #[test]
    fn test_walk_row_major_order() {
        let mut seen = Vec::new();
        walk(&[2, 3], [0], [ROW_MAJOR], |[o]| seen.push(o));
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_walk_transposed_and_broadcast() {
        let mut seen = Vec::new();
        // Second operand broadcasts its single row.
        walk(&[2, 3], [0, 10], [TRANSPOSED, BROADCAST_ROW], |[a, b]| {
            seen.push((a, b))
        });
        assert_eq!(
            seen,
            vec![(0, 10), (2, 11), (4, 12), (1, 10), (3, 11), (5, 12)]
        );
    }

    #[test]
    fn test_walk_negative_stride() {
        let mut seen = Vec::new();
        walk(&[3], [2], [REVERSED], |[o]| seen.push(o));
        assert_eq!(seen, vec![2, 1, 0]);
    }

    #[test]
    fn test_walk_scalar_and_empty() {
        let mut count = 0;
        walk(&[], [4], [NONE], |[o]| {
            assert_eq!(o, 4);
            count += 1;
        });
        assert_eq!(count, 1);
        walk(&[3, 0], [0], [ROW_MAJOR], |_| panic!("empty shape visited"));
    }

    #[test]
    fn test_check_operand_bounds() {
        assert!(check_operand("t", "x", 6, 0, &[3, 1], &[2, 3]).is_ok());
        assert!(check_operand("t", "x", 5, 0, &[3, 1], &[2, 3]).is_err());
        assert!(check_operand("t", "x", 3, 2, &[-1], &[3]).is_ok());
        assert!(check_operand("t", "x", 3, 1, &[-1], &[3]).is_err());
        assert!(check_operand("t", "x", 3, 0, &[1], &[2, 3]).is_err());
    }

    #[test]
    fn test_check_writable() {
        assert!(check_writable("t", &[0, 1], &[1, 3]).is_ok());
        assert!(check_writable("t", &[0, 1], &[2, 3]).is_err());
    }
}
