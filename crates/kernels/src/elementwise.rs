// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise kernels.
//!
//! Every op comes in two forms:
//! - a contiguous fast path over `n` elements (`unary`, `binary`, …);
//! - a strided path over a logical `shape` (`unary_strided`, …) where each
//!   operand carries its own offset and signed strides. Zero input strides
//!   broadcast; destinations must not be broadcast.
//!
//! The scalar arithmetic lives in the small `*Op` enums below, and a
//! handful of generic drivers apply it. Adding an op is one match arm.

use crate::error::check_len;
use crate::strided::{check_operand, check_writable, walk};
use crate::{KernelError, StridedMut, StridedRef};

// ── Scalar op tables ───────────────────────────────────────────

/// Single-input scalar functions, including the scalar-fused forms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Exp,
    Log,
    Sqrt,
    Abs,
    /// `-1`, `0` or `1`; NaN stays NaN.
    Sign,
    Sin,
    Cos,
    Tanh,
    Negate,
    Square,
    Reciprocal,
    Pow(f32),
    AddScalar(f32),
    SubScalar(f32),
    /// Multiplication by a scalar.
    Scale(f32),
    DivScalar(f32),
    Clamp { min: f32, max: f32 },
}

impl UnaryOp {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    x
                }
            }
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Negate => -x,
            UnaryOp::Square => x * x,
            UnaryOp::Reciprocal => 1.0 / x,
            UnaryOp::Pow(p) => x.powf(p),
            UnaryOp::AddScalar(s) => x + s,
            UnaryOp::SubScalar(s) => x - s,
            UnaryOp::Scale(s) => x * s,
            UnaryOp::DivScalar(s) => x / s,
            UnaryOp::Clamp { min, max } => x.max(min).min(max),
        }
    }
}

/// Two-input arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    /// NaN-propagating maximum.
    Maximum,
    /// NaN-propagating minimum.
    Minimum,
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Maximum => {
                if a.is_nan() || b.is_nan() {
                    f32::NAN
                } else {
                    a.max(b)
                }
            }
            BinaryOp::Minimum => {
                if a.is_nan() || b.is_nan() {
                    f32::NAN
                } else {
                    a.min(b)
                }
            }
        }
    }
}

/// Comparisons producing `1.0` for true and `0.0` for false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        let hit = match self {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        };
        if hit {
            1.0
        } else {
            0.0
        }
    }
}

// ── Generic drivers ────────────────────────────────────────────

fn check_dst(op: &'static str, dst: &StridedMut<'_>, shape: &[usize]) -> Result<(), KernelError> {
    check_operand(op, "dst", dst.data.len(), dst.offset, dst.strides, shape)?;
    check_writable(op, dst.strides, shape)
}

fn check_src(
    op: &'static str,
    name: &str,
    src: &StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    check_operand(op, name, src.data.len(), src.offset, src.strides, shape)
}

/// `dst[i] = f(src[i])` over the first `n` elements.
pub(crate) fn map1(
    op: &'static str,
    dst: &mut [f32],
    src: &[f32],
    n: usize,
    f: impl Fn(f32) -> f32,
) -> Result<(), KernelError> {
    check_len(op, "dst", dst.len(), n)?;
    check_len(op, "src", src.len(), n)?;
    for (d, &s) in dst[..n].iter_mut().zip(&src[..n]) {
        *d = f(s);
    }
    Ok(())
}

/// Strided form of [`map1`].
pub(crate) fn map1_strided(
    op: &'static str,
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    shape: &[usize],
    f: impl Fn(f32) -> f32,
) -> Result<(), KernelError> {
    check_dst(op, &dst, shape)?;
    check_src(op, "src", &src, shape)?;
    let out = dst.data;
    walk(shape, [dst.offset, src.offset], [dst.strides, src.strides], |[d, s]| {
        out[d] = f(src.data[s]);
    });
    Ok(())
}

/// `dst[i] = f(a[i], b[i])` over the first `n` elements.
pub(crate) fn map2(
    op: &'static str,
    dst: &mut [f32],
    a: &[f32],
    b: &[f32],
    n: usize,
    f: impl Fn(f32, f32) -> f32,
) -> Result<(), KernelError> {
    check_len(op, "dst", dst.len(), n)?;
    check_len(op, "a", a.len(), n)?;
    check_len(op, "b", b.len(), n)?;
    for ((d, &x), &y) in dst[..n].iter_mut().zip(&a[..n]).zip(&b[..n]) {
        *d = f(x, y);
    }
    Ok(())
}

/// Strided form of [`map2`].
pub(crate) fn map2_strided(
    op: &'static str,
    dst: StridedMut<'_>,
    a: StridedRef<'_>,
    b: StridedRef<'_>,
    shape: &[usize],
    f: impl Fn(f32, f32) -> f32,
) -> Result<(), KernelError> {
    check_dst(op, &dst, shape)?;
    check_src(op, "a", &a, shape)?;
    check_src(op, "b", &b, shape)?;
    let out = dst.data;
    walk(
        shape,
        [dst.offset, a.offset, b.offset],
        [dst.strides, a.strides, b.strides],
        |[d, i, j]| {
            out[d] = f(a.data[i], b.data[j]);
        },
    );
    Ok(())
}

/// `dst[i] = f(a[i], b[i], c[i])`, strided.
pub(crate) fn map3_strided(
    op: &'static str,
    dst: StridedMut<'_>,
    a: StridedRef<'_>,
    b: StridedRef<'_>,
    c: StridedRef<'_>,
    shape: &[usize],
    f: impl Fn(f32, f32, f32) -> f32,
) -> Result<(), KernelError> {
    check_dst(op, &dst, shape)?;
    check_src(op, "a", &a, shape)?;
    check_src(op, "b", &b, shape)?;
    check_src(op, "c", &c, shape)?;
    let out = dst.data;
    walk(
        shape,
        [dst.offset, a.offset, b.offset, c.offset],
        [dst.strides, a.strides, b.strides, c.strides],
        |[d, i, j, k]| {
            out[d] = f(a.data[i], b.data[j], c.data[k]);
        },
    );
    Ok(())
}

/// `x[i] = f(x[i], src[i])`, strided, with `x` as both input and output.
pub(crate) fn update_strided(
    op: &'static str,
    x: StridedMut<'_>,
    src: StridedRef<'_>,
    shape: &[usize],
    f: impl Fn(f32, f32) -> f32,
) -> Result<(), KernelError> {
    check_dst(op, &x, shape)?;
    check_src(op, "src", &src, shape)?;
    let out = x.data;
    walk(shape, [x.offset, src.offset], [x.strides, src.strides], |[d, s]| {
        out[d] = f(out[d], src.data[s]);
    });
    Ok(())
}

// ── Unary ──────────────────────────────────────────────────────

/// `dst = op(src)` over `n` contiguous elements.
pub fn unary(op: UnaryOp, dst: &mut [f32], src: &[f32], n: usize) -> Result<(), KernelError> {
    map1("unary", dst, src, n, |x| op.apply(x))
}

/// `dst = op(src)` over a strided `shape`.
pub fn unary_strided(
    op: UnaryOp,
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    map1_strided("unary_strided", dst, src, shape, |x| op.apply(x))
}

/// `x = op(x)` over a strided `shape`.
pub fn unary_in_place(op: UnaryOp, x: StridedMut<'_>, shape: &[usize]) -> Result<(), KernelError> {
    check_dst("unary_in_place", &x, shape)?;
    let out = x.data;
    walk(shape, [x.offset], [x.strides], |[d]| {
        out[d] = op.apply(out[d]);
    });
    Ok(())
}

// ── Binary ─────────────────────────────────────────────────────

/// `dst = a op b` over `n` contiguous elements.
pub fn binary(
    op: BinaryOp,
    dst: &mut [f32],
    a: &[f32],
    b: &[f32],
    n: usize,
) -> Result<(), KernelError> {
    map2("binary", dst, a, b, n, |x, y| op.apply(x, y))
}

/// `dst = a op b` over a strided `shape`; zero strides in `a` or `b`
/// broadcast.
pub fn binary_strided(
    op: BinaryOp,
    dst: StridedMut<'_>,
    a: StridedRef<'_>,
    b: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    map2_strided("binary_strided", dst, a, b, shape, |x, y| op.apply(x, y))
}

/// `dst = dst op b` over a strided `shape`.
pub fn binary_in_place(
    op: BinaryOp,
    dst: StridedMut<'_>,
    b: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    update_strided("binary_in_place", dst, b, shape, |x, y| op.apply(x, y))
}

/// `y += alpha · x` over a strided `shape`.
pub fn axpy_strided(
    y: StridedMut<'_>,
    x: StridedRef<'_>,
    alpha: f32,
    shape: &[usize],
) -> Result<(), KernelError> {
    update_strided("axpy_strided", y, x, shape, |a, b| a + alpha * b)
}

// ── Comparison and selection ───────────────────────────────────

/// `dst = (a op b) ? 1 : 0` over `n` contiguous elements.
pub fn compare(
    op: CompareOp,
    dst: &mut [f32],
    a: &[f32],
    b: &[f32],
    n: usize,
) -> Result<(), KernelError> {
    map2("compare", dst, a, b, n, |x, y| op.apply(x, y))
}

/// Strided form of [`compare`].
pub fn compare_strided(
    op: CompareOp,
    dst: StridedMut<'_>,
    a: StridedRef<'_>,
    b: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    map2_strided("compare_strided", dst, a, b, shape, |x, y| op.apply(x, y))
}

/// `dst = cond > 0 ? a : b` over `n` contiguous elements.
pub fn where_select(
    dst: &mut [f32],
    cond: &[f32],
    a: &[f32],
    b: &[f32],
    n: usize,
) -> Result<(), KernelError> {
    check_len("where", "dst", dst.len(), n)?;
    check_len("where", "cond", cond.len(), n)?;
    check_len("where", "a", a.len(), n)?;
    check_len("where", "b", b.len(), n)?;
    for i in 0..n {
        dst[i] = if cond[i] > 0.0 { a[i] } else { b[i] };
    }
    Ok(())
}

/// Strided form of [`where_select`]; all four operands have independent
/// strides.
pub fn where_strided(
    dst: StridedMut<'_>,
    cond: StridedRef<'_>,
    a: StridedRef<'_>,
    b: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    map3_strided("where_strided", dst, cond, a, b, shape, |c, x, y| {
        if c > 0.0 {
            x
        } else {
            y
        }
    })
}

// ── Copy and fill ──────────────────────────────────────────────

/// `dst = src` over a strided `shape`.
pub fn copy_strided(
    dst: StridedMut<'_>,
    src: StridedRef<'_>,
    shape: &[usize],
) -> Result<(), KernelError> {
    map1_strided("copy_strided", dst, src, shape, |x| x)
}

/// Sets every addressed element of `dst` to `value`.
pub fn fill_strided(dst: StridedMut<'_>, value: f32, shape: &[usize]) -> Result<(), KernelError> {
    check_dst("fill_strided", &dst, shape)?;
    let out = dst.data;
    walk(shape, [dst.offset], [dst.strides], |[d]| out[d] = value);
    Ok(())
}

/// Writes `f()` to every addressed element of `dst`, in row-major logical
/// order regardless of the strides.
pub fn generate_strided(
    dst: StridedMut<'_>,
    shape: &[usize],
    mut f: impl FnMut() -> f32,
) -> Result<(), KernelError> {
    check_dst("generate_strided", &dst, shape)?;
    let out = dst.data;
    walk(shape, [dst.offset], [dst.strides], |[d]| out[d] = f());
    Ok(())
}

/// Sets the elements of `dst` whose `mask` entry is positive to `value`.
pub fn fill_masked_strided(
    dst: StridedMut<'_>,
    mask: StridedRef<'_>,
    value: f32,
    shape: &[usize],
) -> Result<(), KernelError> {
    update_strided("fill_masked_strided", dst, mask, shape, |x, m| {
        if m > 0.0 {
            value
        } else {
            x
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contiguous_strides;

    const S23: &[isize] = &[3, 1];
    const S23_T: &[isize] = &[1, 2];
    const ROW_BCAST: &[isize] = &[0, 1];
    const COL_BCAST: &[isize] = &[1, 0];

    #[test]
    fn test_unary_ops() {
        let src = [-2.0, 0.0, 3.0];
        let mut dst = [0.0; 3];
        unary(UnaryOp::Sign, &mut dst, &src, 3).unwrap();
        assert_eq!(dst, [-1.0, 0.0, 1.0]);
        unary(UnaryOp::Square, &mut dst, &src, 3).unwrap();
        assert_eq!(dst, [4.0, 0.0, 9.0]);
        unary(UnaryOp::Scale(0.5), &mut dst, &src, 3).unwrap();
        assert_eq!(dst, [-1.0, 0.0, 1.5]);
        unary(UnaryOp::SubScalar(1.0), &mut dst, &src, 3).unwrap();
        assert_eq!(dst, [-3.0, -1.0, 2.0]);
        unary(UnaryOp::Pow(2.0), &mut dst, &src, 3).unwrap();
        assert_eq!(dst, [4.0, 0.0, 9.0]);
    }

    #[test]
    fn test_unary_nan_propagates() {
        let mut dst = [0.0; 2];
        unary(UnaryOp::Log, &mut dst, &[-1.0, f32::NAN], 2).unwrap();
        assert!(dst.iter().all(|v| v.is_nan()));
        unary(UnaryOp::Sign, &mut dst, &[f32::NAN, 1.0], 2).unwrap();
        assert!(dst[0].is_nan());
    }

    #[test]
    fn test_binary_contiguous() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let mut dst = [0.0; 3];
        binary(BinaryOp::Sub, &mut dst, &a, &b, 3).unwrap();
        assert_eq!(dst, [-3.0, -3.0, -3.0]);
        binary(BinaryOp::Div, &mut dst, &b, &a, 3).unwrap();
        assert_eq!(dst, [4.0, 2.5, 2.0]);
    }

    #[test]
    fn test_binary_short_dst() {
        let mut dst = [0.0; 2];
        let err = binary(BinaryOp::Add, &mut dst, &[1.0; 3], &[1.0; 3], 3).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_binary_strided_broadcast() {
        // [2, 3] + row [3] + column [2].
        let row = [10.0, 20.0, 30.0];
        let col = [1.0, 2.0];
        let mut dst = [0.0; 6];
        binary_strided(
            BinaryOp::Add,
            StridedMut::new(&mut dst, 0, S23),
            StridedRef::new(&row, 0, ROW_BCAST),
            StridedRef::new(&col, 0, COL_BCAST),
            &[2, 3],
        )
        .unwrap();
        assert_eq!(dst, [11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
    }

    #[test]
    fn test_strided_matches_contiguous_bitwise() {
        // a stored transposed, b contiguous; the result must equal the
        // contiguous computation exactly.
        let a_logical = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6];
        let a_t = [0.1f32, 0.4, 0.2, 0.5, 0.3, 0.6];
        let b = [1.7f32, -2.3, 3.1, 0.9, 1e-3, 7.0];

        let mut expected = [0.0; 6];
        binary(BinaryOp::Mul, &mut expected, &a_logical, &b, 6).unwrap();

        let mut got = [0.0; 6];
        binary_strided(
            BinaryOp::Mul,
            StridedMut::new(&mut got, 0, S23),
            StridedRef::new(&a_t, 0, S23_T),
            StridedRef::new(&b, 0, S23),
            &[2, 3],
        )
        .unwrap();
        assert_eq!(
            expected.map(f32::to_bits),
            got.map(f32::to_bits)
        );
    }

    #[test]
    fn test_broadcast_destination_rejected() {
        let mut dst = [0.0; 3];
        let err = unary_strided(
            UnaryOp::Abs,
            StridedMut::new(&mut dst, 0, COL_BCAST),
            StridedRef::new(&[1.0; 6], 0, S23),
            &[2, 3],
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::UnsupportedCombination { .. }));
    }

    #[test]
    fn test_out_of_bounds_operand_rejected() {
        let mut dst = [0.0; 6];
        let err = unary_strided(
            UnaryOp::Abs,
            StridedMut::new(&mut dst, 0, S23),
            StridedRef::new(&[1.0; 5], 0, S23),
            &[2, 3],
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_compare_and_where() {
        let a = [1.0, 5.0, 3.0];
        let b = [2.0, 5.0, 1.0];
        let mut mask = [0.0; 3];
        compare(CompareOp::Ge, &mut mask, &a, &b, 3).unwrap();
        assert_eq!(mask, [0.0, 1.0, 1.0]);
        compare(CompareOp::Ne, &mut mask, &a, &b, 3).unwrap();
        assert_eq!(mask, [1.0, 0.0, 1.0]);

        let mut dst = [0.0; 3];
        where_select(&mut dst, &mask, &a, &b, 3).unwrap();
        assert_eq!(dst, [1.0, 5.0, 3.0]);
    }

    #[test]
    fn test_where_strided_broadcast_cond() {
        let cond = [1.0, 0.0, 1.0];
        let a = [1.0; 6];
        let b = [-1.0];
        let mut dst = [0.0; 6];
        let scalar: &[isize] = &[0, 0];
        where_strided(
            StridedMut::new(&mut dst, 0, S23),
            StridedRef::new(&cond, 0, ROW_BCAST),
            StridedRef::new(&a, 0, S23),
            StridedRef::new(&b, 0, scalar),
            &[2, 3],
        )
        .unwrap();
        assert_eq!(dst, [1.0, -1.0, 1.0, 1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_in_place_ops() {
        let mut x = [1.0, 2.0, 3.0, 4.0];
        let strides = contiguous_strides(&[4]);
        binary_in_place(
            BinaryOp::Add,
            StridedMut::new(&mut x, 0, &strides),
            StridedRef::new(&[10.0], 0, &[0]),
            &[4],
        )
        .unwrap();
        assert_eq!(x, [11.0, 12.0, 13.0, 14.0]);

        // Negate every other element.
        unary_in_place(UnaryOp::Negate, StridedMut::new(&mut x, 0, &[2]), &[2]).unwrap();
        assert_eq!(x, [-11.0, 12.0, -13.0, 14.0]);
    }

    #[test]
    fn test_copy_and_fill_strided() {
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut dst = [0.0; 6];
        // Transposing copy.
        copy_strided(
            StridedMut::new(&mut dst, 0, S23_T),
            StridedRef::new(&src, 0, S23),
            &[2, 3],
        )
        .unwrap();
        assert_eq!(dst, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        fill_strided(StridedMut::new(&mut dst, 1, &[2]), 0.0, &[2]).unwrap();
        assert_eq!(dst, [1.0, 0.0, 2.0, 0.0, 3.0, 6.0]);

        let mask = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        fill_masked_strided(
            StridedMut::new(&mut dst, 0, &[1]),
            StridedRef::new(&mask, 0, &[1]),
            9.0,
            &[6],
        )
        .unwrap();
        assert_eq!(dst, [9.0, 0.0, 2.0, 0.0, 3.0, 9.0]);
    }
}
