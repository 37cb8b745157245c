// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise math with broadcasting.
//!
//! Out-of-place ops write into `self`, whose shape must equal the
//! broadcast of the operand shapes. When every operand is contiguous with
//! the destination's shape, the contiguous kernel runs; otherwise the
//! strided walker does. Both apply the same scalar function in the same
//! order, so the two paths agree bit for bit.

use kernels::elementwise::{self as ew, BinaryOp, CompareOp, UnaryOp};
use kernels::StridedRef;

use crate::access::with_write;
use crate::{Shape, Tensor, TensorError};

/// Checks that `dst` is exactly the broadcast shape of `operands`.
pub(crate) fn check_broadcast_dst(
    op: &'static str,
    dst: &Shape,
    operands: &[&Tensor],
) -> Result<(), TensorError> {
    let rank = operands.iter().map(|t| t.rank()).max().unwrap_or(0);
    let first = operands.first().map_or(dst, |t| t.shape());
    if dst.rank() != rank {
        return Err(TensorError::shape(op, first, dst));
    }
    for (axis, &extent) in dst.dims().iter().enumerate() {
        let mut expected = 1;
        for t in operands {
            let lead = rank - t.rank();
            if axis < lead {
                continue;
            }
            let e = t.dims()[axis - lead];
            if e == 1 {
                continue;
            }
            if expected != 1 && expected != e {
                return Err(TensorError::shape(op, first, t.shape()));
            }
            expected = e;
        }
        if extent != expected {
            return Err(TensorError::shape(op, first, dst));
        }
    }
    Ok(())
}

impl Tensor {
    // ── Generic drivers ────────────────────────────────────────

    /// `self = op(src)`; shapes must match.
    pub fn unary(&mut self, op: UnaryOp, src: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "unary";
        self.check_same_shape(OP, src)?;
        self.check_writable(OP)?;
        if let (Some(d), Some(s)) = (self.contiguous_range(), src.contiguous_range()) {
            let n = self.size();
            with_write(OP, self, [src], |out, [x]| ew::unary(op, &mut out[d], &x[s], n))?;
            return Ok(self);
        }
        with_write(OP, self, [src], |out, [x]| {
            ew::unary_strided(op, self.strided_mut(out), src.strided(x), self.dims())
        })?;
        Ok(self)
    }

    /// `self = a op b` with broadcasting.
    pub fn binary(&mut self, op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "binary";
        self.check_writable(OP)?;
        check_broadcast_dst(OP, self.shape(), &[a, b])?;
        if let Some((d, ra, rb)) = self.contiguous_triple(a, b) {
            let n = self.size();
            with_write(OP, self, [a, b], |out, [x, y]| {
                ew::binary(op, &mut out[d], &x[ra], &y[rb], n)
            })?;
            return Ok(self);
        }
        let rank = self.rank();
        let sa = a.broadcast_strides(OP, self.shape())?;
        let sb = b.broadcast_strides(OP, self.shape())?;
        with_write(OP, self, [a, b], |out, [x, y]| {
            ew::binary_strided(
                op,
                self.strided_mut(out),
                StridedRef::new(x, a.offset(), &sa[..rank]),
                StridedRef::new(y, b.offset(), &sb[..rank]),
                self.dims(),
            )
        })?;
        Ok(self)
    }

    /// `self = (a op b) ? 1 : 0` with broadcasting.
    pub fn compare(&mut self, op: CompareOp, a: &Tensor, b: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "compare";
        self.check_writable(OP)?;
        check_broadcast_dst(OP, self.shape(), &[a, b])?;
        if let Some((d, ra, rb)) = self.contiguous_triple(a, b) {
            let n = self.size();
            with_write(OP, self, [a, b], |out, [x, y]| {
                ew::compare(op, &mut out[d], &x[ra], &y[rb], n)
            })?;
            return Ok(self);
        }
        let rank = self.rank();
        let sa = a.broadcast_strides(OP, self.shape())?;
        let sb = b.broadcast_strides(OP, self.shape())?;
        with_write(OP, self, [a, b], |out, [x, y]| {
            ew::compare_strided(
                op,
                self.strided_mut(out),
                StridedRef::new(x, a.offset(), &sa[..rank]),
                StridedRef::new(y, b.offset(), &sb[..rank]),
                self.dims(),
            )
        })?;
        Ok(self)
    }

    /// `self = cond > 0 ? a : b`; all three operands broadcast.
    pub fn where_select(&mut self, cond: &Tensor, a: &Tensor, b: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "where";
        self.check_writable(OP)?;
        check_broadcast_dst(OP, self.shape(), &[cond, a, b])?;
        let rank = self.rank();
        let sc = cond.broadcast_strides(OP, self.shape())?;
        let sa = a.broadcast_strides(OP, self.shape())?;
        let sb = b.broadcast_strides(OP, self.shape())?;
        with_write(OP, self, [cond, a, b], |out, [c, x, y]| {
            ew::where_strided(
                self.strided_mut(out),
                StridedRef::new(c, cond.offset(), &sc[..rank]),
                StridedRef::new(x, a.offset(), &sa[..rank]),
                StridedRef::new(y, b.offset(), &sb[..rank]),
                self.dims(),
            )
        })?;
        Ok(self)
    }

    fn contiguous_triple(
        &self,
        a: &Tensor,
        b: &Tensor,
    ) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>, std::ops::Range<usize>)> {
        if a.shape() != self.shape() || b.shape() != self.shape() {
            return None;
        }
        Some((
            self.contiguous_range()?,
            a.contiguous_range()?,
            b.contiguous_range()?,
        ))
    }

    // ── In place ───────────────────────────────────────────────

    /// `self = op(self)`.
    pub fn map_(&mut self, op: UnaryOp) -> Result<&mut Self, TensorError> {
        self.check_writable("map_")?;
        {
            let mut out = self.write_storage();
            ew::unary_in_place(op, self.strided_mut(&mut out), self.dims())?;
        }
        Ok(self)
    }

    /// `self = self op b`, with `b` broadcast to `self`.
    pub fn zip_(&mut self, op: BinaryOp, b: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "zip_";
        self.check_writable(OP)?;
        let rank = self.rank();
        let sb = b.broadcast_strides(OP, self.shape())?;
        with_write(OP, self, [b], |out, [y]| {
            ew::binary_in_place(
                op,
                self.strided_mut(out),
                StridedRef::new(y, b.offset(), &sb[..rank]),
                self.dims(),
            )
        })?;
        Ok(self)
    }

    /// `self += alpha · x`, with `x` broadcast to `self`.
    pub fn axpy_(&mut self, alpha: f32, x: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "axpy_";
        self.check_writable(OP)?;
        let rank = self.rank();
        let sx = x.broadcast_strides(OP, self.shape())?;
        with_write(OP, self, [x], |out, [data]| {
            ew::axpy_strided(
                self.strided_mut(out),
                StridedRef::new(data, x.offset(), &sx[..rank]),
                alpha,
                self.dims(),
            )
        })?;
        Ok(self)
    }

    pub fn add_(&mut self, b: &Tensor) -> Result<&mut Self, TensorError> {
        self.zip_(BinaryOp::Add, b)
    }

    pub fn sub_(&mut self, b: &Tensor) -> Result<&mut Self, TensorError> {
        self.zip_(BinaryOp::Sub, b)
    }

    pub fn mul_(&mut self, b: &Tensor) -> Result<&mut Self, TensorError> {
        self.zip_(BinaryOp::Mul, b)
    }

    pub fn div_(&mut self, b: &Tensor) -> Result<&mut Self, TensorError> {
        self.zip_(BinaryOp::Div, b)
    }

    pub fn scale_(&mut self, s: f32) -> Result<&mut Self, TensorError> {
        self.map_(UnaryOp::Scale(s))
    }

    pub fn add_scalar_(&mut self, s: f32) -> Result<&mut Self, TensorError> {
        self.map_(UnaryOp::AddScalar(s))
    }

    pub fn exp_(&mut self) -> Result<&mut Self, TensorError> {
        self.map_(UnaryOp::Exp)
    }

    pub fn neg_(&mut self) -> Result<&mut Self, TensorError> {
        self.map_(UnaryOp::Negate)
    }

    pub fn clamp_(&mut self, min: f32, max: f32) -> Result<&mut Self, TensorError> {
        self.map_(UnaryOp::Clamp { min, max })
    }

    // ── Scalar-fused ───────────────────────────────────────────

    pub fn add_scalar(&mut self, src: &Tensor, s: f32) -> Result<&mut Self, TensorError> {
        self.unary(UnaryOp::AddScalar(s), src)
    }

    pub fn sub_scalar(&mut self, src: &Tensor, s: f32) -> Result<&mut Self, TensorError> {
        self.unary(UnaryOp::SubScalar(s), src)
    }

    /// `self = src · s`.
    pub fn scale(&mut self, src: &Tensor, s: f32) -> Result<&mut Self, TensorError> {
        self.unary(UnaryOp::Scale(s), src)
    }

    pub fn div_scalar(&mut self, src: &Tensor, s: f32) -> Result<&mut Self, TensorError> {
        self.unary(UnaryOp::DivScalar(s), src)
    }

    pub fn clamp(&mut self, src: &Tensor, min: f32, max: f32) -> Result<&mut Self, TensorError> {
        self.unary(UnaryOp::Clamp { min, max }, src)
    }

    pub fn pow(&mut self, src: &Tensor, p: f32) -> Result<&mut Self, TensorError> {
        self.unary(UnaryOp::Pow(p), src)
    }
}

macro_rules! unary_ops {
    ($($name:ident => $op:ident),* $(,)?) => {
        impl Tensor {
            $(
                #[doc = concat!("`self = ", stringify!($name), "(src)`.")]
                pub fn $name(&mut self, src: &Tensor) -> Result<&mut Self, TensorError> {
                    self.unary(UnaryOp::$op, src)
                }
            )*
        }
    };
}

macro_rules! binary_ops {
    (@call $self:ident, BinaryOp, $op:ident, $a:ident, $b:ident) => {
        $self.binary(BinaryOp::$op, $a, $b)
    };
    (@call $self:ident, CompareOp, $op:ident, $a:ident, $b:ident) => {
        $self.compare(CompareOp::$op, $a, $b)
    };
    ($($name:ident => $kind:ident :: $op:ident),* $(,)?) => {
        impl Tensor {
            $(
                #[doc = concat!("`self = ", stringify!($name), "(a, b)` with broadcasting.")]
                pub fn $name(&mut self, a: &Tensor, b: &Tensor) -> Result<&mut Self, TensorError> {
                    binary_ops!(@call self, $kind, $op, a, b)
                }
            )*
        }
    };
}

unary_ops! {
    exp => Exp,
    log => Log,
    sqrt => Sqrt,
    abs => Abs,
    sign => Sign,
    sin => Sin,
    cos => Cos,
    tanh => Tanh,
    negate => Negate,
    square => Square,
    reciprocal => Reciprocal,
}

binary_ops! {
    add => BinaryOp::Add,
    sub => BinaryOp::Sub,
    mul => BinaryOp::Mul,
    div => BinaryOp::Div,
    maximum => BinaryOp::Maximum,
    minimum => BinaryOp::Minimum,
    lt => CompareOp::Lt,
    le => CompareOp::Le,
    eq => CompareOp::Eq,
    ne => CompareOp::Ne,
    gt => CompareOp::Gt,
    ge => CompareOp::Ge,
}
