// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication.
//!
//! Row-major operands with any leading dimension go straight to BLAS, and
//! column-major operands (transposed views) go through with the transpose
//! flag flipped. Anything else is staged through a contiguous copy.

use kernels::blas::{self, Transpose};

use crate::access::with_write;
use crate::{Shape, Tensor, TensorError};

/// Leading dimension of a rank-2 tensor and whether its storage is the
/// transpose of a row-major matrix.
fn matrix_layout(t: &Tensor) -> Option<(usize, bool)> {
    let (r, c) = (t.dims()[0], t.dims()[1]);
    let (s0, s1) = (t.strides()[0], t.strides()[1]);
    if (c <= 1 || s1 == 1) && (r <= 1 || s0 >= c.max(1) as isize) {
        let ld = if r <= 1 { c.max(1) } else { s0 as usize };
        return Some((ld, false));
    }
    if (r <= 1 || s0 == 1) && (c <= 1 || s1 >= r.max(1) as isize) {
        let ld = if c <= 1 { r.max(1) } else { s1 as usize };
        return Some((ld, true));
    }
    None
}

/// A matrix operand ready for BLAS: the tensor to read, its leading
/// dimension and the effective transpose flag.
fn matrix_operand<'a>(
    op: &'static str,
    t: &'a Tensor,
    trans: Transpose,
    staged: &'a mut Option<Tensor>,
) -> (&'a Tensor, usize, Transpose) {
    if let Some((ld, flipped)) = matrix_layout(t) {
        let trans = if flipped { trans.flip() } else { trans };
        return (t, ld, trans);
    }
    tracing::warn!(op, shape = %t.shape(), "matrix operand has no BLAS layout; staging through a copy");
    let copy = staged.insert(t.clone());
    let ld = copy.dims()[1].max(1);
    (copy, ld, trans)
}

/// A contiguous operand, copied if needed.
fn contiguous_operand<'a>(op: &'static str, t: &'a Tensor, staged: &'a mut Option<Tensor>) -> &'a Tensor {
    if t.is_contiguous() {
        return t;
    }
    tracing::warn!(op, "operand is strided; staging through a copy");
    staged.insert(t.clone())
}

fn require_rank(op: &'static str, t: &Tensor, rank: usize) -> Result<(), TensorError> {
    if t.rank() == rank {
        Ok(())
    } else {
        Err(TensorError::unsupported(
            op,
            format!("expected a rank-{rank} operand, got {}", t.shape()),
        ))
    }
}

fn op_dims(t: &Tensor, trans: Transpose) -> (usize, usize) {
    let (r, c) = (t.dims()[0], t.dims()[1]);
    match trans {
        Transpose::No => (r, c),
        Transpose::Yes => (c, r),
    }
}

impl Tensor {
    /// `self = alpha · op(a) · op(b) + beta · self` for rank-2 tensors.
    ///
    /// # Errors
    /// [`TensorError::ShapeMismatch`] when the inner dimensions or the
    /// destination shape disagree.
    pub fn gemm(
        &mut self,
        a: &Tensor,
        b: &Tensor,
        trans_a: Transpose,
        trans_b: Transpose,
        alpha: f32,
        beta: f32,
    ) -> Result<&mut Self, TensorError> {
        const OP: &str = "gemm";
        require_rank(OP, a, 2)?;
        require_rank(OP, b, 2)?;
        let (m, k) = op_dims(a, trans_a);
        let (kb, n) = op_dims(b, trans_b);
        if k != kb {
            return Err(TensorError::shape(OP, a.shape(), b.shape()));
        }
        if self.dims() != [m, n] {
            return Err(TensorError::shape(OP, &Shape::matrix(m, n), self.shape()));
        }
        self.check_writable(OP)?;

        let ldc = match matrix_layout(self) {
            Some((ld, false)) => ld,
            _ => {
                tracing::warn!(op = OP, "destination has no row-major layout; staging through a copy");
                let mut tmp = self.clone();
                tmp.gemm(a, b, trans_a, trans_b, alpha, beta)?;
                return self.copy_from(&tmp);
            }
        };
        let (mut stage_a, mut stage_b) = (None, None);
        let (a, lda, ta) = matrix_operand(OP, a, trans_a, &mut stage_a);
        let (b, ldb, tb) = matrix_operand(OP, b, trans_b, &mut stage_b);
        let (oc, oa, ob) = (self.offset(), a.offset(), b.offset());
        with_write(OP, self, [a, b], |out, [x, y]| {
            blas::gemm(ta, tb, &mut out[oc..], &x[oa..], &y[ob..], ldc, lda, ldb, m, n, k, alpha, beta)
        })?;
        Ok(self)
    }

    /// `self = a · b`.
    ///
    /// | `a` | `b` | `self` |
    /// |---|---|---|
    /// | `[m, k]` | `[k, n]` | `[m, n]` |
    /// | `[B, m, k]` | `[B, k, n]` or `[k, n]` | `[B, m, n]` |
    /// | `[m, k]` | `[k]` | `[m]` |
    /// | `[k]` | `[k, n]` | `[n]` |
    /// | `[k]` | `[k]` | `[]` |
    pub fn matmul(&mut self, a: &Tensor, b: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "matmul";
        match (a.rank(), b.rank()) {
            (2, 2) => self.gemm(a, b, Transpose::No, Transpose::No, 1.0, 0.0),
            (3, 2) | (3, 3) => self.batched_matmul(a, b),
            (2, 1) => self.matvec(a, b, Transpose::No),
            (1, 2) => self.matvec(b, a, Transpose::Yes),
            (1, 1) => {
                if a.dims() != b.dims() {
                    return Err(TensorError::shape(OP, a.shape(), b.shape()));
                }
                if self.rank() != 0 {
                    return Err(TensorError::shape(OP, &Shape::scalar(), self.shape()));
                }
                let (mut sa, mut sb) = (None, None);
                let x = contiguous_operand(OP, a, &mut sa);
                let y = contiguous_operand(OP, b, &mut sb);
                let n = x.size();
                let (ox, oy, oc) = (x.offset(), y.offset(), self.offset());
                with_write(OP, self, [x, y], |out, [xs, ys]| {
                    blas::dot(&xs[ox..], &ys[oy..], 1, 1, n).map(|v| out[oc] = v)
                })?;
                Ok(self)
            }
            _ => Err(TensorError::unsupported(
                OP,
                format!("no product for {} · {}", a.shape(), b.shape()),
            )),
        }
    }

    /// `self = op(a) · x` for a rank-2 `a` and rank-1 `x`.
    pub fn matvec(&mut self, a: &Tensor, x: &Tensor, trans: Transpose) -> Result<&mut Self, TensorError> {
        const OP: &str = "matvec";
        require_rank(OP, a, 2)?;
        require_rank(OP, x, 1)?;
        let (rows, cols) = op_dims(a, trans);
        if x.dims()[0] != cols {
            return Err(TensorError::shape(OP, a.shape(), x.shape()));
        }
        if self.dims() != [rows] {
            return Err(TensorError::shape(OP, &Shape::vector(rows), self.shape()));
        }
        self.check_writable(OP)?;
        if !self.is_contiguous() {
            tracing::warn!(op = OP, "destination is strided; staging through a copy");
            let mut tmp = self.zeros_like();
            tmp.matvec(a, x, trans)?;
            return self.copy_from(&tmp);
        }
        let (mut sa, mut sx) = (None, None);
        let (a, lda, ta) = matrix_operand(OP, a, trans, &mut sa);
        let x = contiguous_operand(OP, x, &mut sx);
        // BLAS sees the stored matrix; `ta` says how to apply it.
        let (m, n) = (a.dims()[0], a.dims()[1]);
        let (m, n) = if ta == trans { (m, n) } else { (n, m) };
        let (oy, oa, ox) = (self.offset(), a.offset(), x.offset());
        with_write(OP, self, [a, x], |out, [av, xv]| {
            blas::gemv(ta, &mut out[oy..], &av[oa..], &xv[ox..], lda, m, n, 1.0, 0.0)
        })?;
        Ok(self)
    }

    fn batched_matmul(&mut self, a: &Tensor, b: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "matmul";
        let (batch, m, k) = (a.dims()[0], a.dims()[1], a.dims()[2]);
        let (b_batch, kb, n) = match b.dims() {
            &[bb, kb, n] => (Some(bb), kb, n),
            &[kb, n] => (None, kb, n),
            _ => return Err(TensorError::shape(OP, a.shape(), b.shape())),
        };
        if kb != k || b_batch.is_some_and(|bb| bb != batch) {
            return Err(TensorError::shape(OP, a.shape(), b.shape()));
        }
        if self.dims() != [batch, m, n] {
            return Err(TensorError::shape(OP, &Shape::new(vec![batch, m, n]), self.shape()));
        }
        self.check_writable(OP)?;
        if !self.is_contiguous() {
            tracing::warn!(op = OP, "destination is strided; staging through a copy");
            let mut tmp = self.zeros_like();
            tmp.batched_matmul(a, b)?;
            return self.copy_from(&tmp);
        }
        let (mut sa, mut sb) = (None, None);
        let a = contiguous_operand(OP, a, &mut sa);
        let b = contiguous_operand(OP, b, &mut sb);
        let stride_b = if b_batch.is_some() { k * n } else { 0 };
        let (oc, oa, ob) = (self.offset(), a.offset(), b.offset());
        with_write(OP, self, [a, b], |out, [x, y]| {
            blas::gemm_strided(
                Transpose::No,
                Transpose::No,
                &mut out[oc..],
                &x[oa..],
                &y[ob..],
                n.max(1),
                k.max(1),
                n.max(1),
                m,
                n,
                k,
                1.0,
                0.0,
                batch,
                m * k,
                stride_b,
                m * n,
            )
        })?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], data: &[f32]) -> Tensor {
        Tensor::from_slice(shape, data).unwrap()
    }

    #[test]
    fn test_matmul_2x3_times_3x2() {
        // A = [[1, 2, 3], [4, 5, 6]]
        // B = [[7, 8], [9, 10], [11, 12]]
        // C = [[58, 64], [139, 154]]
        let a = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = t(&[3, 2], &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let mut c = Tensor::zeros([2, 2]);
        c.matmul(&a, &b).unwrap();
        assert_eq!(c.to_vec(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_identity() {
        let a = t(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let eye = t(&[2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let mut c = Tensor::zeros([2, 2]);
        c.matmul(&a, &eye).unwrap();
        assert_eq!(c.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = Tensor::zeros([2, 3]);
        let b = Tensor::zeros([4, 2]);
        let mut c = Tensor::zeros([2, 2]);
        assert!(matches!(c.matmul(&a, &b), Err(TensorError::ShapeMismatch { .. })));

        let b = Tensor::zeros([3, 2]);
        let mut wrong = Tensor::zeros([2, 3]);
        assert!(matches!(wrong.matmul(&a, &b), Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_transposed_views_use_flipped_flags() {
        let a = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = t(&[3, 2], &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        // (Bᵀ)ᵀ viewed as column-major.
        let bt = b.clone().transpose(0, 1).unwrap().clone();
        let b_view = bt.transpose(0, 1).unwrap();
        assert!(!b_view.is_contiguous());
        let mut c = Tensor::zeros([2, 2]);
        c.matmul(&a, &b_view).unwrap();
        assert_eq!(c.to_vec(), vec![58.0, 64.0, 139.0, 154.0]);

        // Cᵀ = Bᵀ · Aᵀ through gemm flags.
        let mut ct = Tensor::zeros([2, 2]);
        ct.gemm(&b, &a, Transpose::Yes, Transpose::Yes, 1.0, 0.0).unwrap();
        assert_eq!(ct.to_vec(), vec![58.0, 139.0, 64.0, 154.0]);
    }

    #[test]
    fn test_gemm_accumulates_with_beta() {
        let a = t(&[1, 1], &[2.0]);
        let b = t(&[1, 1], &[3.0]);
        let mut c = t(&[1, 1], &[1.0]);
        c.gemm(&a, &b, Transpose::No, Transpose::No, 1.0, 1.0).unwrap();
        assert_eq!(c.to_vec(), vec![7.0]);
    }

    #[test]
    fn test_strided_operand_is_staged() {
        let a = t(&[2, 4], &[1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0]);
        let a_even = a.slice_step(1, 0, 4, 2).unwrap();
        let eye = t(&[2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let mut c = Tensor::zeros([2, 2]);
        c.matmul(&a_even, &eye).unwrap();
        assert_eq!(c.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_vector_products() {
        let a = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let x = t(&[3], &[1.0, 0.0, -1.0]);
        let mut y = Tensor::zeros([2]);
        y.matmul(&a, &x).unwrap();
        assert_eq!(y.to_vec(), vec![-2.0, -2.0]);

        let v = t(&[2], &[1.0, 1.0]);
        let mut z = Tensor::zeros([3]);
        z.matmul(&v, &a).unwrap();
        assert_eq!(z.to_vec(), vec![5.0, 7.0, 9.0]);

        let mut d = Tensor::scalar(0.0);
        d.matmul(&x, &x).unwrap();
        assert_eq!(d.at(&[]).unwrap(), 2.0);
    }

    #[test]
    fn test_batched_matmul_with_shared_rhs() {
        let a = t(&[2, 1, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = t(&[2, 1], &[10.0, 1.0]);
        let mut c = Tensor::zeros([2, 1, 1]);
        c.matmul(&a, &b).unwrap();
        assert_eq!(c.to_vec(), vec![12.0, 34.0]);
    }
}
