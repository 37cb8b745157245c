// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type: shared storage, views and element access.

use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use kernels::elementwise::{copy_strided, fill_masked_strided, fill_strided};
use kernels::{StridedMut, StridedRef, MAX_RANK};

use crate::access::{with_read, with_write};
use crate::{DType, Shape, TensorError};

/// An n-dimensional FP32 tensor over a reference-counted buffer.
///
/// A tensor is the tuple (storage, shape, strides, offset, dtype). Element
/// `(i0, …, i_{r-1})` lives at `offset + Σ ik · strides[k]`. Views created
/// with [`view`](Tensor::view), [`slice`](Tensor::slice),
/// [`transpose`](Tensor::transpose) and friends share the storage and keep
/// it alive until the last one is dropped.
///
/// `Clone` is a deep copy into a fresh contiguous buffer; use
/// [`view`](Tensor::view) for a shallow handle.
///
/// # Writes
/// A tensor is writable only when no axis of extent > 1 has stride 0.
/// Writing through a broadcast view fails with
/// [`TensorError::UnsupportedOperation`]. Shared writes through distinct
/// views of the same storage are the caller's responsibility to coordinate.
pub struct Tensor {
    storage: Arc<RwLock<Vec<f32>>>,
    shape: Shape,
    strides: Vec<isize>,
    offset: usize,
    dtype: DType,
}

impl Tensor {
    // ── Construction ───────────────────────────────────────────

    /// Allocates a zeroed contiguous tensor.
    ///
    /// # Errors
    /// Returns [`TensorError::UnsupportedDType`] for anything but `F32`.
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Result<Self, TensorError> {
        if !dtype.is_supported() {
            return Err(TensorError::UnsupportedDType { op: "new", dtype });
        }
        Ok(Self::zeros(shape))
    }

    /// Creates a new FP32 tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::zeros(Shape::matrix(2, 3));
    /// assert_eq!(t.size(), 6);
    /// assert!(t.is_contiguous());
    /// ```
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Creates a contiguous tensor with every element set to `value`.
    pub fn full(shape: impl Into<Shape>, value: f32) -> Self {
        let shape = shape.into();
        let data = vec![value; shape.num_elements()];
        Self::wrap(shape, data)
    }

    /// Takes ownership of `data` as a contiguous row-major buffer. No copy.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_data(Shape::vector(3), vec![1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_data(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self, TensorError> {
        let shape = shape.into();
        if data.len() != shape.num_elements() {
            return Err(TensorError::BufferSizeMismatch {
                expected: shape.num_elements(),
                actual: data.len(),
            });
        }
        Ok(Self::wrap(shape, data))
    }

    /// Copies `values` into a new contiguous tensor.
    pub fn from_slice(shape: impl Into<Shape>, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_data(shape, values.to_vec())
    }

    /// A rank-0 tensor holding `value`.
    pub fn scalar(value: f32) -> Self {
        Self::wrap(Shape::scalar(), vec![value])
    }

    fn wrap(shape: Shape, data: Vec<f32>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(data)),
            strides: shape.contiguous_strides(),
            shape,
            offset: 0,
            dtype: DType::F32,
        }
    }

    /// Wraps `data` with an explicit layout, checking that every logical
    /// index lands inside the buffer.
    pub(crate) fn from_layout(
        op: &'static str,
        data: Vec<f32>,
        shape: Shape,
        strides: Vec<isize>,
        offset: usize,
    ) -> Result<Self, TensorError> {
        if strides.len() != shape.rank() {
            return Err(TensorError::unsupported(
                op,
                format!("{} strides for a rank-{} shape", strides.len(), shape.rank()),
            ));
        }
        if shape.num_elements() > 0 {
            let (mut lo, mut hi) = (offset as i128, offset as i128);
            for (&d, &s) in shape.dims().iter().zip(&strides) {
                let reach = (d as i128 - 1) * s as i128;
                if reach < 0 {
                    lo += reach;
                } else {
                    hi += reach;
                }
            }
            if lo < 0 || hi >= data.len() as i128 {
                return Err(TensorError::IndexOutOfRange {
                    op,
                    index: hi.max(0) as usize,
                    bound: data.len(),
                });
            }
        }
        Ok(Self {
            storage: Arc::new(RwLock::new(data)),
            shape,
            strides,
            offset,
            dtype: DType::F32,
        })
    }

    /// New zeroed contiguous tensor with the same shape and dtype.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }

    pub fn ones_like(&self) -> Self {
        Self::full(self.shape.clone(), 1.0)
    }

    pub fn full_like(&self, value: f32) -> Self {
        Self::full(self.shape.clone(), value)
    }

    // ── Metadata ───────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Element strides, one per axis; may be zero or negative.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Position of the first logical element in the storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Number of logical elements.
    pub fn size(&self) -> usize {
        self.shape.num_elements()
    }

    /// Whether the strides are row-major for the shape. Axes of extent 1
    /// may carry any stride.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1isize;
        for (&d, &s) in self.dims().iter().zip(&self.strides).rev() {
            if d != 1 && s != expected {
                return false;
            }
            expected *= d as isize;
        }
        true
    }

    /// Whether every logical index maps to a distinct element.
    pub fn is_writable(&self) -> bool {
        self.dims()
            .iter()
            .zip(&self.strides)
            .all(|(&d, &s)| d <= 1 || s != 0)
    }

    /// Whether both tensors view the same storage.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Length of the underlying storage, which may exceed [`size`](Self::size).
    pub fn storage_len(&self) -> usize {
        self.read_storage().len()
    }

    pub(crate) fn check_writable(&self, op: &'static str) -> Result<(), TensorError> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(TensorError::unsupported(op, "destination is a broadcast view"))
        }
    }

    pub(crate) fn check_same_shape(&self, op: &'static str, other: &Tensor) -> Result<(), TensorError> {
        if self.shape == other.shape {
            Ok(())
        } else {
            Err(TensorError::shape(op, &self.shape, &other.shape))
        }
    }

    // ── Storage access ─────────────────────────────────────────

    pub(crate) fn read_storage(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_storage(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn strided<'a>(&'a self, data: &'a [f32]) -> StridedRef<'a> {
        StridedRef::new(data, self.offset, &self.strides)
    }

    pub(crate) fn strided_mut<'a>(&'a self, data: &'a mut [f32]) -> StridedMut<'a> {
        StridedMut::new(data, self.offset, &self.strides)
    }

    /// Storage range of a contiguous tensor.
    pub(crate) fn contiguous_range(&self) -> Option<Range<usize>> {
        self.is_contiguous()
            .then(|| self.offset..self.offset + self.size())
    }

    /// Read access to the elements of a contiguous tensor, in row-major order.
    ///
    /// # Errors
    /// Returns [`TensorError::UnsupportedOperation`] for a non-contiguous view.
    pub fn data(&self) -> Result<TensorRead<'_>, TensorError> {
        let range = self
            .contiguous_range()
            .ok_or_else(|| TensorError::unsupported("data", "tensor is not contiguous"))?;
        Ok(TensorRead {
            guard: self.read_storage(),
            range,
        })
    }

    /// Write access to the elements of a contiguous tensor.
    pub fn data_mut(&mut self) -> Result<TensorWrite<'_>, TensorError> {
        let range = self
            .contiguous_range()
            .ok_or_else(|| TensorError::unsupported("data_mut", "tensor is not contiguous"))?;
        Ok(TensorWrite {
            guard: self.write_storage(),
            range,
        })
    }

    /// Logical contents in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.size()];
        let strides = self.shape.contiguous_strides();
        with_read([self], |[src]| {
            copy_strided(
                StridedMut::new(&mut out, 0, &strides),
                self.strided(src),
                self.dims(),
            )
        })
        .map(|()| out)
        .unwrap_or_default()
    }

    // ── Views ──────────────────────────────────────────────────

    /// A new handle on the same storage, shape and strides.
    pub fn view(&self) -> Tensor {
        Tensor {
            storage: Arc::clone(&self.storage),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
            dtype: self.dtype,
        }
    }

    /// Turns `self` into a view of `other`, reusing the metadata buffers.
    pub fn rebind(&mut self, other: &Tensor) {
        if !Arc::ptr_eq(&self.storage, &other.storage) {
            self.storage = Arc::clone(&other.storage);
        }
        self.shape.assign(&other.shape);
        self.strides.clone_from(&other.strides);
        self.offset = other.offset;
        self.dtype = other.dtype;
    }

    fn with_layout(&self, shape: Shape, strides: Vec<isize>, offset: usize) -> Tensor {
        Tensor {
            storage: Arc::clone(&self.storage),
            shape,
            strides,
            offset,
            dtype: self.dtype,
        }
    }

    /// A view with a new shape of the same size.
    ///
    /// Succeeds for contiguous tensors and for views whose strides can
    /// express the new shape without a copy.
    ///
    /// # Errors
    /// [`TensorError::NonReshapable`] when a copy would be needed; use
    /// [`reshape_into`](Self::reshape_into) with a destination instead.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor, TensorError> {
        let shape = shape.into();
        if shape.num_elements() != self.size() {
            return Err(TensorError::NonReshapable {
                from: self.shape.clone(),
                to: shape,
            });
        }
        let strides = if self.is_contiguous() {
            Some(shape.contiguous_strides())
        } else {
            reshape_strides(self.dims(), &self.strides, shape.dims())
        };
        match strides {
            Some(strides) => Ok(self.with_layout(shape, strides, self.offset)),
            None => Err(TensorError::NonReshapable {
                from: self.shape.clone(),
                to: shape,
            }),
        }
    }

    /// Copies the row-major contents of `self` into `dst`, whose shape may
    /// differ as long as the element count matches. Works for any strides.
    pub fn reshape_into(&self, dst: &mut Tensor) -> Result<(), TensorError> {
        const OP: &str = "reshape_into";
        if dst.size() != self.size() {
            return Err(TensorError::shape(OP, &self.shape, &dst.shape));
        }
        dst.check_writable(OP)?;
        if let Ok(src) = self.reshape(dst.shape.clone()) {
            return dst.copy_from(&src).map(|_| ());
        }
        if let Ok(dst_view) = dst.reshape(self.shape.clone()) {
            let mut dst_view = dst_view;
            return dst_view.copy_from(self).map(|_| ());
        }
        tracing::warn!(op = OP, "neither side can be re-viewed; staging through a copy");
        let staged = Tensor::wrap(dst.shape.clone(), self.to_vec());
        dst.copy_from(&staged).map(|_| ())
    }

    /// Narrows `axis` to `[start, end)`.
    pub fn slice(&self, axis: usize, start: usize, end: usize) -> Result<Tensor, TensorError> {
        self.slice_step(axis, start, end, 1)
    }

    /// Narrows `axis` to every `step`-th index of `[start, end)`.
    ///
    /// # Errors
    /// [`TensorError::IndexOutOfRange`] for a bad axis, `end` beyond the
    /// extent, `start > end`, or a zero step.
    pub fn slice_step(
        &self,
        axis: usize,
        start: usize,
        end: usize,
        step: usize,
    ) -> Result<Tensor, TensorError> {
        const OP: &str = "slice";
        let extent = self.shape.dim(axis).ok_or(TensorError::IndexOutOfRange {
            op: OP,
            index: axis,
            bound: self.rank(),
        })?;
        if end > extent {
            return Err(TensorError::IndexOutOfRange {
                op: OP,
                index: end,
                bound: extent,
            });
        }
        if start > end || step == 0 {
            return Err(TensorError::IndexOutOfRange {
                op: OP,
                index: start,
                bound: end,
            });
        }
        let len = (end - start).div_ceil(step);
        let mut strides = self.strides.clone();
        let offset = if len == 0 {
            self.offset
        } else {
            (self.offset as isize + start as isize * strides[axis]) as usize
        };
        strides[axis] *= step as isize;
        Ok(self.with_layout(self.shape.with_dim(axis, len), strides, offset))
    }

    /// Swaps two axes.
    pub fn transpose(&self, a: usize, b: usize) -> Result<Tensor, TensorError> {
        let rank = self.rank();
        for axis in [a, b] {
            if axis >= rank {
                return Err(TensorError::IndexOutOfRange {
                    op: "transpose",
                    index: axis,
                    bound: rank,
                });
            }
        }
        let mut dims = self.dims().to_vec();
        let mut strides = self.strides.clone();
        dims.swap(a, b);
        strides.swap(a, b);
        Ok(self.with_layout(Shape::new(dims), strides, self.offset))
    }

    /// Reorders axes: axis `i` of the result is axis `order[i]` of `self`.
    pub fn permute(&self, order: &[usize]) -> Result<Tensor, TensorError> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        for &axis in order {
            if axis >= rank || seen[axis] {
                return Err(TensorError::IndexOutOfRange {
                    op: "permute",
                    index: axis,
                    bound: rank,
                });
            }
            seen[axis] = true;
        }
        if order.len() != rank {
            return Err(TensorError::IndexOutOfRange {
                op: "permute",
                index: order.len(),
                bound: rank,
            });
        }
        let dims = order.iter().map(|&a| self.dims()[a]).collect();
        let strides = order.iter().map(|&a| self.strides[a]).collect();
        Ok(self.with_layout(Shape::new(dims), strides, self.offset))
    }

    /// Reverses `axis` with a negative stride.
    pub fn flip(&self, axis: usize) -> Result<Tensor, TensorError> {
        let extent = self.shape.dim(axis).ok_or(TensorError::IndexOutOfRange {
            op: "flip",
            index: axis,
            bound: self.rank(),
        })?;
        let mut strides = self.strides.clone();
        let offset = if extent == 0 {
            self.offset
        } else {
            (self.offset as isize + (extent as isize - 1) * strides[axis]) as usize
        };
        strides[axis] = -strides[axis];
        Ok(self.with_layout(self.shape.clone(), strides, offset))
    }

    /// A read-only view repeating axes of extent 1 (stride 0) up to
    /// `target`, with leading axes added as needed.
    pub fn broadcast_to(&self, target: impl Into<Shape>) -> Result<Tensor, TensorError> {
        let target = target.into();
        let strides = self.broadcast_strides("broadcast_to", &target)?;
        Ok(self.with_layout(target.clone(), strides[..target.rank()].to_vec(), self.offset))
    }

    /// Strides that read `self` as if it had shape `target`.
    pub(crate) fn broadcast_strides(
        &self,
        op: &'static str,
        target: &Shape,
    ) -> Result<[isize; MAX_RANK], TensorError> {
        let (rank, trank) = (self.rank(), target.rank());
        if trank > MAX_RANK {
            return Err(TensorError::unsupported(op, format!("rank {trank} exceeds {MAX_RANK}")));
        }
        if rank > trank {
            return Err(TensorError::shape(op, &self.shape, target));
        }
        let lead = trank - rank;
        let mut out = [0isize; MAX_RANK];
        for (i, &t) in target.dims().iter().enumerate() {
            if i < lead {
                continue;
            }
            let d = self.dims()[i - lead];
            out[i] = if d == t {
                self.strides[i - lead]
            } else if d == 1 {
                0
            } else {
                return Err(TensorError::shape(op, &self.shape, target));
            };
        }
        Ok(out)
    }

    // ── Element access ─────────────────────────────────────────

    fn element_offset(&self, op: &'static str, index: &[usize]) -> Result<usize, TensorError> {
        if index.len() != self.rank() {
            return Err(TensorError::IndexOutOfRange {
                op,
                index: index.len(),
                bound: self.rank(),
            });
        }
        let mut pos = self.offset as isize;
        for ((&i, &d), &s) in index.iter().zip(self.dims()).zip(&self.strides) {
            if i >= d {
                return Err(TensorError::IndexOutOfRange { op, index: i, bound: d });
            }
            pos += i as isize * s;
        }
        Ok(pos as usize)
    }

    /// Reads one element.
    pub fn at(&self, index: &[usize]) -> Result<f32, TensorError> {
        let pos = self.element_offset("at", index)?;
        Ok(self.read_storage()[pos])
    }

    /// Writes one element.
    pub fn set_at(&mut self, value: f32, index: &[usize]) -> Result<(), TensorError> {
        self.check_writable("set_at")?;
        let pos = self.element_offset("set_at", index)?;
        self.write_storage()[pos] = value;
        Ok(())
    }

    // ── Bulk writes ────────────────────────────────────────────

    /// Copies `src` element-wise; shapes must match exactly.
    pub fn copy_from(&mut self, src: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "copy_from";
        self.check_same_shape(OP, src)?;
        self.check_writable(OP)?;
        if let (Some(d), Some(s)) = (self.contiguous_range(), src.contiguous_range()) {
            if !self.shares_storage(src) {
                with_write(OP, self, [src], |out, [data]| {
                    out[d].copy_from_slice(&data[s]);
                });
                return Ok(self);
            }
        }
        with_write(OP, self, [src], |out, [data]| {
            copy_strided(self.strided_mut(out), src.strided(data), self.dims())
        })?;
        Ok(self)
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: f32) -> Result<&mut Self, TensorError> {
        self.check_writable("fill")?;
        {
            let mut out = self.write_storage();
            fill_strided(self.strided_mut(&mut out), value, self.dims())?;
        }
        Ok(self)
    }

    /// Sets the elements whose `mask` entry is positive to `value`. The
    /// mask broadcasts to `self`.
    pub fn fill_masked(&mut self, value: f32, mask: &Tensor) -> Result<&mut Self, TensorError> {
        const OP: &str = "fill_masked";
        self.check_writable(OP)?;
        let mstrides = mask.broadcast_strides(OP, &self.shape)?;
        with_write(OP, self, [mask], |out, [m]| {
            fill_masked_strided(
                self.strided_mut(out),
                StridedRef::new(m, mask.offset, &mstrides[..self.rank()]),
                value,
                self.dims(),
            )
        })?;
        Ok(self)
    }

    /// A contiguous handle: a view when already contiguous, otherwise a copy.
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() {
            self.view()
        } else {
            self.clone()
        }
    }
}

/// Deep copy into a fresh contiguous buffer.
impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor::wrap(self.shape.clone(), self.to_vec())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

/// Strides expressing `new` over the elements addressed by (`dims`,
/// `strides`) in row-major order, if possible without a copy.
fn reshape_strides(dims: &[usize], strides: &[isize], new: &[usize]) -> Option<Vec<isize>> {
    if new.iter().product::<usize>() == 0 {
        return Some(kernels::contiguous_strides(new));
    }
    let (od, os): (Vec<usize>, Vec<isize>) = dims
        .iter()
        .zip(strides)
        .filter(|(&d, _)| d != 1)
        .map(|(&d, &s)| (d, s))
        .unzip();
    let mut ns = vec![1isize; new.len()];
    let (mut oi, mut oj, mut ni, mut nj) = (0, 1, 0, 1);
    while ni < new.len() && oi < od.len() {
        let (mut np, mut op) = (new[ni], od[oi]);
        while np != op {
            if np < op {
                np *= *new.get(nj)?;
                nj += 1;
            } else {
                op *= *od.get(oj)?;
                oj += 1;
            }
        }
        for k in oi..oj - 1 {
            if os[k] != os[k + 1] * od[k + 1] as isize {
                return None;
            }
        }
        ns[nj - 1] = os[oj - 1];
        for k in (ni + 1..nj).rev() {
            ns[k - 1] = ns[k] * new[k] as isize;
        }
        ni = nj;
        nj += 1;
        oi = oj;
        oj += 1;
    }
    Some(ns)
}

/// Read guard over a contiguous tensor's elements.
pub struct TensorRead<'a> {
    guard: RwLockReadGuard<'a, Vec<f32>>,
    range: Range<usize>,
}

impl Deref for TensorRead<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard[self.range.clone()]
    }
}

/// Write guard over a contiguous tensor's elements.
pub struct TensorWrite<'a> {
    guard: RwLockWriteGuard<'a, Vec<f32>>,
    range: Range<usize>,
}

impl Deref for TensorWrite<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard[self.range.clone()]
    }
}

impl DerefMut for TensorWrite<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.guard[self.range.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(shape: impl Into<Shape>) -> Tensor {
        let shape = shape.into();
        let data = (0..shape.num_elements()).map(|v| v as f32).collect();
        Tensor::from_data(shape, data).unwrap()
    }

    #[test]
    fn test_zeros_and_from_data() {
        let t = Tensor::zeros(Shape::matrix(2, 3));
        assert_eq!(t.dtype(), DType::F32);
        assert!(t.to_vec().iter().all(|&x| x == 0.0));

        let err = Tensor::from_data(Shape::matrix(2, 3), vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, TensorError::BufferSizeMismatch { expected: 6, actual: 5 }));
        assert!(matches!(
            Tensor::new(DType::BF16, [2]),
            Err(TensorError::UnsupportedDType { .. })
        ));
    }

    #[test]
    fn test_scalar() {
        let s = Tensor::scalar(4.5);
        assert_eq!(s.rank(), 0);
        assert_eq!(s.size(), 1);
        assert_eq!(s.at(&[]).unwrap(), 4.5);
    }

    #[test]
    fn test_view_shares_storage() {
        let t = iota([2, 2]);
        let mut v = t.view();
        v.set_at(9.0, &[1, 0]).unwrap();
        assert_eq!(t.at(&[1, 0]).unwrap(), 9.0);
        assert!(v.shares_storage(&t));
    }

    #[test]
    fn test_clone_is_deep_and_contiguous() {
        let t = iota([2, 3]).transpose(0, 1).unwrap();
        assert!(!t.is_contiguous());
        let c = t.clone();
        assert!(c.is_contiguous());
        assert!(!c.shares_storage(&t));
        assert_eq!(c.to_vec(), t.to_vec());
        assert_eq!(c.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_reshape_round_trip() {
        let t = iota([2, 3, 4]);
        let r = t.reshape([6, 4]).unwrap().reshape([2, 3, 4]).unwrap();
        assert_eq!(r.to_vec(), t.to_vec());
        assert!(matches!(
            t.reshape([5, 5]),
            Err(TensorError::NonReshapable { .. })
        ));
    }

    #[test]
    fn test_reshape_of_strided_view() {
        // Slicing rows keeps rows contiguous internally, so merging the
        // trailing axes is expressible.
        let t = iota([4, 2, 3]);
        let s = t.slice_step(0, 0, 4, 2).unwrap();
        let r = s.reshape([2, 6]).unwrap();
        assert_eq!(r.to_vec(), s.to_vec());

        // A transposed matrix cannot be flattened without a copy.
        let tt = iota([2, 3]).transpose(0, 1).unwrap();
        assert!(matches!(
            tt.reshape([6]),
            Err(TensorError::NonReshapable { .. })
        ));
        let mut flat = Tensor::zeros([6]);
        tt.reshape_into(&mut flat).unwrap();
        assert_eq!(flat.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_slice_bounds() {
        let t = iota([3, 4]);
        let s = t.slice(1, 1, 3).unwrap();
        assert_eq!(s.dims(), &[3, 2]);
        assert_eq!(s.to_vec(), vec![1.0, 2.0, 5.0, 6.0, 9.0, 10.0]);

        let stepped = t.slice_step(1, 0, 4, 3).unwrap();
        assert_eq!(stepped.to_vec(), vec![0.0, 3.0, 4.0, 7.0, 8.0, 11.0]);

        assert!(matches!(t.slice(1, 0, 5), Err(TensorError::IndexOutOfRange { .. })));
        assert!(matches!(t.slice(2, 0, 1), Err(TensorError::IndexOutOfRange { .. })));
        assert!(matches!(t.slice(0, 2, 1), Err(TensorError::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_flip_and_permute() {
        let t = iota([2, 3]);
        assert_eq!(t.flip(1).unwrap().to_vec(), vec![2.0, 1.0, 0.0, 5.0, 4.0, 3.0]);
        let p = iota([2, 3, 4]).permute(&[2, 0, 1]).unwrap();
        assert_eq!(p.dims(), &[4, 2, 3]);
        assert_eq!(p.at(&[3, 1, 2]).unwrap(), 23.0);
        assert!(iota([2, 3]).permute(&[0, 0]).is_err());
    }

    #[test]
    fn test_broadcast_view_is_read_only() {
        let row = iota([3]);
        let mut b = row.broadcast_to([2, 3]).unwrap();
        assert_eq!(b.strides(), &[0, 1]);
        assert_eq!(b.to_vec(), vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
        assert!(!b.is_writable());
        assert!(matches!(b.fill(1.0), Err(TensorError::UnsupportedOperation { .. })));
        assert!(matches!(b.set_at(1.0, &[0, 0]), Err(TensorError::UnsupportedOperation { .. })));
        assert!(row.broadcast_to([2, 4]).is_err());
    }

    #[test]
    fn test_at_bounds() {
        let t = iota([2, 3]);
        assert_eq!(t.at(&[1, 2]).unwrap(), 5.0);
        assert!(matches!(t.at(&[2, 0]), Err(TensorError::IndexOutOfRange { .. })));
        assert!(matches!(t.at(&[0]), Err(TensorError::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_copy_from_any_strides() {
        let src = iota([2, 3]);
        let mut dst = Tensor::zeros([3, 2]);
        let mut dst_t = dst.transpose(0, 1).unwrap();
        dst_t.copy_from(&src).unwrap();
        assert_eq!(dst.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

        let mut wrong = Tensor::zeros([3, 2]);
        assert!(matches!(wrong.copy_from(&src), Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_copy_from_overlapping_view_uses_snapshot() {
        let t = iota([5]);
        let mut head = t.slice(0, 0, 4).unwrap();
        let tail = t.slice(0, 1, 5).unwrap();
        head.copy_from(&tail).unwrap();
        assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_fill_and_fill_masked() {
        let mut t = iota([2, 2]);
        let mask = Tensor::from_slice([2], &[1.0, 0.0]).unwrap();
        t.fill_masked(-1.0, &mask).unwrap();
        assert_eq!(t.to_vec(), vec![-1.0, 1.0, -1.0, 3.0]);
        t.fill(7.0).unwrap();
        assert_eq!(t.to_vec(), vec![7.0; 4]);
    }

    #[test]
    fn test_data_guards() {
        let mut t = Tensor::zeros([3]);
        t.data_mut().unwrap()[1] = 2.0;
        assert_eq!(&*t.data().unwrap(), &[0.0, 2.0, 0.0]);
        let tt = iota([2, 2]).transpose(0, 1).unwrap();
        assert!(tt.data().is_err());
    }

    #[test]
    fn test_rebind() {
        let a = iota([2, 2]);
        let mut b = Tensor::zeros([7]);
        b.rebind(&a);
        assert!(b.shares_storage(&a));
        assert_eq!(b.dims(), &[2, 2]);
        assert_eq!(b.to_vec(), a.to_vec());
    }
}
