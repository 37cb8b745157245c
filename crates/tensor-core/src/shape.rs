// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptors and dimension utilities.

use std::fmt;

/// Describes the extents of a [`crate::Tensor`].
///
/// An empty dimension list is a scalar with one element. Strides are not
/// part of the shape: they live on the tensor, which may be a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a new shape from the given dimensions.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![2, 3, 4]);
    /// assert_eq!(s.rank(), 3);
    /// assert_eq!(s.num_elements(), 24);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Creates a scalar shape (rank 0).
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    /// Creates a 1-D shape.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Creates a 2-D shape (matrix).
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self {
            dims: vec![rows, cols],
        }
    }

    /// Returns the number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements; 1 for a scalar.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the size of a specific dimension, or `None` if out of bounds.
    pub fn dim(&self, index: usize) -> Option<usize> {
        self.dims.get(index).copied()
    }

    /// Last dimension, or `None` for a scalar.
    pub fn last(&self) -> Option<usize> {
        self.dims.last().copied()
    }

    /// Row-major (C-order) strides in elements.
    pub fn contiguous_strides(&self) -> Vec<isize> {
        kernels::contiguous_strides(&self.dims)
    }

    /// Resolves a possibly negative axis (`-1` is the last axis).
    pub fn normalize_axis(&self, axis: isize) -> Option<usize> {
        let rank = self.rank() as isize;
        let resolved = if axis < 0 { axis + rank } else { axis };
        (0..rank).contains(&resolved).then_some(resolved as usize)
    }

    /// The shape with `axes` removed, as produced by a reduction.
    pub fn without_axes(&self, axes: &[usize]) -> Shape {
        Shape::new(
            self.dims
                .iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, &d)| d)
                .collect(),
        )
    }

    /// The shape with dimension `axis` replaced by `extent`.
    pub fn with_dim(&self, axis: usize, extent: usize) -> Shape {
        let mut dims = self.dims.clone();
        if let Some(d) = dims.get_mut(axis) {
            *d = extent;
        }
        Shape::new(dims)
    }

    /// Overwrites `self` with `other`, reusing the existing allocation.
    pub fn assign(&mut self, other: &Shape) {
        self.dims.clone_from(&other.dims);
    }

    /// Returns `true` if two shapes are broadcast-compatible.
    ///
    /// Shapes are compatible when, aligning dimensions from the right,
    /// each pair is either equal or one of them is 1.
    pub fn is_broadcast_compatible(&self, other: &Shape) -> bool {
        let a = &self.dims;
        let b = &other.dims;
        let mut ai = a.len();
        let mut bi = b.len();
        while ai > 0 && bi > 0 {
            ai -= 1;
            bi -= 1;
            if a[ai] != b[bi] && a[ai] != 1 && b[bi] != 1 {
                return false;
            }
        }
        true
    }

    /// The broadcast of two shapes, or `None` if they are incompatible.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        if !self.is_broadcast_compatible(other) {
            return None;
        }
        let rank = self.rank().max(other.rank());
        let dims = (0..rank)
            .map(|i| {
                let a = self.from_right(rank - 1 - i);
                let b = other.from_right(rank - 1 - i);
                if a == 1 {
                    b
                } else {
                    a
                }
            })
            .collect();
        Some(Shape::new(dims))
    }

    /// Extent `k` places from the right, 1 past the leading axis.
    fn from_right(&self, k: usize) -> usize {
        if k < self.rank() {
            self.dims[self.rank() - 1 - k]
        } else {
            1
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// Convenience: `Shape::from(vec![2, 3])`.
impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

/// Convenience: `Shape::from(&[2, 3][..])`.
impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

/// Convenience: `Shape::from([2, 3])`.
impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(shape: &Shape) -> Self {
        shape.clone()
    }
}
