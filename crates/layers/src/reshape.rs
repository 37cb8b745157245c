// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shape-only layers.
//!
//! Both layers copy into their owned buffers through views prepared at
//! `init`: the output seen with the input's shape, and the input gradient
//! seen with the output's shape.

use tensor_core::{Shape, Tensor};

use crate::{Layer, LayerBase, LayerError};

/// Views over the owned buffers with the opposite side's shape.
#[derive(Debug, Default)]
struct ShapeViews {
    output_as_input: Option<Tensor>,
    grad_as_output: Option<Tensor>,
}

impl ShapeViews {
    fn prepare(&mut self, base: &LayerBase, input_shape: &Shape) -> Result<(), LayerError> {
        self.output_as_input = Some(base.output().reshape(input_shape.clone())?);
        self.grad_as_output = Some(base.grad_input().reshape(base.output().shape().clone())?);
        Ok(())
    }

    fn forward<'a>(&mut self, base: &'a mut LayerBase, input: &Tensor) -> Result<&'a Tensor, LayerError> {
        base.begin_forward(input)?;
        let view = self
            .output_as_input
            .as_mut()
            .ok_or_else(|| LayerError::lifecycle(base.name(), "views missing"))?;
        view.copy_from(input)?;
        Ok(base.finish_forward())
    }

    fn backward<'a>(&mut self, base: &'a mut LayerBase, grad_output: &Tensor) -> Result<&'a Tensor, LayerError> {
        base.begin_backward(grad_output)?;
        let view = self
            .grad_as_output
            .as_mut()
            .ok_or_else(|| LayerError::lifecycle(base.name(), "views missing"))?;
        view.copy_from(grad_output)?;
        Ok(base.finish_backward())
    }
}

// ── Flatten ────────────────────────────────────────────────────

/// Merges axes `start_dim..=end_dim` into one.
///
/// The default keeps the batch axis and flattens everything after it.
#[derive(Debug)]
pub struct Flatten {
    base: LayerBase,
    start_dim: usize,
    /// `None` means the last axis.
    end_dim: Option<usize>,
    views: ShapeViews,
}

impl Flatten {
    pub fn new() -> Self {
        Self::with_dims(1, None)
    }

    pub fn with_dims(start_dim: usize, end_dim: Option<usize>) -> Self {
        Self {
            base: LayerBase::new("flatten", None, false),
            start_dim,
            end_dim,
            views: ShapeViews::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = LayerBase::new("flatten", Some(name.into()), false);
        self
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Flatten {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "flatten"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        let dims = input_shape.dims();
        let end = self.end_dim.unwrap_or(dims.len().saturating_sub(1));
        if dims.is_empty() || self.start_dim > end || end >= dims.len() {
            return Err(LayerError::config(
                self.base.name(),
                format!("cannot flatten axes {}..={end} of {input_shape}", self.start_dim),
            ));
        }
        let mut out = dims[..self.start_dim].to_vec();
        out.push(dims[self.start_dim..=end].iter().product());
        out.extend_from_slice(&dims[end + 1..]);
        Ok(Shape::new(out))
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        self.base.allocate(input_shape, output_shape);
        self.views.prepare(&self.base, input_shape)
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.views.forward(&mut self.base, input)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.views.backward(&mut self.base, grad_output)
    }
}

// ── Reshape ────────────────────────────────────────────────────

/// Reinterprets every sample as `target`; the batch axis is kept.
#[derive(Debug)]
pub struct Reshape {
    base: LayerBase,
    target: Vec<usize>,
    views: ShapeViews,
}

impl Reshape {
    pub fn new(target: &[usize]) -> Self {
        Self {
            base: LayerBase::new("reshape", None, false),
            target: target.to_vec(),
            views: ShapeViews::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = LayerBase::new("reshape", Some(name.into()), false);
        self
    }

    pub fn target(&self) -> &[usize] {
        &self.target
    }
}

impl Layer for Reshape {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "reshape"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        let Some((&batch, sample)) = input_shape.dims().split_first() else {
            return Err(LayerError::config(self.base.name(), "input has no batch axis"));
        };
        let mut out = Vec::with_capacity(self.target.len() + 1);
        out.push(batch);
        out.extend_from_slice(&self.target);
        let out = Shape::new(out);
        if sample.iter().product::<usize>() != self.target.iter().product::<usize>() {
            return Err(LayerError::shape(self.base.name(), &out, input_shape));
        }
        Ok(out)
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        self.base.allocate(input_shape, output_shape);
        self.views.prepare(&self.base, input_shape)
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.views.forward(&mut self.base, input)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.views.backward(&mut self.base, grad_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_shapes() {
        let f = Flatten::new();
        let out = f.output_shape(&Shape::new(vec![2, 3, 4, 5])).unwrap();
        assert_eq!(out.dims(), &[2, 60]);
        let f = Flatten::with_dims(1, Some(2));
        assert_eq!(f.output_shape(&Shape::new(vec![2, 3, 4, 5])).unwrap().dims(), &[2, 12, 5]);
        assert!(Flatten::with_dims(2, Some(1)).output_shape(&Shape::matrix(2, 2)).is_err());
    }

    #[test]
    fn test_flatten_round_trip() {
        let mut f = Flatten::new();
        let x = Tensor::from_data([2, 2, 3], (0..12).map(|v| v as f32).collect()).unwrap();
        f.init(x.shape()).unwrap();
        let y = f.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 6]);
        assert_eq!(y.to_vec(), x.to_vec());
        let g = Tensor::from_data([2, 6], (0..12).map(|v| -(v as f32)).collect()).unwrap();
        let gi = f.backward(&g).unwrap();
        assert_eq!(gi.dims(), &[2, 2, 3]);
        assert_eq!(gi.to_vec(), g.to_vec());
    }

    #[test]
    fn test_flatten_strided_input() {
        let mut f = Flatten::new();
        let base = Tensor::from_data([3, 2], (0..6).map(|v| v as f32).collect()).unwrap();
        let x = base.transpose(0, 1).unwrap();
        f.init(x.shape()).unwrap();
        assert_eq!(f.forward(&x).unwrap().to_vec(), x.to_vec());
    }

    #[test]
    fn test_reshape_keeps_batch() {
        let mut r = Reshape::new(&[2, 3]);
        let x = Tensor::from_data([2, 6], (0..12).map(|v| v as f32).collect()).unwrap();
        r.init(x.shape()).unwrap();
        let y = r.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 2, 3]);
        assert_eq!(y.to_vec(), x.to_vec());
        assert!(Reshape::new(&[4, 2]).output_shape(x.shape()).is_err());
    }
}
