// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 2D pooling layers over `[B, C, H, W]` inputs.

use kernels::pool::{
    avg_pool, avg_pool_backward, global_avg_pool, global_avg_pool_backward, max_pool,
    max_pool_backward, Pool2dGeometry,
};
use kernels::Window;
use serde::{Deserialize, Serialize};
use tensor_core::{Shape, Tensor};

use crate::layer::contiguous_or_copy;
use crate::{Layer, LayerBase, LayerError};

/// Configuration for [`MaxPool2D`] and [`AvgPool2D`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub kernel: [usize; 2],
    /// Defaults to `kernel`.
    #[serde(default)]
    pub stride: Option<[usize; 2]>,
    /// Zero padding; at most half the kernel per axis.
    #[serde(default)]
    pub padding: [usize; 2],
    #[serde(default)]
    pub name: Option<String>,
}

impl PoolConfig {
    pub fn new(kernel: [usize; 2]) -> Self {
        Self {
            kernel,
            stride: None,
            padding: [0, 0],
            name: None,
        }
    }

    pub fn with_stride(mut self, stride: [usize; 2]) -> Self {
        self.stride = Some(stride);
        self
    }

    pub fn with_padding(mut self, padding: [usize; 2]) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn window(&self) -> Window<2> {
        Window::new(self.kernel)
            .with_stride(self.stride.unwrap_or(self.kernel))
            .with_padding(self.padding)
    }
}

fn nchw(layer: &str, input_shape: &Shape) -> Result<[usize; 4], LayerError> {
    match *input_shape.dims() {
        [b, c, h, w] => Ok([b, c, h, w]),
        _ => Err(LayerError::shape(layer, &Shape::new(vec![1, 1, 1, 1]), input_shape)),
    }
}

fn pool_geometry(layer: &str, window: Window<2>, input_shape: &Shape) -> Result<Pool2dGeometry, LayerError> {
    let [b, c, h, w] = nchw(layer, input_shape)?;
    Ok(Pool2dGeometry::new(b, c, [h, w], window))
}

fn pooled_shape(geom: &Pool2dGeometry) -> Result<Shape, LayerError> {
    let [oh, ow] = geom.output()?;
    Ok(Shape::new(vec![geom.batch, geom.channels, oh, ow]))
}

// ── Max pooling ────────────────────────────────────────────────

/// Max pooling; backward routes each gradient to the first maximum of its
/// window.
#[derive(Debug)]
pub struct MaxPool2D {
    base: LayerBase,
    window: Window<2>,
    geometry: Option<Pool2dGeometry>,
    indices: Vec<usize>,
}

impl MaxPool2D {
    pub fn new(config: PoolConfig) -> Result<Self, LayerError> {
        let base = LayerBase::new("max_pool2d", config.name.clone(), false).with_contiguous_input();
        let window = config.window();
        window.validate("max_pool2d")?;
        Ok(Self {
            base,
            window,
            geometry: None,
            indices: Vec::new(),
        })
    }
}

impl Layer for MaxPool2D {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "max_pool2d"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        pooled_shape(&pool_geometry(self.base.name(), self.window, input_shape)?)
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let geom = pool_geometry(self.base.name(), self.window, input_shape)?;
        let output_shape = pooled_shape(&geom)?;
        self.indices = vec![0; geom.output_len()?];
        self.geometry = Some(geom);
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let geom = self
            .geometry
            .ok_or_else(|| LayerError::lifecycle(self.base.name(), "geometry missing"))?;
        let io = self.base.io();
        {
            let x = io.input.data()?;
            let mut y = io.output.data_mut()?;
            max_pool(&geom, &mut y, &x, Some(&mut self.indices))?;
        }
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let g = contiguous_or_copy(self.base.name(), grad_output);
        let io = self.base.io();
        {
            let gv = g.data()?;
            let mut gi = io.grad_input.data_mut()?;
            max_pool_backward(&mut gi, &gv, &self.indices)?;
        }
        Ok(self.base.finish_backward())
    }
}

// ── Average pooling ────────────────────────────────────────────

/// Average pooling over the valid (unpadded) taps of each window.
#[derive(Debug)]
pub struct AvgPool2D {
    base: LayerBase,
    window: Window<2>,
    geometry: Option<Pool2dGeometry>,
}

impl AvgPool2D {
    pub fn new(config: PoolConfig) -> Result<Self, LayerError> {
        let base = LayerBase::new("avg_pool2d", config.name.clone(), false).with_contiguous_input();
        let window = config.window();
        window.validate("avg_pool2d")?;
        Ok(Self {
            base,
            window,
            geometry: None,
        })
    }
}

impl Layer for AvgPool2D {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "avg_pool2d"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        pooled_shape(&pool_geometry(self.base.name(), self.window, input_shape)?)
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let geom = pool_geometry(self.base.name(), self.window, input_shape)?;
        let output_shape = pooled_shape(&geom)?;
        self.geometry = Some(geom);
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let geom = self
            .geometry
            .ok_or_else(|| LayerError::lifecycle(self.base.name(), "geometry missing"))?;
        let io = self.base.io();
        {
            let x = io.input.data()?;
            let mut y = io.output.data_mut()?;
            avg_pool(&geom, &mut y, &x)?;
        }
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let geom = self
            .geometry
            .ok_or_else(|| LayerError::lifecycle(self.base.name(), "geometry missing"))?;
        let g = contiguous_or_copy(self.base.name(), grad_output);
        let io = self.base.io();
        {
            let gv = g.data()?;
            let mut gi = io.grad_input.data_mut()?;
            avg_pool_backward(&geom, &mut gi, &gv)?;
        }
        Ok(self.base.finish_backward())
    }
}

// ── Global average pooling ─────────────────────────────────────

/// `[B, C, H, W] -> [B, C, 1, 1]`.
#[derive(Debug)]
pub struct GlobalAvgPool2D {
    base: LayerBase,
}

impl GlobalAvgPool2D {
    pub fn new() -> Self {
        Self::with_name(None)
    }

    pub fn with_name(name: Option<String>) -> Self {
        Self {
            base: LayerBase::new("global_avg_pool2d", name, false).with_contiguous_input(),
        }
    }

    fn planes(&self) -> Result<[usize; 3], LayerError> {
        let shape = self
            .base
            .input_shape()
            .ok_or_else(|| LayerError::lifecycle(self.base.name(), "not initialised"))?;
        let [b, c, h, w] = nchw(self.base.name(), shape)?;
        Ok([b, c, h * w])
    }
}

impl Default for GlobalAvgPool2D {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for GlobalAvgPool2D {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "global_avg_pool2d"
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        let [b, c, h, w] = nchw(self.base.name(), input_shape)?;
        if h == 0 || w == 0 {
            return Err(LayerError::config(self.base.name(), "empty spatial plane"));
        }
        Ok(Shape::new(vec![b, c, 1, 1]))
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let [b, c, plane] = self.planes()?;
        let io = self.base.io();
        {
            let x = io.input.data()?;
            let mut y = io.output.data_mut()?;
            global_avg_pool(&mut y, &x, b, c, plane)?;
        }
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let [b, c, plane] = self.planes()?;
        let g = contiguous_or_copy(self.base.name(), grad_output);
        let io = self.base.io();
        {
            let gv = g.data()?;
            let mut gi = io.grad_input.data_mut()?;
            global_avg_pool_backward(&mut gi, &gv, b, c, plane)?;
        }
        Ok(self.base.finish_backward())
    }
}
