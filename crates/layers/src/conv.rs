// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 1D and 2D convolution layers over `[B, C, *spatial]` inputs.

use kernels::conv::{conv_bias_grad, conv_forward, conv_input_grad, conv_kernel_grad, ConvGeometry};
use kernels::Window;
use serde::{Deserialize, Serialize};
use tensor_core::{Shape, Tensor};

use crate::init::{layer_rng, xavier_uniform};
use crate::layer::contiguous_or_copy;
use crate::{Layer, LayerBase, LayerError, ParamId};

fn default_one() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Configuration for [`Conv1D`] and [`Conv2D`].
///
/// `kernel` has one entry per spatial axis. `stride`, `padding` and
/// `dilation` may be left empty for 1, 0 and 1 on every axis, or given
/// one entry per axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: Vec<usize>,
    #[serde(default)]
    pub stride: Vec<usize>,
    #[serde(default)]
    pub padding: Vec<usize>,
    #[serde(default)]
    pub dilation: Vec<usize>,
    #[serde(default = "default_one")]
    pub groups: usize,
    #[serde(default = "default_true")]
    pub bias: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ConvConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel: &[usize]) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel: kernel.to_vec(),
            stride: Vec::new(),
            padding: Vec::new(),
            dilation: Vec::new(),
            groups: 1,
            bias: true,
            seed: None,
            name: None,
        }
    }

    pub fn with_stride(mut self, stride: &[usize]) -> Self {
        self.stride = stride.to_vec();
        self
    }

    pub fn with_padding(mut self, padding: &[usize]) -> Self {
        self.padding = padding.to_vec();
        self
    }

    pub fn with_dilation(mut self, dilation: &[usize]) -> Self {
        self.dilation = dilation.to_vec();
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn window<const D: usize>(&self, layer: &str) -> Result<Window<D>, LayerError> {
        let axes = |field: &str, v: &[usize], default: usize| -> Result<[usize; D], LayerError> {
            match v.len() {
                0 => Ok([default; D]),
                n if n == D => {
                    let mut out = [0; D];
                    out.copy_from_slice(v);
                    Ok(out)
                }
                n => Err(LayerError::config(
                    layer,
                    format!("{field} has {n} entries for {D} spatial axes"),
                )),
            }
        };
        if self.kernel.len() != D {
            return Err(LayerError::config(
                layer,
                format!("kernel has {} entries for {D} spatial axes", self.kernel.len()),
            ));
        }
        let window = Window::new(axes("kernel", &self.kernel, 1)?)
            .with_stride(axes("stride", &self.stride, 1)?)
            .with_padding(axes("padding", &self.padding, 0)?)
            .with_dilation(axes("dilation", &self.dilation, 1)?);
        window.validate("conv")?;
        Ok(window)
    }
}

/// im2col + GEMM convolution with `D` spatial axes.
///
/// Weights are `[C_out, C_in / groups, *kernel]`, biases `[C_out]`.
#[derive(Debug)]
pub struct Conv<const D: usize> {
    base: LayerBase,
    config: ConvConfig,
    window: Window<D>,
    geometry: Option<ConvGeometry<D>>,
    /// Column scratch shared by forward and both gradients.
    col: Vec<f32>,
}

pub type Conv1D = Conv<1>;
pub type Conv2D = Conv<2>;

impl<const D: usize> Conv<D> {
    const KIND: &'static str = match D {
        1 => "conv1d",
        2 => "conv2d",
        _ => "conv",
    };

    pub fn new(config: ConvConfig) -> Result<Self, LayerError> {
        let base = LayerBase::new(Self::KIND, config.name.clone(), true).with_contiguous_input();
        let window = config.window::<D>(base.name())?;
        let channels_ok = config.in_channels > 0
            && config.out_channels > 0
            && config.groups > 0
            && config.in_channels % config.groups == 0
            && config.out_channels % config.groups == 0;
        if !channels_ok {
            return Err(LayerError::config(
                base.name(),
                format!(
                    "channels {} -> {} with {} groups",
                    config.in_channels, config.out_channels, config.groups
                ),
            ));
        }
        Ok(Self {
            base,
            config,
            window,
            geometry: None,
            col: Vec::new(),
        })
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    fn geometry_for(&self, input_shape: &Shape) -> Result<ConvGeometry<D>, LayerError> {
        let dims = input_shape.dims();
        if dims.len() != D + 2 || dims[1] != self.config.in_channels {
            let mut expected = vec![dims.first().copied().unwrap_or(1), self.config.in_channels];
            expected.extend_from_slice(&self.config.kernel);
            return Err(LayerError::shape(self.base.name(), &Shape::new(expected), input_shape));
        }
        let mut spatial = [0; D];
        spatial.copy_from_slice(&dims[2..]);
        Ok(ConvGeometry::new(
            dims[0],
            self.config.in_channels,
            self.config.out_channels,
            spatial,
            self.window,
        )
        .with_groups(self.config.groups))
    }

    fn geometry(&self) -> Result<ConvGeometry<D>, LayerError> {
        self.geometry
            .ok_or_else(|| LayerError::lifecycle(self.base.name(), "geometry missing"))
    }
}

impl<const D: usize> Layer for Conv<D> {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn output_shape(&self, input_shape: &Shape) -> Result<Shape, LayerError> {
        let geom = self.geometry_for(input_shape)?;
        let mut dims = vec![geom.batch, geom.out_channels];
        dims.extend_from_slice(&geom.output()?);
        Ok(Shape::new(dims))
    }

    fn init(&mut self, input_shape: &Shape) -> Result<(), LayerError> {
        if !self.base.needs_init(input_shape)? {
            return Ok(());
        }
        let output_shape = self.output_shape(input_shape)?;
        let geom = self.geometry_for(input_shape)?;
        let taps = self.window.window_len();
        let (cin_g, cout_g) = (geom.in_channels / geom.groups, geom.out_channels / geom.groups);

        let mut weight_dims = vec![geom.out_channels, cin_g];
        weight_dims.extend_from_slice(&self.window.kernel);
        let mut rng = layer_rng(self.config.seed);
        let weights = xavier_uniform(weight_dims, cin_g * taps, cout_g * taps, &mut rng)?;
        self.base.register(ParamId::Weights, weights);
        if self.config.bias {
            self.base.register(ParamId::Biases, Tensor::zeros([geom.out_channels]));
        }
        self.col = vec![0.0; geom.col_len()?];
        self.geometry = Some(geom);
        self.base.allocate(input_shape, output_shape);
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_forward(input)?;
        let geom = self.geometry()?;
        let io = self.base.io();
        {
            let w = io
                .params
                .get(ParamId::Weights)
                .ok_or_else(|| LayerError::lifecycle(io.name, "weights missing"))?
                .data
                .data()?;
            let b = match io.params.get(ParamId::Biases) {
                Some(p) => Some(p.data.data()?),
                None => None,
            };
            let x = io.input.data()?;
            let mut y = io.output.data_mut()?;
            conv_forward(&geom, &mut y, &x, &w, b.as_deref(), &mut self.col)?;
        }
        Ok(self.base.finish_forward())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, LayerError> {
        self.base.begin_backward(grad_output)?;
        let geom = self.geometry()?;
        let g = contiguous_or_copy(self.base.name(), grad_output);
        let io = self.base.io();
        let gv = g.data()?;
        {
            let w = io
                .params
                .get(ParamId::Weights)
                .ok_or_else(|| LayerError::lifecycle(io.name, "weights missing"))?
                .data
                .data()?;
            let mut gi = io.grad_input.data_mut()?;
            conv_input_grad(&geom, &mut gi, &gv, &w, &mut self.col)?;
        }
        if let Some(gw) = io.params.get_mut(ParamId::Weights).and_then(|p| p.grad.as_mut()) {
            let x = io.input.data()?;
            let mut acc = gw.data_mut()?;
            conv_kernel_grad(&geom, &mut acc, &x, &gv, &mut self.col, true)?;
        }
        if let Some(gb) = io.params.get_mut(ParamId::Biases).and_then(|p| p.grad.as_mut()) {
            let plane = geom.output()?.iter().product();
            let mut acc = gb.data_mut()?;
            conv_bias_grad(&mut acc, &gv, geom.batch, geom.out_channels, plane, true)?;
        }
        Ok(self.base.finish_backward())
    }
}
