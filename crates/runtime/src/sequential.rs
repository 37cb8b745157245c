// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sequential models with a type-state enforced lifecycle.
//!
//! ```text
//! SequentialBuilder
//!     │  .add(layer) … .build()
//!     ▼
//! Sequential<Built>
//!     │  .init()
//!     ▼
//! Sequential<Ready>
//!     │  .forward() / .backward() / .update()
//!     ▼
//!   outputs, gradients, trained parameters
//! ```
//!
//! Each transition consumes the old value and returns a new one, so a
//! model cannot run before its layers have allocated their buffers.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Instant;

use layers::{unique_name, Layer, LayerError, ParamId, Parameter};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tensor_core::{Shape, Tensor};
use tracing::{debug, info, trace};

use crate::loss::train_step;
use crate::{Loss, Optimizer, RuntimeError, TrainingConfig, TrainingMetrics};

// ── Type-state markers ─────────────────────────────────────────

/// Layers are assembled but hold no buffers yet.
#[derive(Debug)]
pub struct Built;

/// Every layer is initialised; the model can run.
#[derive(Debug)]
pub struct Ready;

/// Sealed trait for model states.
pub trait ModelState: std::fmt::Debug {}
impl ModelState for Built {}
impl ModelState for Ready {}

// ── Builder ────────────────────────────────────────────────────

/// Collects the input shape and the ordered layers of a model.
#[derive(Debug)]
pub struct SequentialBuilder {
    name: Option<String>,
    input_shape: Shape,
    layers: Vec<Box<dyn Layer>>,
    profiling: bool,
}

impl SequentialBuilder {
    pub fn new(input_shape: impl Into<Shape>) -> Self {
        Self {
            name: None,
            input_shape: input_shape.into(),
            layers: Vec::new(),
            profiling: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Collects per-layer timings into [`TrainingMetrics`].
    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    /// Appends a layer.
    pub fn add(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Appends an already boxed layer.
    pub fn add_boxed(mut self, layer: Box<dyn Layer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn build(self) -> Result<Sequential<Built>, RuntimeError> {
        if self.layers.is_empty() {
            return Err(RuntimeError::Config(
                "a sequential model needs at least one layer".to_string(),
            ));
        }
        let name = self.name.unwrap_or_else(|| unique_name("sequential"));
        info!(
            model = %name,
            layers = self.layers.len(),
            input = %self.input_shape,
            "sequential model built"
        );
        Ok(Sequential {
            name,
            input_shape: self.input_shape,
            output_shape: None,
            layers: self.layers,
            input: None,
            output: None,
            loss_grad: None,
            forwarded: false,
            training: true,
            metrics: None,
            profiling: self.profiling,
            _state: PhantomData,
        })
    }
}

// ── Model ──────────────────────────────────────────────────────

/// An ordered stack of layers fed one into the next.
///
/// `S` is a type-state marker: only `Sequential<Ready>` can run.
pub struct Sequential<S: ModelState = Built> {
    name: String,
    input_shape: Shape,
    output_shape: Option<Shape>,
    layers: Vec<Box<dyn Layer>>,
    /// View of the last forward input.
    input: Option<Tensor>,
    /// View of the last layer's output after a forward.
    output: Option<Tensor>,
    /// Loss gradient buffer used by [`train_step`].
    loss_grad: Option<Tensor>,
    forwarded: bool,
    /// Mode last set by [`Sequential::set_training`].
    training: bool,
    metrics: Option<TrainingMetrics>,
    profiling: bool,
    _state: PhantomData<S>,
}

impl<S: ModelState> Sequential<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|l| l.as_ref())
    }

    /// Index and layer with the given name.
    pub fn layer_by_name(&self, name: &str) -> Option<(usize, &dyn Layer)> {
        self.layers
            .iter()
            .enumerate()
            .find(|(_, l)| l.name() == name)
            .map(|(i, l)| (i, l.as_ref()))
    }

    /// Output shape for the model input, propagated through every layer.
    pub fn output_shape(&self) -> Result<Shape, RuntimeError> {
        if let Some(shape) = &self.output_shape {
            return Ok(shape.clone());
        }
        let mut shape = self.input_shape.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            shape = layer
                .output_shape(&shape)
                .map_err(|e| RuntimeError::layer(i, layer.name(), e))?;
        }
        Ok(shape)
    }

    /// True when any layer is trainable.
    pub fn can_learn(&self) -> bool {
        self.layers.iter().any(|l| l.can_learn())
    }

    /// Freezes or unfreezes every layer.
    pub fn set_can_learn(&mut self, can_learn: bool) {
        for layer in &mut self.layers {
            layer.set_can_learn(can_learn);
        }
    }

    fn into_state<T: ModelState>(self) -> Sequential<T> {
        Sequential {
            name: self.name,
            input_shape: self.input_shape,
            output_shape: self.output_shape,
            layers: self.layers,
            input: self.input,
            output: self.output,
            loss_grad: self.loss_grad,
            forwarded: self.forwarded,
            training: self.training,
            metrics: self.metrics,
            profiling: self.profiling,
            _state: PhantomData,
        }
    }
}

// ── Built → Ready ──────────────────────────────────────────────

impl Sequential<Built> {
    /// Initialises every layer with the shape its predecessor produces.
    pub fn init(mut self) -> Result<Sequential<Ready>, RuntimeError> {
        let mut shape = self.input_shape.clone();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let tag = |e: LayerError, name: &str| RuntimeError::layer(i, name, e);
            layer.init(&shape).map_err(|e| tag(e, layer.name()))?;
            let expected = layer.output_shape(&shape).map_err(|e| tag(e, layer.name()))?;
            let actual = layer.output().shape();
            if actual != &expected {
                let source = LayerError::ShapeMismatch {
                    layer: layer.name().to_string(),
                    expected,
                    actual: actual.clone(),
                };
                return Err(tag(source, layer.name()));
            }
            debug!(model = %self.name, index = i, layer = %layer.name(), output = %expected, "layer ready");
            shape = expected;
        }
        info!(
            model = %self.name,
            layers = self.layers.len(),
            input = %self.input_shape,
            output = %shape,
            "sequential model initialised"
        );
        if self.profiling {
            self.metrics = Some(TrainingMetrics::new(
                self.name.clone(),
                self.layers.iter().map(|l| l.name().to_string()),
            ));
        }
        self.loss_grad = Some(Tensor::zeros(shape.clone()));
        self.output_shape = Some(shape);
        Ok(self.into_state())
    }
}

// ── Ready: run ─────────────────────────────────────────────────

impl Sequential<Ready> {
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut (dyn Layer + 'static)> {
        self.layers.get_mut(index).map(|l| &mut **l)
    }

    /// Replaces one parameter of one layer.
    pub fn set_param(&mut self, index: usize, id: ParamId, param: Parameter) -> Result<(), RuntimeError> {
        let layer = self.layers.get_mut(index).ok_or_else(|| {
            RuntimeError::Config(format!("model '{}' has no layer {index}", self.name))
        })?;
        match layer.set_param(id, param) {
            Ok(()) => Ok(()),
            Err(e) => Err(RuntimeError::layer(index, layer.name(), e)),
        }
    }

    /// Runs every layer in order and returns the last layer's output.
    pub fn forward(&mut self, input: &Tensor) -> Result<&Tensor, RuntimeError> {
        if input.shape() != &self.input_shape {
            return Err(RuntimeError::InputShape {
                expected: self.input_shape.clone(),
                actual: input.shape().clone(),
            });
        }
        for i in 0..self.layers.len() {
            let start = Instant::now();
            let (done, rest) = self.layers.split_at_mut(i);
            let layer = &mut rest[0];
            let x = match done.last() {
                Some(prev) => prev.output(),
                None => input,
            };
            if let Err(e) = layer.forward(x) {
                self.forwarded = false;
                return Err(RuntimeError::layer(i, layer.name(), e));
            }
            let elapsed = start.elapsed();
            trace!(model = %self.name, index = i, elapsed_us = elapsed.as_micros() as u64, "layer forward");
            if let Some(m) = &mut self.metrics {
                m.record_forward(i, elapsed);
            }
        }

        match &mut self.input {
            Some(t) => t.rebind(input),
            None => self.input = Some(input.view()),
        }
        let last = self.layers[self.layers.len() - 1].output();
        match &mut self.output {
            Some(t) => t.rebind(last),
            None => self.output = Some(last.view()),
        }
        self.forwarded = true;
        Ok(self.last_layer().output())
    }

    /// Runs every layer's backward in reverse order and returns the
    /// gradient with respect to the model input.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<&Tensor, RuntimeError> {
        self.check_forwarded()?;
        let n = self.layers.len();
        for i in (0..n).rev() {
            let start = Instant::now();
            let (head, tail) = self.layers.split_at_mut(i + 1);
            let layer = &mut head[i];
            let g = match tail.first() {
                Some(next) => next.base().grad_input(),
                None => grad_output,
            };
            if let Err(e) = layer.backward(g) {
                return Err(RuntimeError::layer(i, layer.name(), e));
            }
            let elapsed = start.elapsed();
            trace!(model = %self.name, index = i, elapsed_us = elapsed.as_micros() as u64, "layer backward");
            if let Some(m) = &mut self.metrics {
                m.record_backward(i, elapsed);
            }
        }
        Ok(self.layers[0].base().grad_input())
    }

    /// Backward from the gradient left by the last loss evaluation.
    pub(crate) fn backward_from_loss(&mut self) -> Result<(), RuntimeError> {
        let grad = self
            .loss_grad
            .take()
            .ok_or_else(|| RuntimeError::Config("loss gradient buffer missing".to_string()))?;
        let result = self.backward(&grad).map(|_| ());
        self.loss_grad = Some(grad);
        result
    }

    /// The last output and the loss gradient buffer, borrowed together.
    pub(crate) fn loss_operands(&mut self) -> Result<(&Tensor, &mut Tensor), RuntimeError> {
        self.check_forwarded()?;
        match (&self.output, &mut self.loss_grad) {
            (Some(out), Some(grad)) => Ok((out, grad)),
            _ => Err(RuntimeError::Config("model output missing".to_string())),
        }
    }

    /// Input of the last forward.
    pub fn input(&self) -> Option<&Tensor> {
        self.input.as_ref()
    }

    /// Output of the last forward.
    pub fn output(&self) -> Option<&Tensor> {
        self.output.as_ref().filter(|_| self.forwarded)
    }

    /// Copies of every parameter keyed by layer index and slot.
    pub fn parameters(&self) -> BTreeMap<(usize, ParamId), Parameter> {
        let mut out = BTreeMap::new();
        for (i, layer) in self.layers.iter().enumerate() {
            for (id, p) in layer.parameters().into_entries() {
                out.insert((i, id), p);
            }
        }
        out
    }

    /// Elements across every parameter.
    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.base().params().num_elements())
            .sum()
    }

    pub fn zero_grad(&mut self) -> Result<(), RuntimeError> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            if let Err(e) = layer.zero_grad() {
                return Err(RuntimeError::layer(i, layer.name(), e));
            }
        }
        Ok(())
    }

    /// Switches every layer between training and inference behaviour.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Applies `optimizer` to every trainable parameter.
    ///
    /// Updated copies are staged and checked against their destinations
    /// first; nothing is written back unless every update succeeds and
    /// every staged shape fits.
    pub fn update(&mut self, optimizer: &mut dyn Optimizer) -> Result<(), RuntimeError> {
        let mut staged = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            if !layer.can_learn() {
                continue;
            }
            for (id, p) in layer.base().params().iter() {
                if !p.requires_grad || p.grad.is_none() {
                    continue;
                }
                let mut copy = p.clone();
                optimizer.update(&mut copy).map_err(|e| match e {
                    RuntimeError::Optimizer { detail } => RuntimeError::Optimizer {
                        detail: format!("layer {i} ('{}') {id}: {detail}", layer.name()),
                    },
                    other => other,
                })?;
                staged.push((i, id, copy));
            }
        }
        self.check_staged(&staged)?;
        for (i, id, param) in staged {
            let layer = &mut self.layers[i];
            if let Err(e) = layer.set_param(id, param) {
                return Err(RuntimeError::layer(i, layer.name(), e));
            }
        }
        if let Some(m) = &mut self.metrics {
            m.record_step();
        }
        Ok(())
    }

    pub fn metrics(&self) -> Option<&TrainingMetrics> {
        self.metrics.as_ref()
    }

    pub fn metrics_mut(&mut self) -> Option<&mut TrainingMetrics> {
        self.metrics.as_mut()
    }

    /// Trains on `samples` for `config.epochs` epochs and returns the mean
    /// loss of each epoch.
    ///
    /// With a `seed` the samples are visited in a seeded shuffled order
    /// every epoch; otherwise in the given order.
    pub fn fit(&mut self, config: &TrainingConfig, samples: &[(Tensor, Tensor)]) -> Result<Vec<f32>, RuntimeError> {
        if samples.is_empty() {
            return Err(RuntimeError::Config("no training samples".to_string()));
        }
        let mut optimizer = config.create_optimizer()?;
        let loss = config.create_loss()?;
        if config.enable_profiling && self.metrics.is_none() {
            self.metrics = Some(TrainingMetrics::new(
                self.name.clone(),
                self.layers.iter().map(|l| l.name().to_string()),
            ));
        }
        let mut rng = config.seed.map(StdRng::seed_from_u64);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let start = Instant::now();
        info!(
            model = %self.name,
            optimizer = optimizer.name(),
            loss = loss.name(),
            epochs = config.epochs,
            samples = samples.len(),
            threads = config.resolve_threads(),
            "training started"
        );

        self.set_training(true);
        let mut losses = Vec::with_capacity(config.epochs);
        for epoch in 0..config.epochs {
            if let Some(rng) = &mut rng {
                order.shuffle(rng);
            }
            let mut total = 0.0f32;
            for &k in &order {
                let (x, t) = &samples[k];
                total += train_step(self, optimizer.as_mut(), &loss, x, t)?;
            }
            let mean = total / samples.len() as f32;
            losses.push(mean);
            if let Some(m) = &mut self.metrics {
                m.record_epoch(mean);
            }
            if config.log_every > 0 && (epoch + 1) % config.log_every == 0 {
                info!(model = %self.name, epoch = epoch + 1, loss = mean, "epoch complete");
            }
        }
        if let Some(m) = &mut self.metrics {
            m.finalise(start.elapsed());
            info!("{}", m.summary());
        }
        Ok(losses)
    }

    /// Evaluates `loss` on one sample in inference mode.
    ///
    /// The previous training mode is restored afterwards, on success or
    /// failure.
    pub fn evaluate(&mut self, loss: &Loss, input: &Tensor, target: &Tensor) -> Result<f32, RuntimeError> {
        let previous = self.training;
        self.set_training(false);
        let value = self
            .forward(input)
            .and_then(|pred| loss.compute(pred, target));
        self.set_training(previous);
        value
    }

    // ── Private helpers ────────────────────────────────────────

    /// Rejects any staged parameter that `set_param` would refuse.
    fn check_staged(&self, staged: &[(usize, ParamId, Parameter)]) -> Result<(), RuntimeError> {
        for (i, id, param) in staged {
            let layer = &self.layers[*i];
            let Some(current) = layer.base().params().get(*id) else {
                return Err(RuntimeError::layer(
                    *i,
                    layer.name(),
                    LayerError::UnknownParameter {
                        layer: layer.name().to_string(),
                        id: *id,
                    },
                ));
            };
            let grad_shape = param.grad.as_ref().map(|g| g.shape());
            for actual in std::iter::once(param.shape()).chain(grad_shape) {
                if actual != current.shape() {
                    let e = LayerError::ShapeMismatch {
                        layer: layer.name().to_string(),
                        expected: current.shape().clone(),
                        actual: actual.clone(),
                    };
                    return Err(RuntimeError::layer(*i, layer.name(), e));
                }
            }
        }
        Ok(())
    }

    fn last_layer(&self) -> &dyn Layer {
        // `build` rejects empty models.
        self.layers[self.layers.len() - 1].as_ref()
    }

    fn check_forwarded(&self) -> Result<(), RuntimeError> {
        if self.forwarded {
            return Ok(());
        }
        let index = self.layers.len() - 1;
        Err(RuntimeError::layer(
            index,
            self.layers[index].name(),
            LayerError::Lifecycle {
                layer: self.name.clone(),
                detail: "model backward before forward".to_string(),
            },
        ))
    }
}

impl<S: ModelState> std::fmt::Debug for Sequential<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequential")
            .field("state", &std::any::type_name::<S>())
            .field("name", &self.name)
            .field("input_shape", &self.input_shape)
            .field("layers", &self.layers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("forwarded", &self.forwarded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layers::{Dense, DenseConfig, ReLU};

    fn two_layer() -> Sequential<Ready> {
        SequentialBuilder::new(Shape::matrix(2, 3))
            .with_name("mlp")
            .add(Dense::new(DenseConfig::new(3, 4).with_seed(1)).unwrap())
            .add(ReLU::new())
            .add(Dense::new(DenseConfig::new(4, 2).with_seed(2)).unwrap())
            .build()
            .unwrap()
            .init()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_empty_model() {
        assert!(matches!(
            SequentialBuilder::new(Shape::vector(2)).build(),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn test_init_propagates_shapes() {
        let model = two_layer();
        assert_eq!(model.len(), 3);
        assert_eq!(model.output_shape().unwrap(), Shape::matrix(2, 2));
        assert_eq!(model.layer(1).unwrap().output().dims(), &[2, 4]);
        assert_eq!(model.num_parameters(), 3 * 4 + 4 + 4 * 2 + 2);
    }

    #[test]
    fn test_init_reports_incompatible_layers() {
        let model = SequentialBuilder::new(Shape::matrix(1, 3))
            .add(Dense::new(DenseConfig::new(3, 4)).unwrap())
            .add(Dense::new(DenseConfig::new(5, 1)).unwrap())
            .build()
            .unwrap();
        match model.init() {
            Err(RuntimeError::Layer { index, source, .. }) => {
                assert_eq!(index, 1);
                assert!(matches!(source, LayerError::ShapeMismatch { .. }));
            }
            other => panic!("expected layer error, got {other:?}"),
        }
    }

    #[test]
    fn test_forward_validates_input_shape() {
        let mut model = two_layer();
        assert!(matches!(
            model.forward(&Tensor::zeros([3, 3])),
            Err(RuntimeError::InputShape { .. })
        ));
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut model = two_layer();
        match model.backward(&Tensor::zeros([2, 2])) {
            Err(RuntimeError::Layer { source: LayerError::Lifecycle { layer, .. }, .. }) => {
                assert_eq!(layer, "mlp");
            }
            other => panic!("expected lifecycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_parameters_are_keyed_by_layer_and_slot() {
        let model = two_layer();
        let keys: Vec<_> = model.parameters().into_keys().collect();
        assert_eq!(
            keys,
            vec![
                (0, ParamId::Weights),
                (0, ParamId::Biases),
                (2, ParamId::Weights),
                (2, ParamId::Biases),
            ]
        );
        let last = model.layer(2).unwrap().name().to_string();
        assert_eq!(model.layer_by_name(&last).map(|(i, _)| i), Some(2));
        assert!(model.layer_by_name("missing").is_none());
    }

    #[test]
    fn test_layer_errors_carry_index_and_name() {
        let mut model = two_layer();
        let err = model
            .set_param(2, ParamId::Weights, Parameter::new(Tensor::zeros([3, 3])))
            .unwrap_err();
        match err {
            RuntimeError::Layer { index, name, .. } => {
                assert_eq!(index, 2);
                assert_eq!(name, model.layer(2).unwrap().name());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
