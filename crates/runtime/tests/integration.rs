// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: models built from real layers, trained end-to-end.
//!
//! These tests exercise the complete flow from builder → init → forward →
//! loss → backward → update, proving that the four crates compose
//! correctly and that the type-state transitions work end-to-end.

use layers::{
    BatchNorm2D, BatchNormConfig, Conv2D, ConvConfig, Dense, DenseConfig, Dropout, DropoutConfig,
    Flatten, Layer, LayerError, MaxPool2D, ParamId, Parameter, PoolConfig, ReLU, Softmax, Tanh,
};
use runtime::{
    train_step, Checkpoint, Loss, Optimizer, Ready, RuntimeError, Sequential, SequentialBuilder,
    Sgd, TrainingConfig,
};
use tensor_core::{Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tol)
}

/// `y = 2x + 1` sampled at five points, as one batch.
fn regression_batch() -> (Tensor, Tensor) {
    let xs = [-1.0, -0.5, 0.0, 0.5, 1.0];
    let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
    (
        Tensor::from_slice([5, 1], &xs).unwrap(),
        Tensor::from_data([5, 1], ys).unwrap(),
    )
}

/// A Dense(1, 1) model with weight and bias set to 0.1.
fn linear_model() -> Sequential<Ready> {
    let mut model = SequentialBuilder::new(Shape::matrix(5, 1))
        .with_name("linear")
        .add(Dense::new(DenseConfig::new(1, 1)).unwrap())
        .build()
        .unwrap()
        .init()
        .unwrap();
    model
        .set_param(0, ParamId::Weights, Parameter::new(Tensor::full([1, 1], 0.1)))
        .unwrap();
    model
        .set_param(0, ParamId::Biases, Parameter::new(Tensor::full([1], 0.1)))
        .unwrap();
    model
}

fn mlp(seed: u64) -> Sequential<Ready> {
    SequentialBuilder::new(Shape::matrix(2, 3))
        .add(Dense::new(DenseConfig::new(3, 4).with_seed(seed)).unwrap())
        .add(ReLU::new())
        .add(Dense::new(DenseConfig::new(4, 2).with_seed(seed + 1)).unwrap())
        .build()
        .unwrap()
        .init()
        .unwrap()
}

fn scalar(model: &Sequential<Ready>, id: ParamId) -> f32 {
    model.parameters()[&(0, id)].data.to_vec()[0]
}

// ── Training ───────────────────────────────────────────────────

#[test]
fn dense_linear_regression_converges() {
    let (x, t) = regression_batch();
    let mut model = linear_model();
    let mut sgd = Sgd::new(0.1).unwrap();

    let mut losses = Vec::new();
    for _ in 0..100 {
        losses.push(train_step(&mut model, &mut sgd, &Loss::Mse, &x, &t).unwrap());
    }
    for pair in losses.windows(2) {
        assert!(pair[1] <= pair[0], "loss increased: {pair:?}");
    }
    let final_loss = Loss::Mse.compute(model.forward(&x).unwrap(), &t).unwrap();
    assert!(final_loss < 1e-3, "final loss {final_loss}");

    let w = scalar(&model, ParamId::Weights);
    let b = scalar(&model, ParamId::Biases);
    assert!((w - 2.0).abs() < 0.05, "weight {w}");
    assert!((b - 1.0).abs() < 0.05, "bias {b}");
}

#[test]
fn fit_follows_training_config() {
    let (x, t) = regression_batch();
    let mut model = linear_model();
    let config = TrainingConfig {
        learning_rate: 0.1,
        epochs: 100,
        optimizer: "sgd".into(),
        loss: "mse".into(),
        seed: Some(5),
        log_every: 25,
        ..Default::default()
    };
    let losses = model.fit(&config, &[(x, t)]).unwrap();
    assert_eq!(losses.len(), 100);
    assert!(losses[99] < 1e-3);

    let metrics = model.metrics().unwrap();
    assert_eq!(metrics.epoch_losses.len(), 100);
    assert_eq!(metrics.steps, 100);
    assert_eq!(metrics.layer_metrics[0].calls, 100);
    assert!(metrics.summary().contains("Training 'linear'"));
}

#[test]
fn two_layer_stack_learns() {
    let (x, t) = regression_batch();
    let mut model = SequentialBuilder::new(Shape::matrix(5, 1))
        .add(Dense::new(DenseConfig::new(1, 8).with_seed(3)).unwrap())
        .add(Tanh::new())
        .add(Dense::new(DenseConfig::new(8, 1).with_seed(4)).unwrap())
        .build()
        .unwrap()
        .init()
        .unwrap();
    let mut sgd = Sgd::new(0.05).unwrap();

    let first = train_step(&mut model, &mut sgd, &Loss::Mse, &x, &t).unwrap();
    let mut last = first;
    for _ in 0..300 {
        last = train_step(&mut model, &mut sgd, &Loss::Mse, &x, &t).unwrap();
    }
    assert!(last < first / 2.0, "loss {first} -> {last}");
}

// ── Composition ────────────────────────────────────────────────

#[test]
fn sequential_matches_layer_by_layer_composition() {
    let x = Tensor::from_slice([2, 3], &[0.5, -1.0, 2.0, 1.5, 0.0, -0.25]).unwrap();
    let mut model = mlp(10);
    let y = model.forward(&x).unwrap().to_vec();

    let mut l1 = Dense::new(DenseConfig::new(3, 4).with_seed(10)).unwrap();
    let mut l2 = ReLU::new();
    let mut l3 = Dense::new(DenseConfig::new(4, 2).with_seed(11)).unwrap();
    l1.init(x.shape()).unwrap();
    l2.init(&Shape::matrix(2, 4)).unwrap();
    l3.init(&Shape::matrix(2, 4)).unwrap();
    let h1 = l1.forward(&x).unwrap().clone();
    let h2 = l2.forward(&h1).unwrap().clone();
    let expected = l3.forward(&h2).unwrap().to_vec();

    assert_eq!(y, expected);
}

#[test]
fn model_backward_returns_input_gradient() {
    let x = Tensor::from_slice([2, 3], &[0.5, -1.0, 2.0, 1.5, 0.0, -0.25]).unwrap();
    let mut model = mlp(20);
    model.forward(&x).unwrap();
    let g = model.backward(&Tensor::full([2, 2], 1.0)).unwrap();
    assert_eq!(g.dims(), &[2, 3]);

    let params = model.parameters();
    assert!(params[&(0, ParamId::Weights)].grad.is_some());
    assert!(params[&(2, ParamId::Biases)].grad.is_some());
    // d(Σy)/db = batch for the last layer.
    assert_eq!(
        params[&(2, ParamId::Biases)].grad.as_ref().unwrap().to_vec(),
        vec![2.0, 2.0]
    );
}

// ── Scenarios through a model ──────────────────────────────────

#[test]
fn conv_identity_kernel_model() {
    let mut model = SequentialBuilder::new(Shape::new(vec![1, 1, 3, 3]))
        .add(Conv2D::new(ConvConfig::new(1, 1, &[1, 1]).with_bias(false)).unwrap())
        .build()
        .unwrap()
        .init()
        .unwrap();
    model
        .set_param(0, ParamId::Weights, Parameter::new(Tensor::full([1, 1, 1, 1], 1.0)))
        .unwrap();
    let x = Tensor::from_data([1, 1, 3, 3], (1..=9).map(|v| v as f32).collect()).unwrap();
    assert_eq!(model.forward(&x).unwrap().to_vec(), x.to_vec());
}

#[test]
fn max_pool_then_flatten_model() {
    let mut model = SequentialBuilder::new(Shape::new(vec![1, 1, 4, 4]))
        .add(MaxPool2D::new(PoolConfig::new([2, 2])).unwrap())
        .add(Flatten::new())
        .build()
        .unwrap()
        .init()
        .unwrap();
    let x = Tensor::from_slice(
        [1, 1, 4, 4],
        &[1., 2., 3., 4., 5., 9., 8., 7., 0., 6., 5., 4., 3., 2., 1., 0.],
    )
    .unwrap();
    let y = model.forward(&x).unwrap();
    assert_eq!(y.dims(), &[1, 4]);
    assert_eq!(y.to_vec(), vec![9.0, 8.0, 6.0, 5.0]);
}

#[test]
fn softmax_model() {
    let mut model = SequentialBuilder::new(Shape::matrix(1, 3))
        .add(Softmax::default())
        .build()
        .unwrap()
        .init()
        .unwrap();
    let x = Tensor::from_slice([1, 3], &[1.0, 2.0, 3.0]).unwrap();
    let y = model.forward(&x).unwrap().to_vec();
    assert!(approx_eq(&y, &[0.0900, 0.2447, 0.6652], 1e-4), "{y:?}");
    assert!((y.iter().sum::<f32>() - 1.0).abs() < 1e-6);
}

// ── Failure semantics ──────────────────────────────────────────

/// Fails on the n-th parameter it sees.
#[derive(Debug)]
struct FailOn {
    seen: usize,
    fail_at: usize,
    inner: Sgd,
}

impl Optimizer for FailOn {
    fn name(&self) -> &'static str {
        "fail-on"
    }

    fn update(&mut self, param: &mut Parameter) -> Result<(), RuntimeError> {
        self.seen += 1;
        if self.seen == self.fail_at {
            return Err(RuntimeError::Optimizer {
                detail: "injected".into(),
            });
        }
        self.inner.update(param)
    }
}

#[test]
fn failed_update_leaves_parameters_untouched() {
    let x = Tensor::from_slice([2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let mut model = mlp(30);
    model.forward(&x).unwrap();
    model.backward(&Tensor::full([2, 2], 1.0)).unwrap();
    let before = model.parameters();

    let mut opt = FailOn {
        seen: 0,
        fail_at: 3,
        inner: Sgd::new(0.5).unwrap(),
    };
    let err = model.update(&mut opt).unwrap_err();
    assert!(err.to_string().contains("injected"));
    assert!(err.to_string().contains("layer 2"));

    for (key, p) in model.parameters() {
        assert_eq!(p.data.to_vec(), before[&key].data.to_vec(), "{key:?} changed");
    }

    opt.fail_at = usize::MAX;
    model.update(&mut opt).unwrap();
    assert_ne!(
        model.parameters()[&(0, ParamId::Weights)].data.to_vec(),
        before[&(0, ParamId::Weights)].data.to_vec()
    );
}

/// Steps every parameter, then reshapes the n-th one's data or gradient.
#[derive(Debug)]
struct ReshapeOn {
    seen: usize,
    target: usize,
    grad: bool,
    inner: Sgd,
}

impl Optimizer for ReshapeOn {
    fn name(&self) -> &'static str {
        "reshape-on"
    }

    fn update(&mut self, param: &mut Parameter) -> Result<(), RuntimeError> {
        self.seen += 1;
        self.inner.update(param)?;
        if self.seen == self.target {
            let wrong = Tensor::zeros([param.data.size() + 1]);
            if self.grad {
                param.grad = Some(wrong);
            } else {
                param.data = wrong;
            }
        }
        Ok(())
    }
}

#[test]
fn late_shape_mismatch_leaves_parameters_untouched() {
    let x = Tensor::from_slice([2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    for grad in [false, true] {
        let mut model = mlp(35);
        model.forward(&x).unwrap();
        model.backward(&Tensor::full([2, 2], 1.0)).unwrap();
        let before = model.parameters();

        // The last staged parameter is layer 2's bias.
        let mut opt = ReshapeOn {
            seen: 0,
            target: before.len(),
            grad,
            inner: Sgd::new(0.5).unwrap(),
        };
        match model.update(&mut opt).unwrap_err() {
            RuntimeError::Layer { index, source, .. } => {
                assert_eq!(index, 2);
                assert!(matches!(source, LayerError::ShapeMismatch { .. }), "{source:?}");
            }
            other => panic!("unexpected {other:?}"),
        }
        for (key, p) in model.parameters() {
            assert_eq!(p.data.to_vec(), before[&key].data.to_vec(), "{key:?} changed (grad {grad})");
        }
    }
}

// ── Training mode ──────────────────────────────────────────────

fn dropout_model() -> Sequential<Ready> {
    SequentialBuilder::new(Shape::matrix(2, 3))
        .add(Dense::new(DenseConfig::new(3, 4).with_seed(80)).unwrap())
        .add(Dropout::new(DropoutConfig::new(0.5).with_seed(81)).unwrap())
        .build()
        .unwrap()
        .init()
        .unwrap()
}

#[test]
fn evaluate_restores_the_previous_mode() {
    let x = Tensor::from_slice([2, 3], &[0.5, -1.0, 2.0, 1.5, 0.0, -0.25]).unwrap();
    let t = Tensor::zeros([2, 4]);
    let mut model = dropout_model();
    assert!(model.is_training());

    model.set_training(false);
    let first = model.evaluate(&Loss::Mse, &x, &t).unwrap();
    assert!(!model.is_training());
    // Still in inference mode, so dropout stays the identity.
    assert_eq!(model.evaluate(&Loss::Mse, &x, &t).unwrap(), first);
    let y1 = model.forward(&x).unwrap().to_vec();
    let y2 = model.forward(&x).unwrap().to_vec();
    assert_eq!(y1, y2);

    model.set_training(true);
    model.evaluate(&Loss::Mse, &x, &t).unwrap();
    assert!(model.is_training());
}

#[test]
fn failed_evaluate_restores_the_previous_mode() {
    let mut model = dropout_model();
    model.set_training(false);
    let bad = Tensor::zeros([2, 5]);
    assert!(model.evaluate(&Loss::Mse, &bad, &Tensor::zeros([2, 4])).is_err());
    assert!(!model.is_training());

    model.set_training(true);
    let x = Tensor::zeros([2, 3]);
    assert!(model.evaluate(&Loss::Mse, &x, &Tensor::zeros([3, 4])).is_err());
    assert!(model.is_training());
}

#[test]
fn layer_errors_are_tagged() {
    let mut model = mlp(40);
    let err = model
        .set_param(0, ParamId::Kernels, Parameter::new(Tensor::zeros([3, 4])))
        .unwrap_err();
    match err {
        RuntimeError::Layer { index, .. } => assert_eq!(index, 0),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        model.forward(&Tensor::zeros([2, 4])),
        Err(RuntimeError::InputShape { .. })
    ));
}

#[test]
fn batch_norm_model_trains_and_keeps_running_statistics() {
    let x = Tensor::from_data([4, 1, 3, 3], (0..36).map(|v| (v as f32 * 0.7).sin()).collect()).unwrap();
    let t = Tensor::from_slice([4, 1], &[1.0, -1.0, 0.5, 0.0]).unwrap();
    let mut model = SequentialBuilder::new(Shape::new(vec![4, 1, 3, 3]))
        .add(Conv2D::new(ConvConfig::new(1, 2, &[3, 3]).with_padding(&[1, 1]).with_seed(90)).unwrap())
        .add(BatchNorm2D::new(BatchNormConfig::new(2)).unwrap())
        .add(ReLU::new())
        .add(Flatten::new())
        .add(Dense::new(DenseConfig::new(18, 1).with_seed(91)).unwrap())
        .build()
        .unwrap()
        .init()
        .unwrap();
    let mut sgd = Sgd::new(0.05).unwrap();

    let first = train_step(&mut model, &mut sgd, &Loss::Mse, &x, &t).unwrap();
    let mut last = first;
    for _ in 0..50 {
        last = train_step(&mut model, &mut sgd, &Loss::Mse, &x, &t).unwrap();
    }
    assert!(last < first, "loss {first} -> {last}");

    let params = model.parameters();
    let running = &params[&(1, ParamId::RunningMean)];
    assert!(running.grad.is_none());
    assert!(running.data.to_vec().iter().any(|&v| v != 0.0));
    assert!(params[&(1, ParamId::Gamma)].grad.is_some());

    // Inference uses the running statistics and leaves them alone.
    let before = running.data.to_vec();
    model.evaluate(&Loss::Mse, &x, &t).unwrap();
    assert_eq!(model.parameters()[&(1, ParamId::RunningMean)].data.to_vec(), before);
    assert!(model.is_training());
}

// ── Checkpoints ────────────────────────────────────────────────

#[test]
fn checkpoint_restores_model_outputs() {
    let path = std::env::temp_dir().join(format!("runtime-it-{}.ckpt", std::process::id()));
    let x = Tensor::from_slice([2, 3], &[0.1, 0.2, 0.3, -0.4, 0.5, -0.6]).unwrap();

    let mut source = mlp(50);
    let expected = source.forward(&x).unwrap().to_vec();
    Checkpoint::save_model(&source, &path).unwrap();

    let mut target = mlp(60);
    assert_ne!(target.forward(&x).unwrap().to_vec(), expected);
    Checkpoint::load_into(&mut target, &path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(target.forward(&x).unwrap().to_vec(), expected);
}

#[test]
fn checkpoint_carries_running_statistics() {
    let path = std::env::temp_dir().join(format!("runtime-it-bn-{}.ckpt", std::process::id()));
    let build = || {
        SequentialBuilder::new(Shape::matrix(4, 3))
            .add(BatchNorm2D::new(BatchNormConfig::new(3)).unwrap())
            .build()
            .unwrap()
            .init()
            .unwrap()
    };
    let x = Tensor::from_slice([4, 3], &[1.0, 2.0, 3.0, 4.0, 0.0, -1.0, 2.5, 1.5, 0.5, -2.0, 3.0, 1.0]).unwrap();
    let mut source = build();
    source.forward(&x).unwrap();
    source.set_training(false);
    let expected = source.forward(&x).unwrap().to_vec();
    Checkpoint::save_model(&source, &path).unwrap();

    let mut target = build();
    Checkpoint::load_into(&mut target, &path).unwrap();
    let _ = std::fs::remove_file(&path);
    target.set_training(false);
    assert_eq!(target.forward(&x).unwrap().to_vec(), expected);
    assert!(!target.parameters()[&(0, ParamId::RunningVar)].requires_grad);
}

#[test]
fn checkpoint_for_another_architecture_is_rejected() {
    let path = std::env::temp_dir().join(format!("runtime-it-arch-{}.ckpt", std::process::id()));
    Checkpoint::save_model(&mlp(70), &path).unwrap();

    let mut other = linear_model();
    let before = other.parameters();
    let result = Checkpoint::load_into(&mut other, &path);
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(RuntimeError::Checkpoint { .. })));
    for (key, p) in other.parameters() {
        assert_eq!(p.data.to_vec(), before[&key].data.to_vec());
    }
}
