// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer scenarios through the public API only.

use layers::{
    BatchNorm2D, BatchNormConfig, Conv2D, ConvConfig, Dense, DenseConfig, Dropout, DropoutConfig,
    Flatten, Layer, LayerError, LayerNorm, LayerNormConfig, LayerState, MaxPool2D, ParamId,
    Parameter, PoolConfig, ReLU, Softmax, Tanh,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensor_core::{Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

fn random_tensor(dims: &[usize], rng: &mut StdRng) -> Tensor {
    let shape = Shape::new(dims.to_vec());
    let data = (0..shape.num_elements()).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Tensor::from_data(shape, data).unwrap()
}

/// `L = Σ forward(x) ⊙ r`, so `∂L/∂y = r`.
fn projected_loss(layer: &mut dyn Layer, x: &Tensor, r: &[f32]) -> f32 {
    let y = layer.forward(x).unwrap().to_vec();
    y.iter().zip(r).map(|(a, b)| a * b).sum()
}

fn assert_close(analytic: f32, numeric: f32, what: &str) {
    let scale = analytic.abs().max(numeric.abs()).max(1.0);
    assert!(
        (analytic - numeric).abs() <= 1e-3 * scale,
        "{what}: analytic {analytic} vs numeric {numeric}"
    );
}

/// Compares the input gradient of `layer` with central differences.
fn check_input_gradient(layer: &mut dyn Layer, x: &Tensor, rng: &mut StdRng, eps: f32) {
    let out_shape = layer.output_shape(x.shape()).unwrap();
    let r = random_tensor(out_shape.dims(), rng);
    let rv = r.to_vec();

    layer.forward(x).unwrap();
    let analytic = layer.backward(&r).unwrap().to_vec();

    let xv = x.to_vec();
    for i in 0..xv.len() {
        let mut plus = xv.clone();
        plus[i] += eps;
        let mut minus = xv.clone();
        minus[i] -= eps;
        let lp = projected_loss(layer, &Tensor::from_data(x.shape().clone(), plus).unwrap(), &rv);
        let lm = projected_loss(layer, &Tensor::from_data(x.shape().clone(), minus).unwrap(), &rv);
        assert_close(analytic[i], (lp - lm) / (2.0 * eps), &format!("input[{i}]"));
    }
}

/// Compares the accumulated gradient of parameter `id` with central
/// differences taken through `set_param`.
fn check_param_gradient(layer: &mut dyn Layer, x: &Tensor, id: ParamId, rng: &mut StdRng, eps: f32) {
    let out_shape = layer.output_shape(x.shape()).unwrap();
    let r = random_tensor(out_shape.dims(), rng);
    let rv = r.to_vec();

    layer.zero_grad().unwrap();
    layer.forward(x).unwrap();
    layer.backward(&r).unwrap();
    let param = layer.parameters().get(id).unwrap().clone();
    let analytic = param.grad.as_ref().unwrap().to_vec();
    let shape = param.shape().clone();
    let pv = param.data.to_vec();
    for i in 0..pv.len() {
        let mut plus = pv.clone();
        plus[i] += eps;
        layer.set_param(id, Parameter::new(Tensor::from_data(shape.clone(), plus).unwrap())).unwrap();
        let lp = projected_loss(layer, x, &rv);
        let mut minus = pv.clone();
        minus[i] -= eps;
        layer.set_param(id, Parameter::new(Tensor::from_data(shape.clone(), minus).unwrap())).unwrap();
        let lm = projected_loss(layer, x, &rv);
        assert_close(analytic[i], (lp - lm) / (2.0 * eps), &format!("{id}[{i}]"));
    }
    layer.set_param(id, param).unwrap();
}

// ── Gradient checks ────────────────────────────────────────────

#[test]
fn dense_gradients_match_central_differences() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut dense = Dense::new(DenseConfig::new(4, 3).with_seed(5)).unwrap();
    let x = random_tensor(&[2, 4], &mut rng);
    dense.init(x.shape()).unwrap();
    check_input_gradient(&mut dense, &x, &mut rng, 1e-2);

    // Weight gradient: perturb one weight at a time through set_param.
    let r = random_tensor(&[2, 3], &mut rng);
    let rv = r.to_vec();
    dense.zero_grad().unwrap();
    dense.forward(&x).unwrap();
    dense.backward(&r).unwrap();
    let params = dense.parameters();
    let w = params.get(ParamId::Weights).unwrap();
    let analytic = w.grad.as_ref().unwrap().to_vec();
    let wv = w.data.to_vec();
    let eps = 1e-2;
    for i in 0..wv.len() {
        let mut plus = wv.clone();
        plus[i] += eps;
        dense
            .set_param(ParamId::Weights, Parameter::new(Tensor::from_data([4, 3], plus).unwrap()))
            .unwrap();
        let lp = projected_loss(&mut dense, &x, &rv);
        let mut minus = wv.clone();
        minus[i] -= eps;
        dense
            .set_param(ParamId::Weights, Parameter::new(Tensor::from_data([4, 3], minus).unwrap()))
            .unwrap();
        let lm = projected_loss(&mut dense, &x, &rv);
        assert_close(analytic[i], (lp - lm) / (2.0 * eps), &format!("weight[{i}]"));
    }
}

#[test]
fn conv2d_input_gradient_matches_central_differences() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut conv = Conv2D::new(
        ConvConfig::new(2, 3, &[3, 3]).with_padding(&[1, 1]).with_seed(9),
    )
    .unwrap();
    let x = random_tensor(&[1, 2, 4, 4], &mut rng);
    conv.init(x.shape()).unwrap();
    check_input_gradient(&mut conv, &x, &mut rng, 1e-2);
}

#[test]
fn tanh_and_softmax_gradients_match_central_differences() {
    let mut rng = StdRng::seed_from_u64(21);
    let x = random_tensor(&[2, 5], &mut rng);

    let mut tanh = Tanh::new();
    tanh.init(x.shape()).unwrap();
    check_input_gradient(&mut tanh, &x, &mut rng, 1e-3);

    let mut softmax = Softmax::default();
    softmax.init(x.shape()).unwrap();
    check_input_gradient(&mut softmax, &x, &mut rng, 1e-3);
}

#[test]
fn batch_norm_training_gradients_match_central_differences() {
    let mut rng = StdRng::seed_from_u64(31);
    let mut bn = BatchNorm2D::new(BatchNormConfig::new(2)).unwrap();
    let x = random_tensor(&[3, 2, 2, 2], &mut rng);
    bn.init(x.shape()).unwrap();
    let gamma = random_tensor(&[2], &mut rng);
    bn.set_param(ParamId::Gamma, Parameter::new(gamma)).unwrap();

    check_input_gradient(&mut bn, &x, &mut rng, 5e-3);
    check_param_gradient(&mut bn, &x, ParamId::Gamma, &mut rng, 5e-3);
    check_param_gradient(&mut bn, &x, ParamId::Beta, &mut rng, 5e-3);
}

#[test]
fn batch_norm_inference_gradient_matches_central_differences() {
    let mut rng = StdRng::seed_from_u64(32);
    let mut bn = BatchNorm2D::new(BatchNormConfig::new(3)).unwrap();
    let x = random_tensor(&[2, 3], &mut rng);
    bn.init(x.shape()).unwrap();
    bn.set_param(ParamId::RunningMean, Parameter::new(Tensor::from_slice([3], &[0.1, -0.2, 0.3]).unwrap()))
        .unwrap();
    bn.set_param(ParamId::RunningVar, Parameter::new(Tensor::from_slice([3], &[0.5, 2.0, 1.5]).unwrap()))
        .unwrap();
    bn.set_training(false);

    check_input_gradient(&mut bn, &x, &mut rng, 1e-2);
    check_param_gradient(&mut bn, &x, ParamId::Gamma, &mut rng, 1e-2);
}

#[test]
fn layer_norm_gradients_match_central_differences() {
    let mut rng = StdRng::seed_from_u64(33);
    let mut ln = LayerNorm::new(LayerNormConfig::new(4)).unwrap();
    let x = random_tensor(&[3, 4], &mut rng);
    ln.init(x.shape()).unwrap();
    let gamma = random_tensor(&[4], &mut rng);
    ln.set_param(ParamId::Gamma, Parameter::new(gamma)).unwrap();

    check_input_gradient(&mut ln, &x, &mut rng, 5e-3);
    check_param_gradient(&mut ln, &x, ParamId::Gamma, &mut rng, 5e-3);
    check_param_gradient(&mut ln, &x, ParamId::Beta, &mut rng, 5e-3);
}

// ── Activation edge cases ──────────────────────────────────────

#[test]
fn relu_derivative_at_zero_is_zero() {
    let mut relu = ReLU::new();
    let x = Tensor::zeros([3]);
    relu.init(x.shape()).unwrap();
    relu.forward(&x).unwrap();
    let gi = relu.backward(&Tensor::full([3], 7.0)).unwrap();
    assert_eq!(gi.to_vec(), vec![0.0; 3]);
}

#[test]
fn softmax_is_shift_invariant() {
    let x = Tensor::from_slice([2, 3], &[1.0, 2.0, 3.0, -4.0, 0.5, 2.0]).unwrap();
    let mut shifted = Tensor::zeros([2, 3]);
    shifted.add_scalar(&x, 100.0).unwrap();

    let mut a = Softmax::default();
    let mut b = Softmax::default();
    a.init(x.shape()).unwrap();
    b.init(x.shape()).unwrap();
    let ya = a.forward(&x).unwrap().to_vec();
    let yb = b.forward(&shifted).unwrap().to_vec();
    for (p, q) in ya.iter().zip(&yb) {
        assert!((p - q).abs() < 1e-6, "{p} vs {q}");
    }
    let row: f32 = ya[..3].iter().sum();
    assert!((row - 1.0).abs() < 1e-6);
}

// ── Dropout statistics ─────────────────────────────────────────

#[test]
fn dropout_preserves_expectation() {
    const N: usize = 100_000;
    let rate = 0.3;
    let mut dropout = Dropout::new(DropoutConfig::new(rate).with_seed(2024)).unwrap();
    let x = Tensor::full([N], 1.0);
    dropout.init(x.shape()).unwrap();
    let y = dropout.forward(&x).unwrap().to_vec();

    let dropped = y.iter().filter(|&&v| v == 0.0).count() as f32 / N as f32;
    assert!((dropped - rate).abs() < 0.01, "dropped fraction {dropped}");
    let mean = y.iter().map(|&v| f64::from(v)).sum::<f64>() / N as f64;
    assert!((mean - 1.0).abs() < 0.01, "mean {mean}");

    dropout.set_training(false);
    assert_eq!(dropout.forward(&x).unwrap().to_vec(), x.to_vec());
}

// ── Normalization modes ────────────────────────────────────────

#[test]
fn batch_norm_converges_to_data_statistics() {
    let mut rng = StdRng::seed_from_u64(34);
    let mut bn = BatchNorm2D::new(BatchNormConfig::new(1).with_momentum(0.5)).unwrap();
    // Channel values 2 + 3·u with u uniform in [-1, 1].
    let u = random_tensor(&[64, 1], &mut rng).to_vec();
    let x = Tensor::from_data([64, 1], u.iter().map(|v| 2.0 + 3.0 * v).collect()).unwrap();
    bn.init(x.shape()).unwrap();
    for _ in 0..30 {
        bn.forward(&x).unwrap();
    }
    let train = bn.forward(&x).unwrap().to_vec();

    bn.set_training(false);
    let infer = bn.forward(&x).unwrap().to_vec();
    // Running variance is unbiased, so inference differs by sqrt(63/64).
    for (t, i) in train.iter().zip(&infer) {
        assert!((t * (63.0f32 / 64.0).sqrt() - i).abs() < 1e-3, "{t} vs {i}");
    }
}

// ── Lifecycle ──────────────────────────────────────────────────

#[test]
fn lifecycle_errors_are_reported() {
    let mut dense = Dense::new(DenseConfig::new(2, 2)).unwrap();
    let x = Tensor::zeros([1, 2]);
    assert_eq!(dense.state(), LayerState::Uninitialised);
    assert!(matches!(dense.forward(&x), Err(LayerError::Lifecycle { .. })));

    dense.init(x.shape()).unwrap();
    assert!(matches!(
        dense.backward(&Tensor::zeros([1, 2])),
        Err(LayerError::Lifecycle { .. })
    ));
    assert!(matches!(
        dense.forward(&Tensor::zeros([3, 2])),
        Err(LayerError::Lifecycle { .. })
    ));

    dense.forward(&x).unwrap();
    dense.backward(&Tensor::zeros([1, 2])).unwrap();
    assert_eq!(dense.state(), LayerState::Backwarded);
    // A second backward after the same forward is allowed.
    dense.backward(&Tensor::zeros([1, 2])).unwrap();
}

// ── Small pipelines ────────────────────────────────────────────

#[test]
fn conv_pool_flatten_chain() {
    let mut conv = Conv2D::new(ConvConfig::new(1, 1, &[1, 1]).with_bias(false)).unwrap();
    let mut pool = MaxPool2D::new(PoolConfig::new([2, 2])).unwrap();
    let mut flat = Flatten::new();

    let x = Tensor::from_data([1, 1, 4, 4], (0..16).map(|v| v as f32).collect()).unwrap();
    conv.init(x.shape()).unwrap();
    conv.set_param(ParamId::Weights, Parameter::new(Tensor::full([1, 1, 1, 1], 1.0)))
        .unwrap();
    let pooled_shape = conv.output_shape(x.shape()).unwrap();
    pool.init(&pooled_shape).unwrap();
    let flat_in = pool.output_shape(&pooled_shape).unwrap();
    flat.init(&flat_in).unwrap();

    let y = conv.forward(&x).unwrap().clone();
    let p = pool.forward(&y).unwrap().clone();
    let f = flat.forward(&p).unwrap();
    assert_eq!(f.dims(), &[1, 4]);
    assert_eq!(f.to_vec(), vec![5.0, 7.0, 13.0, 15.0]);

    let g = flat.backward(&Tensor::full([1, 4], 1.0)).unwrap().clone();
    let g = pool.backward(&g).unwrap().clone();
    let gi = conv.backward(&g).unwrap().to_vec();
    let hot: Vec<usize> = gi.iter().enumerate().filter(|(_, &v)| v != 0.0).map(|(i, _)| i).collect();
    assert_eq!(hot, vec![5, 7, 13, 15]);
}
