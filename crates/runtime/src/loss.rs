// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Loss functions and the single training step.

use serde::{Deserialize, Serialize};
use tensor_core::{Tensor, TensorError, UnaryOp};

use crate::{Optimizer, Ready, RuntimeError, Sequential};

/// Floor applied to probabilities before taking their logarithm.
pub const PROB_FLOOR: f32 = 1e-7;

/// A loss over a prediction and a target of the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Loss {
    /// `mean((p − t)²)`.
    Mse,
    /// `−Σ t·ln(max(p, ε))` over probabilities.
    CrossEntropy,
    /// Cross-entropy over the last axis, divided by the batch size.
    /// With `from_logits` the prediction holds unnormalised scores.
    CategoricalCrossEntropy { from_logits: bool },
}

fn check_operands(op: &'static str, pred: &Tensor, target: &Tensor) -> Result<(), TensorError> {
    if pred.shape() != target.shape() {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: pred.shape().clone(),
            rhs: target.shape().clone(),
        });
    }
    if pred.shape().num_elements() == 0 {
        return Err(TensorError::UnsupportedOperation {
            op,
            detail: "empty prediction".to_string(),
        });
    }
    Ok(())
}

/// `dst = −t / max(p, ε)`.
fn neg_target_over_prob(dst: &mut Tensor, pred: &Tensor, target: &Tensor) -> Result<(), TensorError> {
    dst.clamp(pred, PROB_FLOOR, f32::INFINITY)?
        .map_(UnaryOp::Reciprocal)?
        .mul_(target)?
        .neg_()?;
    Ok(())
}

/// Rows of the last axis: `(rows, row_len)`.
fn rows(pred: &Tensor) -> (usize, usize) {
    let row_len = pred.dims().last().copied().unwrap_or(1).max(1);
    (pred.shape().num_elements() / row_len, row_len)
}

/// `Σ t·ln(softmax(x))` for one row, through a stable log-sum-exp.
fn row_log_likelihood(x: &[f32], t: &[f32]) -> f32 {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let lse = max + x.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
    x.iter().zip(t).map(|(&v, &t)| t * (v - lse)).sum()
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::Mse => "mse",
            Loss::CrossEntropy => "cross-entropy",
            Loss::CategoricalCrossEntropy { .. } => "categorical-cross-entropy",
        }
    }

    /// Scalar loss of `pred` against `target`.
    pub fn compute(&self, pred: &Tensor, target: &Tensor) -> Result<f32, RuntimeError> {
        check_operands(self.name(), pred, target)?;
        let p = pred.contiguous();
        let t = target.contiguous();
        let pv = p.data()?;
        let tv = t.data()?;
        let value = match *self {
            Loss::Mse => {
                let sum: f32 = pv.iter().zip(tv.iter()).map(|(p, t)| (p - t) * (p - t)).sum();
                sum / pv.len() as f32
            }
            Loss::CrossEntropy => -pv
                .iter()
                .zip(tv.iter())
                .map(|(&p, &t)| t * p.max(PROB_FLOOR).ln())
                .sum::<f32>(),
            Loss::CategoricalCrossEntropy { from_logits } => {
                let (batch, row_len) = rows(pred);
                let total: f32 = if from_logits {
                    pv.chunks(row_len)
                        .zip(tv.chunks(row_len))
                        .map(|(x, t)| row_log_likelihood(x, t))
                        .sum()
                } else {
                    pv.iter()
                        .zip(tv.iter())
                        .map(|(&p, &t)| t * p.max(PROB_FLOOR).ln())
                        .sum()
                };
                -total / batch as f32
            }
        };
        Ok(value)
    }

    /// Writes `∂loss/∂pred` into `dst`, which must have the prediction's
    /// shape.
    pub fn gradient(&self, pred: &Tensor, target: &Tensor, dst: &mut Tensor) -> Result<(), RuntimeError> {
        let op = self.name();
        check_operands(op, pred, target)?;
        if dst.shape() != pred.shape() {
            return Err(TensorError::ShapeMismatch {
                op,
                lhs: dst.shape().clone(),
                rhs: pred.shape().clone(),
            }
            .into());
        }
        match *self {
            Loss::Mse => {
                let n = pred.shape().num_elements() as f32;
                dst.sub(pred, target)?.scale_(2.0 / n)?;
            }
            Loss::CrossEntropy => {
                neg_target_over_prob(dst, pred, target)?;
            }
            Loss::CategoricalCrossEntropy { from_logits } => {
                let (batch, _) = rows(pred);
                if from_logits {
                    dst.softmax(pred, -1)?.sub_(target)?;
                } else {
                    neg_target_over_prob(dst, pred, target)?;
                }
                dst.scale_(1.0 / batch as f32)?;
            }
        }
        Ok(())
    }
}

/// One optimisation step:
/// `zero_grad → forward → loss → gradient → backward → update`.
///
/// Returns the loss before the update.
pub fn train_step(
    model: &mut Sequential<Ready>,
    optimizer: &mut dyn Optimizer,
    loss: &Loss,
    input: &Tensor,
    target: &Tensor,
) -> Result<f32, RuntimeError> {
    model.zero_grad()?;
    model.forward(input)?;
    let value = {
        let (pred, grad) = model.loss_operands()?;
        let value = loss.compute(pred, target)?;
        loss.gradient(pred, target, grad)?;
        value
    };
    model.backward_from_loss()?;
    model.update(optimizer)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_mse() {
        let p = Tensor::from_slice([2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let t = Tensor::from_slice([2, 2], &[1.0, 0.0, 3.0, 2.0]).unwrap();
        assert_eq!(Loss::Mse.compute(&p, &t).unwrap(), 2.0);
        let mut g = Tensor::zeros([2, 2]);
        Loss::Mse.gradient(&p, &t, &mut g).unwrap();
        assert_eq!(g.to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_cross_entropy_on_probabilities() {
        let p = Tensor::from_slice([3], &[0.2, 0.5, 0.3]).unwrap();
        let t = Tensor::from_slice([3], &[0.0, 1.0, 0.0]).unwrap();
        let l = Loss::CrossEntropy.compute(&p, &t).unwrap();
        assert!((l - 0.5f32.ln().abs()).abs() < 1e-6);
        let mut g = Tensor::zeros([3]);
        Loss::CrossEntropy.gradient(&p, &t, &mut g).unwrap();
        assert!(approx_eq(&g.to_vec(), &[0.0, -2.0, 0.0], 1e-6));
    }

    #[test]
    fn test_cross_entropy_floors_zero_probability() {
        let p = Tensor::from_slice([2], &[0.0, 1.0]).unwrap();
        let t = Tensor::from_slice([2], &[1.0, 0.0]).unwrap();
        let l = Loss::CrossEntropy.compute(&p, &t).unwrap();
        assert!(l.is_finite());
        assert!((l + PROB_FLOOR.ln()).abs() < 1e-3);
    }

    #[test]
    fn test_categorical_from_logits_matches_softmax_minus_target() {
        let loss = Loss::CategoricalCrossEntropy { from_logits: true };
        let x = Tensor::from_slice([2, 3], &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]).unwrap();
        let t = Tensor::from_slice([2, 3], &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0]).unwrap();
        let l = loss.compute(&x, &t).unwrap();
        // -(ln 0.6652 + ln 0.0900) / 2
        assert!((l - 1.4076).abs() < 1e-3, "{l}");

        let mut g = Tensor::zeros([2, 3]);
        loss.gradient(&x, &t, &mut g).unwrap();
        let g = g.to_vec();
        let expected = [0.0450, 0.1224, -0.1674, -0.4550, 0.1224, 0.3326];
        assert!(approx_eq(&g, &expected, 1e-3), "{g:?}");
    }

    #[test]
    fn test_categorical_on_probabilities_divides_by_batch() {
        let loss = Loss::CategoricalCrossEntropy { from_logits: false };
        let p = Tensor::from_slice([2, 2], &[0.5, 0.5, 0.25, 0.75]).unwrap();
        let t = Tensor::from_slice([2, 2], &[1.0, 0.0, 0.0, 1.0]).unwrap();
        let l = loss.compute(&p, &t).unwrap();
        assert!((l - (-(0.5f32.ln() + 0.75f32.ln()) / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_shape_errors() {
        let p = Tensor::zeros([2]);
        let t = Tensor::zeros([3]);
        assert!(matches!(
            Loss::Mse.compute(&p, &t),
            Err(RuntimeError::Loss(TensorError::ShapeMismatch { .. }))
        ));
        let mut g = Tensor::zeros([3]);
        assert!(Loss::Mse.gradient(&p, &p, &mut g).is_err());
    }
}
