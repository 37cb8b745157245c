// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batch and layer normalization over contiguous buffers.
//!
//! Batch normalization views its operand as `N × C × plane` and keeps one
//! statistic per channel `C`; layer normalization views it as
//! `rows × len` and keeps one per row. Forward kernels take the mean and
//! inverse standard deviation as inputs or outputs, so backward kernels
//! rebuild `x̂ = (x − mean) · inv_std` from the stored input instead of a
//! saved copy.

use crate::error::check_len;
use crate::KernelError;

fn check_positive(op: &'static str, dims: &[(&str, usize)]) -> Result<(), KernelError> {
    for &(name, value) in dims {
        if value == 0 {
            return Err(KernelError::DegenerateShape {
                op,
                detail: format!("{name} must be positive"),
            });
        }
    }
    Ok(())
}

// ── Batch normalization ────────────────────────────────────────

/// Per-channel mean and biased variance of an `N × C × plane` buffer.
pub fn channel_moments(
    mean: &mut [f32],
    var: &mut [f32],
    x: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
) -> Result<(), KernelError> {
    const OP: &str = "channel_moments";
    check_positive(OP, &[("batch", batch), ("channels", channels), ("plane", plane)])?;
    check_len(OP, "x", x.len(), batch * channels * plane)?;
    check_len(OP, "mean", mean.len(), channels)?;
    check_len(OP, "var", var.len(), channels)?;

    let count = (batch * plane) as f32;
    for c in 0..channels {
        let mut sum = 0.0f32;
        for n in 0..batch {
            let start = (n * channels + c) * plane;
            sum += x[start..start + plane].iter().sum::<f32>();
        }
        let m = sum / count;
        let mut sq = 0.0f32;
        for n in 0..batch {
            let start = (n * channels + c) * plane;
            sq += x[start..start + plane].iter().map(|&v| (v - m) * (v - m)).sum::<f32>();
        }
        mean[c] = m;
        var[c] = sq / count;
    }
    Ok(())
}

/// `y = gamma[c] · (x − mean[c]) · inv_std[c] + beta[c]`.
pub fn channel_normalize(
    y: &mut [f32],
    x: &[f32],
    mean: &[f32],
    inv_std: &[f32],
    gamma: &[f32],
    beta: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
) -> Result<(), KernelError> {
    const OP: &str = "channel_normalize";
    let total = batch * channels * plane;
    check_len(OP, "y", y.len(), total)?;
    check_len(OP, "x", x.len(), total)?;
    for (name, len) in [("mean", mean.len()), ("inv_std", inv_std.len()), ("gamma", gamma.len()), ("beta", beta.len())] {
        check_len(OP, name, len, channels)?;
    }
    for n in 0..batch {
        for c in 0..channels {
            let start = (n * channels + c) * plane;
            let (m, s, g, b) = (mean[c], inv_std[c], gamma[c], beta[c]);
            for (out, &v) in y[start..start + plane].iter_mut().zip(&x[start..start + plane]) {
                *out = g * (v - m) * s + b;
            }
        }
    }
    Ok(())
}

/// Gradients of [`channel_normalize`].
///
/// With `batch_stats` the mean and variance are treated as functions of
/// `x` (training mode); otherwise as constants (running statistics).
/// `grad_gamma` and `grad_beta` accumulate.
pub fn channel_normalize_backward(
    grad_x: &mut [f32],
    mut grad_gamma: Option<&mut [f32]>,
    mut grad_beta: Option<&mut [f32]>,
    grad_y: &[f32],
    x: &[f32],
    mean: &[f32],
    inv_std: &[f32],
    gamma: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
    batch_stats: bool,
) -> Result<(), KernelError> {
    const OP: &str = "channel_normalize_backward";
    check_positive(OP, &[("batch", batch), ("channels", channels), ("plane", plane)])?;
    let total = batch * channels * plane;
    check_len(OP, "grad_x", grad_x.len(), total)?;
    check_len(OP, "grad_y", grad_y.len(), total)?;
    check_len(OP, "x", x.len(), total)?;
    for (name, len) in [("mean", mean.len()), ("inv_std", inv_std.len()), ("gamma", gamma.len())] {
        check_len(OP, name, len, channels)?;
    }
    if let Some(g) = &grad_gamma {
        check_len(OP, "grad_gamma", g.len(), channels)?;
    }
    if let Some(g) = &grad_beta {
        check_len(OP, "grad_beta", g.len(), channels)?;
    }

    let count = (batch * plane) as f32;
    for c in 0..channels {
        let (m, s) = (mean[c], inv_std[c]);
        let mut sum_dy = 0.0f32;
        let mut sum_dy_xhat = 0.0f32;
        for n in 0..batch {
            let start = (n * channels + c) * plane;
            for (&dy, &v) in grad_y[start..start + plane].iter().zip(&x[start..start + plane]) {
                sum_dy += dy;
                sum_dy_xhat += dy * (v - m) * s;
            }
        }
        if let Some(g) = grad_gamma.as_deref_mut() {
            g[c] += sum_dy_xhat;
        }
        if let Some(g) = grad_beta.as_deref_mut() {
            g[c] += sum_dy;
        }

        let scale = gamma[c] * s;
        for n in 0..batch {
            let start = (n * channels + c) * plane;
            let rows = grad_x[start..start + plane]
                .iter_mut()
                .zip(&grad_y[start..start + plane])
                .zip(&x[start..start + plane]);
            for ((out, &dy), &v) in rows {
                *out = if batch_stats {
                    let x_hat = (v - m) * s;
                    scale * (dy - sum_dy / count - x_hat * sum_dy_xhat / count)
                } else {
                    scale * dy
                };
            }
        }
    }
    Ok(())
}

// ── Layer normalization ────────────────────────────────────────

/// Normalizes each row of a `rows × len` buffer, then applies the
/// per-column affine `gamma`, `beta`.
///
/// When `stats` is given, the row means and inverse standard deviations
/// are written to it for [`layer_norm_backward`].
pub fn layer_norm(
    y: &mut [f32],
    x: &[f32],
    gamma: &[f32],
    beta: &[f32],
    eps: f32,
    rows: usize,
    len: usize,
    mut stats: Option<(&mut [f32], &mut [f32])>,
) -> Result<(), KernelError> {
    const OP: &str = "layer_norm";
    check_positive(OP, &[("rows", rows), ("len", len)])?;
    check_len(OP, "y", y.len(), rows * len)?;
    check_len(OP, "x", x.len(), rows * len)?;
    check_len(OP, "gamma", gamma.len(), len)?;
    check_len(OP, "beta", beta.len(), len)?;
    if let Some((mean, inv_std)) = &stats {
        check_len(OP, "mean", mean.len(), rows)?;
        check_len(OP, "inv_std", inv_std.len(), rows)?;
    }

    for r in 0..rows {
        let src = &x[r * len..(r + 1) * len];
        let dst = &mut y[r * len..(r + 1) * len];
        let mean = src.iter().sum::<f32>() / len as f32;
        let var = src.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / len as f32;
        let inv_std = 1.0 / (var + eps).sqrt();
        for j in 0..len {
            dst[j] = gamma[j] * (src[j] - mean) * inv_std + beta[j];
        }
        if let Some((m, s)) = stats.as_mut() {
            m[r] = mean;
            s[r] = inv_std;
        }
    }
    Ok(())
}

/// Gradients of [`layer_norm`] given the statistics it recorded.
/// `grad_gamma` and `grad_beta` accumulate.
pub fn layer_norm_backward(
    grad_x: &mut [f32],
    mut grad_gamma: Option<&mut [f32]>,
    mut grad_beta: Option<&mut [f32]>,
    grad_y: &[f32],
    x: &[f32],
    mean: &[f32],
    inv_std: &[f32],
    gamma: &[f32],
    rows: usize,
    len: usize,
) -> Result<(), KernelError> {
    const OP: &str = "layer_norm_backward";
    check_positive(OP, &[("rows", rows), ("len", len)])?;
    for (name, n) in [("grad_x", grad_x.len()), ("grad_y", grad_y.len()), ("x", x.len())] {
        check_len(OP, name, n, rows * len)?;
    }
    check_len(OP, "mean", mean.len(), rows)?;
    check_len(OP, "inv_std", inv_std.len(), rows)?;
    check_len(OP, "gamma", gamma.len(), len)?;
    if let Some(g) = &grad_gamma {
        check_len(OP, "grad_gamma", g.len(), len)?;
    }
    if let Some(g) = &grad_beta {
        check_len(OP, "grad_beta", g.len(), len)?;
    }

    let n = len as f32;
    for r in 0..rows {
        let span = r * len..(r + 1) * len;
        let (dy, src) = (&grad_y[span.clone()], &x[span.clone()]);
        let (m, s) = (mean[r], inv_std[r]);

        let mut sum_d = 0.0f32;
        let mut sum_d_xhat = 0.0f32;
        for j in 0..len {
            let x_hat = (src[j] - m) * s;
            let d = dy[j] * gamma[j];
            sum_d += d;
            sum_d_xhat += d * x_hat;
            if let Some(g) = grad_gamma.as_deref_mut() {
                g[j] += dy[j] * x_hat;
            }
            if let Some(g) = grad_beta.as_deref_mut() {
                g[j] += dy[j];
            }
        }
        let out = &mut grad_x[span];
        for j in 0..len {
            let x_hat = (src[j] - m) * s;
            out[j] = s * (dy[j] * gamma[j] - sum_d / n - x_hat * sum_d_xhat / n);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_channel_moments() {
        // N=2, C=2, plane=2.
        let x = [1.0, 3.0, 10.0, 10.0, 5.0, 7.0, 20.0, 40.0];
        let (mut mean, mut var) = ([0.0; 2], [0.0; 2]);
        channel_moments(&mut mean, &mut var, &x, 2, 2, 2).unwrap();
        assert_eq!(mean, [4.0, 20.0]);
        assert_eq!(var, [5.0, 150.0]);
    }

    #[test]
    fn test_channel_normalize_zero_mean_unit_variance() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (mut mean, mut var) = ([0.0; 1], [0.0; 1]);
        channel_moments(&mut mean, &mut var, &x, 2, 1, 3).unwrap();
        let inv_std = [1.0 / (var[0] + 1e-5).sqrt()];
        let mut y = [0.0; 6];
        channel_normalize(&mut y, &x, &mean, &inv_std, &[1.0], &[0.0], 2, 1, 3).unwrap();
        let m: f32 = y.iter().sum::<f32>() / 6.0;
        let v: f32 = y.iter().map(|a| (a - m) * (a - m)).sum::<f32>() / 6.0;
        assert!(m.abs() < 1e-5);
        assert!((v - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_inference_backward_is_a_scale() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let gy = [1.0, -1.0, 0.5, 2.0];
        let mut gx = [0.0; 4];
        channel_normalize_backward(&mut gx, None, None, &gy, &x, &[1.0, 0.0], &[0.5, 2.0], &[2.0, 1.0], 1, 2, 2, false)
            .unwrap();
        assert_eq!(gx, [1.0, -1.0, 1.0, 4.0]);
    }

    #[test]
    fn test_layer_norm_rows() {
        let x = [1.0, 2.0, 3.0, 10.0, 20.0, 30.0];
        let mut y = [0.0; 6];
        let (mut mean, mut inv_std) = ([0.0; 2], [0.0; 2]);
        layer_norm(&mut y, &x, &[1.0; 3], &[0.0; 3], 1e-5, 2, 3, Some((&mut mean, &mut inv_std))).unwrap();
        assert_eq!(mean, [2.0, 20.0]);
        assert!(approx_eq(&y[..3], &y[3..], 1e-4));
        assert!(approx_eq(&y[..3], &[-1.2247, 0.0, 1.2247], 1e-3));
    }

    #[test]
    fn test_constant_row_maps_to_beta() {
        let mut y = [0.0; 3];
        layer_norm(&mut y, &[5.0; 3], &[2.0; 3], &[1.0, 2.0, 3.0], 1e-5, 1, 3, None).unwrap();
        assert!(approx_eq(&y, &[1.0, 2.0, 3.0], 1e-4));
    }

    #[test]
    fn test_layer_norm_backward_sums_to_zero() {
        // The normalized row has zero mean, so input gradients do too.
        let x = [0.3, -1.2, 2.0, 0.7];
        let gy = [1.0, 0.5, -0.25, 2.0];
        let gamma = [1.0; 4];
        let mut y = [0.0; 4];
        let (mut mean, mut inv_std) = ([0.0; 1], [0.0; 1]);
        layer_norm(&mut y, &x, &gamma, &[0.0; 4], 1e-5, 1, 4, Some((&mut mean, &mut inv_std))).unwrap();
        let mut gx = [0.0; 4];
        let (mut gg, mut gb) = ([0.0; 4], [0.0; 4]);
        layer_norm_backward(&mut gx, Some(&mut gg), Some(&mut gb), &gy, &x, &mean, &inv_std, &gamma, 1, 4).unwrap();
        assert!(gx.iter().sum::<f32>().abs() < 1e-5);
        assert_eq!(gb, gy);
        assert!(approx_eq(&gg, &[gy[0] * y[0], gy[1] * y[1], gy[2] * y[2], gy[3] * y[3]], 1e-5));
    }

    #[test]
    fn test_rejects_short_buffers() {
        let mut y = [0.0; 3];
        assert!(layer_norm(&mut y, &[1.0; 4], &[1.0; 2], &[0.0; 2], 1e-5, 2, 2, None).is_err());
        let (mut m, mut v) = ([0.0; 1], [0.0; 1]);
        assert!(matches!(
            channel_moments(&mut m, &mut v, &[1.0; 4], 0, 1, 4),
            Err(KernelError::DegenerateShape { .. })
        ));
    }
}
