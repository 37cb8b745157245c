// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Training profiling metrics.
//!
//! [`TrainingMetrics`] collects per-layer forward/backward timings, the
//! loss of every epoch and aggregate step counts for one model.

use std::time::Duration;

/// Timings for a single layer, summed over every recorded call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerMetrics {
    pub layer_name: String,
    pub forward_duration: Duration,
    pub backward_duration: Duration,
    /// Forward calls recorded.
    pub calls: usize,
}

/// Aggregate metrics for a model's training run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainingMetrics {
    pub model_name: String,
    /// Wall-clock time set by [`finalise`](Self::finalise).
    pub total_duration: Duration,
    /// Optimizer steps taken.
    pub steps: usize,
    /// Mean loss of each completed epoch.
    pub epoch_losses: Vec<f32>,
    pub layer_metrics: Vec<LayerMetrics>,
}

impl TrainingMetrics {
    /// Creates an empty container with one entry per layer.
    pub fn new<I, S>(model_name: impl Into<String>, layer_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model_name: model_name.into(),
            total_duration: Duration::ZERO,
            steps: 0,
            epoch_losses: Vec::new(),
            layer_metrics: layer_names
                .into_iter()
                .map(|name| LayerMetrics {
                    layer_name: name.into(),
                    forward_duration: Duration::ZERO,
                    backward_duration: Duration::ZERO,
                    calls: 0,
                })
                .collect(),
        }
    }

    pub fn record_forward(&mut self, index: usize, elapsed: Duration) {
        if let Some(m) = self.layer_metrics.get_mut(index) {
            m.forward_duration += elapsed;
            m.calls += 1;
        }
    }

    pub fn record_backward(&mut self, index: usize, elapsed: Duration) {
        if let Some(m) = self.layer_metrics.get_mut(index) {
            m.backward_duration += elapsed;
        }
    }

    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    pub fn record_epoch(&mut self, loss: f32) {
        self.epoch_losses.push(loss);
    }

    /// Sets the total wall-clock time of the run.
    pub fn finalise(&mut self, total: Duration) {
        self.total_duration = total;
    }

    pub fn total_forward(&self) -> Duration {
        self.layer_metrics.iter().map(|m| m.forward_duration).sum()
    }

    pub fn total_backward(&self) -> Duration {
        self.layer_metrics.iter().map(|m| m.backward_duration).sum()
    }

    /// Loss of the last completed epoch.
    pub fn last_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }

    /// Returns a one-line human-readable summary.
    pub fn summary(&self) -> String {
        let loss = match self.last_loss() {
            Some(l) => format!("{l:.6}"),
            None => "n/a".to_string(),
        };
        format!(
            "Training '{}': {:.2}ms total, {} layers, {} epochs, {} steps, \
             {:.2}ms forward, {:.2}ms backward, last loss {}",
            self.model_name,
            self.total_duration.as_secs_f64() * 1000.0,
            self.layer_metrics.len(),
            self.epoch_losses.len(),
            self.steps,
            self.total_forward().as_secs_f64() * 1000.0,
            self.total_backward().as_secs_f64() * 1000.0,
            loss,
        )
    }

    /// Exports the record as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
