// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Training configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! learning_rate = 0.01
//! epochs = 50
//! optimizer = "adam"
//! loss = "categorical-cross-entropy"
//! from_logits = true
//! seed = 7
//! log_every = 10
//! enable_profiling = true
//! ```

use std::path::Path;

use crate::{Adam, Loss, Momentum, Optimizer, RuntimeError, Sgd};

/// Configuration for [`Sequential::fit`](crate::Sequential::fit).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f32,
    pub epochs: usize,
    /// Optimizer name: `"sgd"`, `"momentum"` or `"adam"`.
    pub optimizer: String,
    /// Momentum coefficient (`"momentum"` only).
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    #[serde(default = "default_beta1")]
    pub beta1: f32,
    #[serde(default = "default_beta2")]
    pub beta2: f32,
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
    /// L2 penalty (`"sgd"` only).
    #[serde(default)]
    pub weight_decay: f32,
    /// Loss name: `"mse"`, `"cross-entropy"` or `"categorical-cross-entropy"`.
    pub loss: String,
    /// Whether the categorical loss receives logits.
    #[serde(default)]
    pub from_logits: bool,
    /// Seeds the per-epoch shuffle; samples keep their order without it.
    pub seed: Option<u64>,
    /// Epochs between progress logs; 0 disables them.
    #[serde(default = "default_log_every")]
    pub log_every: usize,
    /// Whether to collect per-layer timings.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
    /// Number of worker threads (defaults to number of online CPU cores).
    pub num_threads: Option<usize>,
}

fn default_true() -> bool {
    true
}

fn default_momentum() -> f32 {
    0.9
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

fn default_log_every() -> usize {
    1
}

impl TrainingConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str).map_err(|e| RuntimeError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::Config(format!("TOML serialise error: {e}")))
    }

    /// Resolves the number of worker threads.
    pub fn resolve_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Creates the optimizer specified by this config.
    pub fn create_optimizer(&self) -> Result<Box<dyn Optimizer>, RuntimeError> {
        match self.optimizer.to_lowercase().as_str() {
            "sgd" => Ok(Box::new(
                Sgd::new(self.learning_rate)?.with_weight_decay(self.weight_decay),
            )),
            "momentum" => Ok(Box::new(Momentum::new(self.learning_rate, self.momentum)?)),
            "adam" => Ok(Box::new(Adam::new(
                self.learning_rate,
                self.beta1,
                self.beta2,
                self.epsilon,
            )?)),
            other => Err(RuntimeError::Config(format!(
                "unknown optimizer '{other}'; expected 'sgd', 'momentum', or 'adam'"
            ))),
        }
    }

    /// Creates the loss specified by this config.
    pub fn create_loss(&self) -> Result<Loss, RuntimeError> {
        match self.loss.to_lowercase().as_str() {
            "mse" => Ok(Loss::Mse),
            "cross-entropy" => Ok(Loss::CrossEntropy),
            "categorical-cross-entropy" | "categorical" => Ok(Loss::CategoricalCrossEntropy {
                from_logits: self.from_logits,
            }),
            other => Err(RuntimeError::Config(format!(
                "unknown loss '{other}'; expected 'mse', 'cross-entropy', or 'categorical-cross-entropy'"
            ))),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epochs: 10,
            optimizer: "sgd".to_string(),
            momentum: default_momentum(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
            weight_decay: 0.0,
            loss: "mse".to_string(),
            from_logits: false,
            seed: None,
            log_every: default_log_every(),
            enable_profiling: true,
            num_threads: None,
        }
    }
}
