use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::priors::PriorWeights;

/// Construction-time configuration of the representation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Shape of a single raw observation; observations are stored flattened.
    pub obs_shape: Vec<usize>,
    /// Dimensionality of the learned state vectors.
    pub state_dim: usize,
    pub learning_rate: f64,
    pub l1_reg: f64,
    pub weights: PriorWeights,
    /// Hidden tanh units; `None` keeps the encoder strictly linear.
    pub hidden_units: Option<usize>,
    /// Stddev of Gaussian noise injected on inputs during training only.
    pub noise_stddev: f64,
    pub seed: u64,
}

impl ModelConfig {
    pub fn new(obs_shape: Vec<usize>, state_dim: usize) -> Self {
        Self {
            obs_shape,
            state_dim,
            learning_rate: 1e-4,
            l1_reg: 1e-3,
            weights: PriorWeights::default(),
            hidden_units: None,
            noise_stddev: 1e-6,
            seed: 0,
        }
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_shape.iter().product()
    }

    pub fn validate(&self) -> Result<()> {
        if self.obs_shape.is_empty() || self.obs_dim() == 0 {
            return Err(Error::config("observation shape must be non-empty"));
        }
        if self.state_dim == 0 {
            return Err(Error::config("state_dim must be at least 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::config("learning_rate must be positive"));
        }
        if !(self.l1_reg.is_finite() && self.l1_reg >= 0.0) {
            return Err(Error::config("l1_reg must be non-negative"));
        }
        if !(self.noise_stddev.is_finite() && self.noise_stddev >= 0.0) {
            return Err(Error::config("noise_stddev must be non-negative"));
        }
        if self.hidden_units == Some(0) {
            return Err(Error::config("hidden_units must be absent or positive"));
        }
        self.weights.validate()
    }
}

/// Configuration of the outer experiment loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub num_epochs: usize,
    pub batch_size: usize,
    /// Fraction of records held out for validation, open interval (0, 1).
    pub validation_ratio: f64,
    pub seed: u64,
    /// Run the Q-learning state evaluation after each training epoch.
    pub qlearning: bool,
    pub n_qlearnings: usize,
    pub n_test_episodes: usize,
    pub n_test_steps: usize,
    pub n_rbf: usize,
    pub discount: f64,
    pub q_iterations: usize,
    /// Recompute the RBF mapping on every trial instead of reusing it.
    pub recompute_mapping: bool,
    pub record_to: Option<PathBuf>,
    pub display: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            num_epochs: 25,
            batch_size: 256,
            validation_ratio: 0.1,
            seed: 0,
            qlearning: false,
            n_qlearnings: 10,
            n_test_episodes: 20,
            n_test_steps: 25,
            n_rbf: 100,
            discount: 0.9,
            q_iterations: 10,
            recompute_mapping: true,
            record_to: None,
            display: false,
        }
    }
}

impl ExperimentConfig {
    /// Fail-fast validation, run before any training begins.
    pub fn validate(&self) -> Result<()> {
        if !(self.validation_ratio > 0.0 && self.validation_ratio < 1.0) {
            return Err(Error::config(
                "validation_ratio must lie in the open interval (0, 1)",
            ));
        }
        if self.record_to.is_none() && !self.display {
            return Err(Error::config(
                "select a recording destination, display output, or both",
            ));
        }
        if self.qlearning && self.record_to.is_none() {
            return Err(Error::config(
                "q-learning evaluation requires a recording destination",
            ));
        }
        if self.num_epochs == 0 {
            return Err(Error::config("num_epochs must be at least 1"));
        }
        if self.batch_size < 2 {
            return Err(Error::config("batch_size must be at least 2 for pair sampling"));
        }
        if !(self.discount >= 0.0 && self.discount < 1.0) {
            return Err(Error::config("discount must lie in [0, 1)"));
        }
        if self.qlearning {
            for (name, v) in [
                ("n_qlearnings", self.n_qlearnings),
                ("n_test_episodes", self.n_test_episodes),
                ("n_test_steps", self.n_test_steps),
                ("n_rbf", self.n_rbf),
                ("q_iterations", self.q_iterations),
            ] {
                if v == 0 {
                    return Err(Error::config(format!("{name} must be at least 1")));
                }
            }
        }
        Ok(())
    }
}
