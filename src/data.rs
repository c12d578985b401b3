use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Columnar storage of transition records plus environment metadata.
///
/// Records form one contiguous temporal sequence; `episode_starts[t]` marks
/// the first transition of a trajectory. The `env` value holds the opaque
/// construction arguments of the source environment so Q-learning mode can
/// rebuild an equivalent one for rollouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub obs_shape: Vec<usize>,
    pub observations: Vec<Vec<f64>>,
    /// Raw action labels.
    pub actions: Vec<f64>,
    /// Integer-encoded actions, each below `num_actions`.
    pub actions_int: Vec<usize>,
    pub rewards: Vec<f64>,
    pub episode_starts: Vec<bool>,
    pub num_actions: usize,
    pub env: serde_json::Value,
}

impl Dataset {
    pub fn new(obs_shape: Vec<usize>, num_actions: usize, env: serde_json::Value) -> Self {
        Self {
            obs_shape,
            observations: Vec::new(),
            actions: Vec::new(),
            actions_int: Vec::new(),
            rewards: Vec::new(),
            episode_starts: Vec::new(),
            num_actions,
            env,
        }
    }

    pub fn push(
        &mut self,
        observation: Vec<f64>,
        action: f64,
        action_int: usize,
        reward: f64,
        episode_start: bool,
    ) {
        self.observations.push(observation);
        self.actions.push(action);
        self.actions_int.push(action_int);
        self.rewards.push(reward);
        self.episode_starts.push(episode_start);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_shape.iter().product()
    }

    /// Checks the transition contract. Violations are fatal for the run.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        if n == 0 {
            return Err(Error::data("dataset is empty"));
        }
        if self.actions.len() != n
            || self.actions_int.len() != n
            || self.rewards.len() != n
            || self.episode_starts.len() != n
        {
            return Err(Error::data(format!(
                "mismatched column lengths: observations {}, actions {}, actions_int {}, rewards {}, episode_starts {}",
                n,
                self.actions.len(),
                self.actions_int.len(),
                self.rewards.len(),
                self.episode_starts.len()
            )));
        }
        if !self.episode_starts[0] {
            return Err(Error::data("first record must start an episode"));
        }
        let dim = self.obs_dim();
        if dim == 0 {
            return Err(Error::data("observation shape must be non-empty"));
        }
        if let Some(t) = self.observations.iter().position(|o| o.len() != dim) {
            return Err(Error::data(format!(
                "observation {t} has length {} but the declared shape needs {dim}",
                self.observations[t].len()
            )));
        }
        if self.num_actions == 0 {
            return Err(Error::data("num_actions must be at least 1"));
        }
        if let Some(t) = self.actions_int.iter().position(|&a| a >= self.num_actions) {
            return Err(Error::data(format!(
                "actions_int[{t}] = {} exceeds num_actions {}",
                self.actions_int[t], self.num_actions
            )));
        }
        if let Some(t) = self.rewards.iter().position(|r| !r.is_finite()) {
            return Err(Error::data(format!("rewards[{t}] is not finite")));
        }
        Ok(())
    }

    /// Train/validation sizes for a ratio in (0, 1):
    /// `n_val = round(ratio * n)` and `n_train + n_val = n`.
    pub fn split_sizes(&self, validation_ratio: f64) -> Result<(usize, usize)> {
        if !(validation_ratio > 0.0 && validation_ratio < 1.0) {
            return Err(Error::config(
                "validation_ratio must lie in the open interval (0, 1)",
            ));
        }
        let n = self.len();
        let n_val = (validation_ratio * n as f64).round() as usize;
        Ok((n - n_val, n_val))
    }

    /// Indices `t` in `[start, end)` usable as temporal pair anchors:
    /// `t+1` stays inside the range and does not start a new episode.
    pub fn pair_anchors(&self, start: usize, end: usize) -> Vec<usize> {
        let end = end.min(self.len());
        if end < start + 2 {
            return Vec::new();
        }
        (start..end - 1)
            .filter(|&t| !self.episode_starts[t + 1])
            .collect()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let data: Dataset = serde_json::from_reader(reader)?;
        data.validate()?;
        Ok(data)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }
}
