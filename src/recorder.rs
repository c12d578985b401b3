use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use nalgebra::{DMatrix, SymmetricEigen};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::experiment::Performance;
use crate::trainer::TrainHistory;

/// External collaborator persisting diagnostic artifacts.
///
/// The core only decides *what* to record and when; format and destination
/// live behind this trait.
pub trait Recorder {
    fn loss_history(&mut self, history: &TrainHistory) -> Result<()>;

    /// State representation snapshot, one color value per state (reward
    /// based in the experiment loop).
    fn representation(&mut self, name: &str, states: &[Vec<f64>], colors: &[f64]) -> Result<()>;

    fn pca_variance(&mut self, ratios: &[f64]) -> Result<()>;

    fn qlearning_rewards(&mut self, performance: &Performance) -> Result<()>;
}

/// Discards everything. Useful in tests.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn loss_history(&mut self, _: &TrainHistory) -> Result<()> {
        Ok(())
    }

    fn representation(&mut self, _: &str, _: &[Vec<f64>], _: &[f64]) -> Result<()> {
        Ok(())
    }

    fn pca_variance(&mut self, _: &[f64]) -> Result<()> {
        Ok(())
    }

    fn qlearning_rewards(&mut self, _: &Performance) -> Result<()> {
        Ok(())
    }
}

/// Summarizes artifacts through the logging facade, the "display" mode.
#[derive(Debug, Default)]
pub struct LogRecorder;

impl Recorder for LogRecorder {
    fn loss_history(&mut self, history: &TrainHistory) -> Result<()> {
        for epoch in 0..history.len() {
            log::info!(
                "epoch {}: temporal {:.5} proportionality {:.5} causality {:.5} repeatability {:.5}",
                epoch + 1,
                history.temporal[epoch],
                history.proportionality[epoch],
                history.causality[epoch],
                history.repeatability[epoch],
            );
        }
        Ok(())
    }

    fn representation(&mut self, name: &str, states: &[Vec<f64>], _colors: &[f64]) -> Result<()> {
        log::info!("representation {name}: {} states", states.len());
        Ok(())
    }

    fn pca_variance(&mut self, ratios: &[f64]) -> Result<()> {
        log::info!("pca explained variance ratios: {ratios:?}");
        Ok(())
    }

    fn qlearning_rewards(&mut self, performance: &Performance) -> Result<()> {
        for (epoch, trials) in performance.episode_return_means().iter().enumerate() {
            log::info!("epoch {}: mean episode returns per trial {trials:?}", epoch + 1);
        }
        Ok(())
    }
}

/// Writes each artifact as a JSON file into one directory.
#[derive(Debug)]
pub struct JsonRecorder {
    dir: PathBuf,
}

#[derive(Serialize)]
struct RepresentationArtifact<'a> {
    states: &'a [Vec<f64>],
    colors: &'a [f64],
}

impl JsonRecorder {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let writer = BufWriter::new(File::create(self.dir.join(name))?);
        serde_json::to_writer_pretty(writer, value)?;
        Ok(())
    }
}

impl Recorder for JsonRecorder {
    fn loss_history(&mut self, history: &TrainHistory) -> Result<()> {
        self.write("loss_history.json", history)
    }

    fn representation(&mut self, name: &str, states: &[Vec<f64>], colors: &[f64]) -> Result<()> {
        self.write(
            &format!("representation_{name}.json"),
            &RepresentationArtifact { states, colors },
        )
    }

    fn pca_variance(&mut self, ratios: &[f64]) -> Result<()> {
        self.write("pca_variance.json", &ratios)
    }

    fn qlearning_rewards(&mut self, performance: &Performance) -> Result<()> {
        self.write("ql_rewards.json", performance)
    }
}

/// Explained-variance ratios of the principal components of a state set,
/// sorted descending.
pub fn pca_variance_ratio(states: &[Vec<f64>]) -> Result<Vec<f64>> {
    if states.len() < 2 {
        return Err(Error::data("need at least two states for pca"));
    }
    let dim = states[0].len();
    if dim == 0 || states.iter().any(|s| s.len() != dim) {
        return Err(Error::data("state vectors must share one non-zero dimension"));
    }

    let n = states.len();
    let mut mean = vec![0.0; dim];
    for state in states {
        for (m, v) in mean.iter_mut().zip(state) {
            *m += v;
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }

    let mut covariance = DMatrix::zeros(dim, dim);
    for state in states {
        for a in 0..dim {
            for b in 0..dim {
                covariance[(a, b)] += (state[a] - mean[a]) * (state[b] - mean[b]);
            }
        }
    }
    covariance /= (n - 1) as f64;

    let eigen = SymmetricEigen::new(covariance);
    let mut values: Vec<f64> = eigen.eigenvalues.iter().map(|v| v.max(0.0)).collect();
    values.sort_by(|a, b| b.total_cmp(a));
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return Ok(vec![0.0; dim]);
    }
    Ok(values.into_iter().map(|v| v / total).collect())
}
