use candle_core::{Result, Tensor};

use crate::error::{Error, Result as CrateResult};

/// Weights of the four prior loss terms.
///
/// Default weighting: temporal 1.0, proportionality 5.0, causality 1.0,
/// repeatability 5.0.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriorWeights {
    pub temporal: f64,
    pub proportionality: f64,
    pub causality: f64,
    pub repeatability: f64,
}

impl Default for PriorWeights {
    fn default() -> Self {
        Self {
            temporal: 1.0,
            proportionality: 5.0,
            causality: 1.0,
            repeatability: 5.0,
        }
    }
}

impl PriorWeights {
    pub fn validate(&self) -> CrateResult<()> {
        let all = [
            self.temporal,
            self.proportionality,
            self.causality,
            self.repeatability,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::config("loss weights must be finite and non-negative"));
        }
        Ok(())
    }
}

// Squared euclidean norm per row: (B, d) -> (B).
fn sq_norm(xs: &Tensor) -> Result<Tensor> {
    xs.sqr()?.sum(1)
}

/// Temporal coherence: mean squared state velocity over consecutive pairs.
///
/// `delta` is `s[t+1] - s[t]` for pairs that do not cross an episode
/// boundary. Zero exactly when consecutive states are identical.
pub fn temporal_coherence(delta: &Tensor) -> Result<Tensor> {
    sq_norm(delta)?.mean_all()
}

/// Proportionality: same action, proportionally similar displacement.
///
/// Penalizes the squared difference of the velocity magnitudes of two
/// transitions sharing the same action.
pub fn proportionality(delta_i: &Tensor, delta_j: &Tensor) -> Result<Tensor> {
    let mag_i = sq_norm(delta_i)?.sqrt()?;
    let mag_j = sq_norm(delta_j)?.sqrt()?;
    (mag_i - mag_j)?.sqr()?.mean_all()
}

/// Causality: states followed by different rewards should be far apart.
///
/// Penalizes the similarity exp(-|s_i - s_j|^2) of differing-reward pairs,
/// so the loss shrinks monotonically as the pair distance grows.
pub fn causality(s_i: &Tensor, s_j: &Tensor) -> Result<Tensor> {
    sq_norm(&(s_i - s_j)?)?.neg()?.exp()?.mean_all()
}

/// Repeatability: nearby states under the same action move alike.
///
/// The squared velocity difference of a same-action pair, weighted by the
/// state similarity of the pair.
pub fn repeatability(s_i: &Tensor, s_j: &Tensor, delta_i: &Tensor, delta_j: &Tensor) -> Result<Tensor> {
    let similarity = sq_norm(&(s_i - s_j)?)?.neg()?.exp()?;
    let velocity_diff = sq_norm(&(delta_i - delta_j)?)?;
    (similarity * velocity_diff)?.mean_all()
}
