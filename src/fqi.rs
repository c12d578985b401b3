use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};

/// Random Fourier feature approximation of an RBF kernel.
///
/// The mapping is a pure function of (dimension, size, gamma, seed), so a
/// learner that recomputes it from its stored seed reproduces the same
/// basis every time.
#[derive(Debug, Clone)]
pub struct RbfMapping {
    weights: DMatrix<f64>,
    offsets: DVector<f64>,
    dim: usize,
}

impl RbfMapping {
    pub fn compute(dim: usize, n_rbf: usize, gamma: f64, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        // N(0, sqrt(2*gamma)) frequencies and uniform phase offsets give
        // E[z(x) . z(y)] = exp(-gamma |x - y|^2).
        let normal = Normal::new(0.0, (2.0 * gamma).sqrt())
            .map_err(|_| Error::config(format!("rbf gamma {gamma} must be positive")))?;
        let weights = DMatrix::from_fn(n_rbf, dim, |_, _| normal.sample(&mut rng));
        let offsets = DVector::from_fn(n_rbf, |_, _| rng.gen_range(0.0..std::f64::consts::TAU));
        Ok(Self {
            weights,
            offsets,
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_features(&self) -> usize {
        self.weights.nrows()
    }

    pub fn features(&self, state: &[f64]) -> DVector<f64> {
        let x = DVector::from_column_slice(state);
        let mut z = &self.weights * x + &self.offsets;
        let scale = (2.0 / self.n_features() as f64).sqrt();
        z.apply(|v| *v = scale * v.cos());
        z
    }

    fn features_matrix(&self, states: &[Vec<f64>]) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(states.len(), self.n_features());
        for (row, state) in states.iter().enumerate() {
            out.row_mut(row).copy_from(&self.features(state).transpose());
        }
        out
    }
}

/// Batch approximate value iteration over a fixed transition set.
#[derive(Debug)]
pub struct FittedQIteration {
    n_rbf: usize,
    n_actions: usize,
    rbf_gamma: f64,
    ridge: f64,
    seed: u64,
    mapping: Option<RbfMapping>,
}

impl FittedQIteration {
    pub fn new(n_rbf: usize, n_actions: usize) -> Self {
        Self {
            n_rbf,
            n_actions,
            rbf_gamma: 1.0,
            ridge: 1e-2,
            seed: 0,
            mapping: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }

    pub fn with_rbf_gamma(mut self, gamma: f64) -> Self {
        self.rbf_gamma = gamma;
        self
    }

    /// Fits a greedy policy by iterated ridge regression on Bellman targets.
    ///
    /// The RBF mapping is recomputed from the stored seed when asked (or on
    /// first use) and reused otherwise, which warm-starts incremental refits
    /// without relocating the basis. Temporal pairs crossing an episode
    /// boundary are excluded from the targets.
    #[allow(clippy::too_many_arguments)]
    pub fn fit(
        &mut self,
        states: &[Vec<f64>],
        actions: &[usize],
        rewards: &[f64],
        episode_starts: &[bool],
        discount: f64,
        n_iterations: usize,
        recompute_mapping: bool,
    ) -> Result<StatePolicy> {
        if self.n_actions == 0 {
            return Err(Error::data("action set is empty"));
        }
        let n = states.len();
        if n < 2 {
            return Err(Error::data("need at least two transitions to fit"));
        }
        if actions.len() != n || rewards.len() != n || episode_starts.len() != n {
            return Err(Error::data(format!(
                "mismatched input lengths: states {n}, actions {}, rewards {}, episode_starts {}",
                actions.len(),
                rewards.len(),
                episode_starts.len()
            )));
        }
        if let Some(t) = actions.iter().position(|&a| a >= self.n_actions) {
            return Err(Error::data(format!(
                "actions[{t}] = {} exceeds the action set size {}",
                actions[t], self.n_actions
            )));
        }
        let dim = states[0].len();
        if dim == 0 || states.iter().any(|s| s.len() != dim) {
            return Err(Error::data("state vectors must share one non-zero dimension"));
        }
        if !(0.0..1.0).contains(&discount) {
            return Err(Error::config("discount must lie in [0, 1)"));
        }

        if recompute_mapping || self.mapping.is_none() {
            self.mapping = Some(RbfMapping::compute(
                dim,
                self.n_rbf,
                self.rbf_gamma,
                self.seed,
            )?);
        }
        let mapping = match &self.mapping {
            Some(mapping) => mapping,
            None => return Err(Error::numerical("rbf mapping unavailable")),
        };
        if mapping.dim() != dim {
            return Err(Error::data(format!(
                "cached mapping expects {}-dimensional states, got {dim}; pass recompute_mapping",
                mapping.dim()
            )));
        }

        let features = mapping.features_matrix(states);
        let anchors: Vec<usize> = (0..n - 1).filter(|&t| !episode_starts[t + 1]).collect();
        if anchors.is_empty() {
            return Err(Error::data("no transition pairs inside episode boundaries"));
        }

        let n_features = mapping.n_features();
        let mut weights = DMatrix::<f64>::zeros(self.n_actions, n_features);
        for _ in 0..n_iterations {
            // Bellman targets from the current approximator.
            let q_all = &features * weights.transpose();
            let mut rows_per_action: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.n_actions];
            for &t in &anchors {
                let max_next = q_all.row(t + 1).max();
                let target = rewards[t] + discount * max_next;
                if !target.is_finite() {
                    return Err(Error::numerical("bellman target diverged"));
                }
                rows_per_action[actions[t]].push((t, target));
            }

            for (action, rows) in rows_per_action.iter().enumerate() {
                if rows.is_empty() {
                    continue;
                }
                let za = DMatrix::from_fn(rows.len(), n_features, |r, c| features[(rows[r].0, c)]);
                let ya = DVector::from_fn(rows.len(), |r, _| rows[r].1);
                let mut gram = za.transpose() * &za;
                for d in 0..n_features {
                    gram[(d, d)] += self.ridge;
                }
                let rhs = za.transpose() * ya;
                let solved = Cholesky::new(gram)
                    .ok_or_else(|| Error::numerical("singular regression system in q-iteration"))?
                    .solve(&rhs);
                if !solved.iter().all(|v| v.is_finite()) {
                    return Err(Error::numerical("regression produced non-finite weights"));
                }
                weights.row_mut(action).copy_from(&solved.transpose());
            }
        }

        Ok(StatePolicy {
            mapping: mapping.clone(),
            weights,
        })
    }
}

/// A fitted greedy policy over state vectors. Immutable and cheap: each
/// decision is one feature expansion plus an argmax over action values.
#[derive(Debug, Clone)]
pub struct StatePolicy {
    mapping: RbfMapping,
    weights: DMatrix<f64>,
}

impl StatePolicy {
    pub fn num_actions(&self) -> usize {
        self.weights.nrows()
    }

    pub fn q_values(&self, state: &[f64]) -> Result<Vec<f64>> {
        if state.len() != self.mapping.dim() {
            return Err(Error::data(format!(
                "state has {} entries but the policy expects {}",
                state.len(),
                self.mapping.dim()
            )));
        }
        let z = self.mapping.features(state);
        Ok((&self.weights * z).iter().copied().collect())
    }

    /// Greedy action index for a state.
    pub fn act(&self, state: &[f64]) -> Result<usize> {
        let q = self.q_values(state)?;
        let mut best = 0;
        for (idx, value) in q.iter().enumerate() {
            if *value > q[best] {
                best = idx;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two-state chain: action 1 from anywhere earns reward, action 0 never.
    fn chain_inputs() -> (Vec<Vec<f64>>, Vec<usize>, Vec<f64>, Vec<bool>) {
        let mut states = Vec::new();
        let mut actions = Vec::new();
        let mut rewards = Vec::new();
        let mut starts = Vec::new();
        for t in 0..60usize {
            let action = t % 2;
            states.push(vec![(t % 5) as f64 * 0.2, ((t + 2) % 5) as f64 * 0.2]);
            actions.push(action);
            rewards.push(if action == 1 { 1.0 } else { 0.0 });
            starts.push(t % 20 == 0);
        }
        (states, actions, rewards, starts)
    }

    #[test]
    fn fit_is_deterministic_under_recompute_mapping() {
        let (states, actions, rewards, starts) = chain_inputs();
        let mut learner = FittedQIteration::new(30, 2).with_seed(17);

        let first = learner
            .fit(&states, &actions, &rewards, &starts, 0.9, 5, true)
            .unwrap();
        let second = learner
            .fit(&states, &actions, &rewards, &starts, 0.9, 5, true)
            .unwrap();

        for state in &states {
            assert_eq!(first.act(state).unwrap(), second.act(state).unwrap());
        }
    }

    #[test]
    fn greedy_policy_prefers_the_rewarding_action() {
        let (states, actions, rewards, starts) = chain_inputs();
        let mut learner = FittedQIteration::new(30, 2).with_seed(3);
        let policy = learner
            .fit(&states, &actions, &rewards, &starts, 0.9, 10, true)
            .unwrap();

        let preferred: usize = states
            .iter()
            .map(|s| policy.act(s).unwrap())
            .filter(|&a| a == 1)
            .count();
        assert!(
            preferred > states.len() / 2,
            "expected action 1 to dominate, got {preferred}/{}",
            states.len()
        );
    }

    #[test]
    fn fit_rejects_malformed_inputs() {
        let (states, actions, rewards, starts) = chain_inputs();

        let mut empty_actions = FittedQIteration::new(10, 0);
        assert!(matches!(
            empty_actions.fit(&states, &actions, &rewards, &starts, 0.9, 2, true),
            Err(Error::Data(_))
        ));

        let mut learner = FittedQIteration::new(10, 2);
        assert!(matches!(
            learner.fit(&states, &actions[..10], &rewards, &starts, 0.9, 2, true),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            learner.fit(&states, &actions, &rewards, &starts, 1.0, 2, true),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn cached_mapping_is_reused_when_not_recomputing() {
        let (states, actions, rewards, starts) = chain_inputs();
        let mut learner = FittedQIteration::new(20, 2).with_seed(5);

        learner
            .fit(&states, &actions, &rewards, &starts, 0.9, 2, true)
            .unwrap();
        let cached = learner.mapping.clone().unwrap();
        learner
            .fit(&states, &actions, &rewards, &starts, 0.9, 2, false)
            .unwrap();
        let after = learner.mapping.unwrap();
        assert_eq!(cached.weights, after.weights);
    }

    #[test]
    fn policy_action_indices_stay_in_range() {
        let (states, actions, rewards, starts) = chain_inputs();
        let mut learner = FittedQIteration::new(15, 2).with_seed(1);
        let policy = learner
            .fit(&states, &actions, &rewards, &starts, 0.5, 3, true)
            .unwrap();
        for state in &states {
            assert!(policy.act(state).unwrap() < 2);
        }
    }
}
