use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::fqi::StatePolicy;

/// A decision rule driving an environment.
pub trait Policy {
    type Observation;
    type Action;

    fn act(&mut self, obs: &Self::Observation) -> Result<Self::Action>;
}

/// Uniform random choice over a fixed action set.
pub struct RandomPolicy {
    actions: Vec<i64>,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(actions: Vec<i64>, seed: u64) -> Self {
        Self {
            actions,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomPolicy {
    type Observation = Vec<f64>;
    type Action = i64;

    fn act(&mut self, _obs: &Self::Observation) -> Result<Self::Action> {
        if self.actions.is_empty() {
            return Err(Error::config("random policy has an empty action set"));
        }
        let idx = self.rng.gen_range(0..self.actions.len());
        Ok(self.actions[idx])
    }
}

/// Plugs an abstract state policy into a concrete action space.
///
/// The fitted policy yields action indices; this translates each index into
/// the action representation the environment expects.
pub struct PlugPolicy<A> {
    policy: StatePolicy,
    action_space: Vec<A>,
}

impl<A: Clone> PlugPolicy<A> {
    pub fn new(policy: StatePolicy, action_space: Vec<A>) -> Result<Self> {
        if action_space.len() != policy.num_actions() {
            return Err(Error::config(format!(
                "action space has {} entries but the policy decides over {}",
                action_space.len(),
                policy.num_actions()
            )));
        }
        Ok(Self {
            policy,
            action_space,
        })
    }
}

impl<A: Clone> Policy for PlugPolicy<A> {
    type Observation = Vec<f64>;
    type Action = A;

    fn act(&mut self, obs: &Self::Observation) -> Result<Self::Action> {
        let idx = self.policy.act(obs)?;
        Ok(self.action_space[idx].clone())
    }
}
