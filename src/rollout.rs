use crate::env::Environment;
use crate::error::Result;
use crate::policy::Policy;

/// Per-step rewards of one evaluation run.
///
/// `rewards` is a fixed `[n_episodes][n_steps]` grid; entries after an early
/// episode end stay zero. `episode_returns` holds the per-episode sums.
#[derive(Debug, Clone)]
pub struct RolloutStats {
    pub rewards: Vec<Vec<f64>>,
    pub episode_returns: Vec<f64>,
}

impl RolloutStats {
    pub fn mean_return(&self) -> f64 {
        if self.episode_returns.is_empty() {
            return 0.0;
        }
        self.episode_returns.iter().sum::<f64>() / self.episode_returns.len() as f64
    }
}

/// Drives a policy through a fixed number of bounded episodes.
///
/// Owns nothing beyond the rollout dimensions; the environment and policy
/// are borrowed per run. Environment errors propagate unchanged.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    n_episodes: usize,
    n_steps: usize,
}

impl Evaluator {
    pub fn new(n_episodes: usize, n_steps: usize) -> Self {
        Self {
            n_episodes,
            n_steps,
        }
    }

    pub fn run<E, P>(&self, env: &mut E, policy: &mut P) -> Result<RolloutStats>
    where
        E: Environment,
        P: Policy<Observation = E::Observation, Action = E::Action>,
    {
        let mut rewards = vec![vec![0.0; self.n_steps]; self.n_episodes];
        let mut episode_returns = Vec::with_capacity(self.n_episodes);

        for episode in rewards.iter_mut() {
            let mut obs = env.reset()?;
            let mut ret = 0.0;
            for slot in episode.iter_mut() {
                let action = policy.act(&obs)?;
                let step = env.step(action)?;
                *slot = step.reward;
                ret += step.reward;
                obs = step.obs;
                if step.done {
                    break;
                }
            }
            episode_returns.push(ret);
        }

        Ok(RolloutStats {
            rewards,
            episode_returns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::MockEnv;

    struct FixedPolicy;

    impl Policy for FixedPolicy {
        type Observation = Vec<f64>;
        type Action = i64;

        fn act(&mut self, _obs: &Self::Observation) -> Result<Self::Action> {
            Ok(0)
        }
    }

    #[test]
    fn rollout_fills_a_fixed_reward_grid() {
        // Episodes never end before the step limit here, so every slot is
        // a real reward.
        let mut env = MockEnv::new(100);
        let stats = Evaluator::new(20, 25).run(&mut env, &mut FixedPolicy).unwrap();

        assert_eq!(stats.rewards.len(), 20);
        assert!(stats.rewards.iter().all(|ep| ep.len() == 25));
        assert!(stats
            .rewards
            .iter()
            .flatten()
            .all(|r| r.is_finite() && !r.is_nan()));
        assert_eq!(stats.mean_return(), 25.0);
    }

    #[test]
    fn early_episode_end_leaves_zero_tail() {
        let mut env = MockEnv::new(3);
        let stats = Evaluator::new(2, 5).run(&mut env, &mut FixedPolicy).unwrap();

        assert_eq!(stats.rewards[0], vec![1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(stats.episode_returns, vec![3.0, 3.0]);
    }

    #[test]
    fn environment_errors_propagate_unwrapped() {
        struct FailingEnv;
        impl crate::env::Environment for FailingEnv {
            type Observation = Vec<f64>;
            type Action = i64;

            fn reset(&mut self) -> Result<Self::Observation> {
                Err(Error::env("renderer disconnected"))
            }

            fn step(&mut self, _: i64) -> Result<crate::env::Step<Self::Observation>> {
                unreachable!("reset fails first")
            }
        }

        let result = Evaluator::new(1, 5).run(&mut FailingEnv, &mut FixedPolicy);
        assert!(matches!(result, Err(Error::Env(_))));
    }
}
