use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::env::{Environment, Step};
use crate::error::{Error, Result};
use crate::policy::{Policy, RandomPolicy};

/// Construction arguments of the navigation environment.
///
/// Serialized into a dataset's `env` metadata so Q-learning mode can rebuild
/// an equivalent environment for policy rollouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Half-extent of the square world; positions live in [-world_size, world_size]^2.
    pub world_size: f64,
    /// Displacement per move action.
    pub speed: f64,
    pub goal: [f64; 2],
    pub goal_radius: f64,
    /// Observations are grid x grid pseudo-camera images.
    pub grid: usize,
    pub max_steps: usize,
    /// Spatial falloff of the observation bump.
    pub blur: f64,
}

impl Default for EnvSpec {
    fn default() -> Self {
        Self {
            world_size: 2.0,
            speed: 0.4,
            goal: [1.2, 1.2],
            goal_radius: 0.6,
            grid: 4,
            max_steps: 25,
            blur: 1.0,
        }
    }
}

impl EnvSpec {
    pub fn obs_shape(&self) -> Vec<usize> {
        vec![self.grid, self.grid]
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::data(format!("invalid environment metadata: {e}")))
    }
}

/// The discrete move set: +x, -x, +z, -z.
pub fn action_space() -> Vec<i64> {
    vec![0, 1, 2, 3]
}

/// A bot on a bounded plane with a goal zone.
///
/// The observation is a coarse top-down pseudo-camera: one Gaussian bump
/// rendered on a fixed grid, a pure function of the bot position. Reward is
/// 1.0 inside the goal zone. Episodes run to `max_steps`; the bot restarts
/// at a random position.
pub struct NavBot {
    spec: EnvSpec,
    pos: [f64; 2],
    steps: usize,
    rng: StdRng,
}

impl NavBot {
    pub fn new(spec: EnvSpec, seed: u64) -> Self {
        Self {
            spec,
            pos: [0.0, 0.0],
            steps: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Rebuilds the environment from dataset metadata.
    pub fn from_value(value: &serde_json::Value, seed: u64) -> Result<Self> {
        Ok(Self::new(EnvSpec::from_value(value)?, seed))
    }

    pub fn spec(&self) -> &EnvSpec {
        &self.spec
    }

    fn observe(&self) -> Vec<f64> {
        let g = self.spec.grid;
        let half = self.spec.world_size;
        let mut obs = Vec::with_capacity(g * g);
        for row in 0..g {
            for col in 0..g {
                // Cell centers span the world extent.
                let cx = -half + (2.0 * half) * (col as f64 + 0.5) / g as f64;
                let cz = -half + (2.0 * half) * (row as f64 + 0.5) / g as f64;
                let d2 = (self.pos[0] - cx).powi(2) + (self.pos[1] - cz).powi(2);
                obs.push((-d2 / (2.0 * self.spec.blur.powi(2))).exp());
            }
        }
        obs
    }

    fn reward(&self) -> f64 {
        let d2 = (self.pos[0] - self.spec.goal[0]).powi(2)
            + (self.pos[1] - self.spec.goal[1]).powi(2);
        if d2.sqrt() <= self.spec.goal_radius {
            1.0
        } else {
            0.0
        }
    }
}

impl Environment for NavBot {
    type Observation = Vec<f64>;
    type Action = i64;

    fn reset(&mut self) -> Result<Self::Observation> {
        let half = self.spec.world_size;
        self.pos = [
            self.rng.gen_range(-half..half),
            self.rng.gen_range(-half..half),
        ];
        self.steps = 0;
        Ok(self.observe())
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let delta = match action {
            0 => [self.spec.speed, 0.0],
            1 => [-self.spec.speed, 0.0],
            2 => [0.0, self.spec.speed],
            3 => [0.0, -self.spec.speed],
            other => return Err(Error::env(format!("unknown action {other}"))),
        };
        let half = self.spec.world_size;
        self.pos[0] = (self.pos[0] + delta[0]).clamp(-half, half);
        self.pos[1] = (self.pos[1] + delta[1]).clamp(-half, half);
        self.steps += 1;

        Ok(Step {
            obs: self.observe(),
            reward: self.reward(),
            done: self.steps >= self.spec.max_steps,
            info: None,
        })
    }
}

/// Rolls a uniform random policy in the environment and stores the
/// transitions as a dataset, environment metadata included.
pub fn collect_random_dataset(env: &mut NavBot, n_transitions: usize, seed: u64) -> Result<Dataset> {
    let actions = action_space();
    let mut policy = RandomPolicy::new(actions.clone(), seed);
    let mut data = Dataset::new(
        env.spec().obs_shape(),
        actions.len(),
        serde_json::to_value(env.spec())?,
    );

    let mut obs = env.reset()?;
    let mut episode_start = true;
    for _ in 0..n_transitions {
        let action = policy.act(&obs)?;
        let step = env.step(action)?;
        data.push(obs, action as f64, action as usize, step.reward, episode_start);
        episode_start = step.done;
        obs = if step.done { env.reset()? } else { step.obs };
    }
    data.validate()?;
    Ok(data)
}
