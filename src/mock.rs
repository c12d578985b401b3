use crate::env::{Environment, Step};
use crate::error::Result;

/// Deterministic counting environment for tests.
///
/// Observations ramp 0, 1, 2, ... with reward 1.0 per step; an episode ends
/// after `max_steps` steps.
#[derive(Debug, Clone)]
pub struct MockEnv {
    count: usize,
    max_steps: usize,
}

impl MockEnv {
    pub fn new(max_steps: usize) -> Self {
        Self { count: 0, max_steps }
    }
}

impl Environment for MockEnv {
    type Observation = Vec<f64>;
    type Action = i64;

    fn reset(&mut self) -> Result<Self::Observation> {
        self.count = 0;
        Ok(vec![0.0])
    }

    fn step(&mut self, _action: Self::Action) -> Result<Step<Self::Observation>> {
        self.count += 1;
        Ok(Step {
            obs: vec![self.count as f64],
            reward: 1.0,
            done: self.count >= self.max_steps,
            info: None,
        })
    }
}
