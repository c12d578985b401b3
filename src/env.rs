use std::collections::HashMap;

use crate::error::Result;

/// One environment transition as seen by the agent.
#[derive(Debug)]
pub struct Step<O> {
    pub obs: O,
    pub reward: f64,
    pub done: bool,
    pub info: Option<HashMap<String, String>>,
}

/// External environment collaborator.
///
/// Failures surface as `Error::Env` and propagate unwrapped through the
/// evaluation harness.
pub trait Environment {
    type Observation;
    type Action;

    fn reset(&mut self) -> Result<Self::Observation>;
    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>>;
}

/// Observation transform injected into an environment.
///
/// An explicit function value rather than global state: the experiment loop
/// builds it as a closure over the live representation model, so parameter
/// updates between epochs are visible to later rollouts without re-wiring.
pub type ObsTransform = Box<dyn Fn(&[f64]) -> Result<Vec<f64>>>;

/// Wraps an environment so the policy sees transformed observations.
pub struct TransformedEnv<E> {
    inner: E,
    transform: ObsTransform,
}

impl<E> TransformedEnv<E>
where
    E: Environment<Observation = Vec<f64>>,
{
    pub fn new(inner: E, transform: ObsTransform) -> Self {
        Self { inner, transform }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E> Environment for TransformedEnv<E>
where
    E: Environment<Observation = Vec<f64>>,
{
    type Observation = Vec<f64>;
    type Action = E::Action;

    fn reset(&mut self) -> Result<Self::Observation> {
        let obs = self.inner.reset()?;
        (self.transform)(&obs)
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let step = self.inner.step(action)?;
        Ok(Step {
            obs: (self.transform)(&step.obs)?,
            reward: step.reward,
            done: step.done,
            info: step.info,
        })
    }
}
