use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::ExperimentConfig;
use crate::data::Dataset;
use crate::env::{Environment, TransformedEnv};
use crate::error::{Error, Result};
use crate::fqi::FittedQIteration;
use crate::policy::PlugPolicy;
use crate::recorder::{pca_variance_ratio, Recorder};
use crate::rollout::Evaluator;
use crate::trainer::{PriorsModel, TrainHistory};

/// Per-step rewards indexed by [epoch, trial, episode, step].
///
/// Grows row by row as the experiment advances; single writer, read-only
/// afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub epochs: usize,
    pub trials: usize,
    pub episodes: usize,
    pub steps: usize,
    data: Vec<f64>,
}

impl Performance {
    pub fn new(epochs: usize, trials: usize, episodes: usize, steps: usize) -> Self {
        Self {
            epochs,
            trials,
            episodes,
            steps,
            data: vec![0.0; epochs * trials * episodes * steps],
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        [self.epochs, self.trials, self.episodes, self.steps]
    }

    pub fn get(&self, epoch: usize, trial: usize, episode: usize, step: usize) -> f64 {
        self.data[self.offset(epoch, trial, episode, step)]
    }

    fn offset(&self, epoch: usize, trial: usize, episode: usize, step: usize) -> usize {
        ((epoch * self.trials + trial) * self.episodes + episode) * self.steps + step
    }

    /// Writes one trial's `[episodes][steps]` reward grid.
    pub fn record(&mut self, epoch: usize, trial: usize, rewards: &[Vec<f64>]) -> Result<()> {
        if epoch >= self.epochs || trial >= self.trials {
            return Err(Error::data(format!(
                "performance index [{epoch}, {trial}] outside shape {:?}",
                self.shape()
            )));
        }
        if rewards.len() != self.episodes || rewards.iter().any(|ep| ep.len() != self.steps) {
            return Err(Error::data(format!(
                "reward grid does not match [{} episodes x {} steps]",
                self.episodes, self.steps
            )));
        }
        for (episode, per_step) in rewards.iter().enumerate() {
            for (step, reward) in per_step.iter().enumerate() {
                let at = self.offset(epoch, trial, episode, step);
                self.data[at] = *reward;
            }
        }
        Ok(())
    }

    /// Mean over episodes of the per-episode reward sum, per epoch x trial.
    pub fn episode_return_means(&self) -> Vec<Vec<f64>> {
        let mut out = vec![vec![0.0; self.trials]; self.epochs];
        for epoch in 0..self.epochs {
            for trial in 0..self.trials {
                let mut total = 0.0;
                for episode in 0..self.episodes {
                    for step in 0..self.steps {
                        total += self.get(epoch, trial, episode, step);
                    }
                }
                out[epoch][trial] = total / self.episodes.max(1) as f64;
            }
        }
        out
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// What the experiment hands back once the epoch loop finishes.
#[derive(Debug)]
pub struct ExperimentReport {
    pub history: TrainHistory,
    pub performance: Option<Performance>,
    /// Final state vectors of the full training dataset.
    pub states: Vec<Vec<f64>>,
}

/// The outer loop: train one epoch, then evaluate the representation by
/// fitting and rolling out fresh policies, for `num_epochs` rounds.
///
/// An explicit state machine around an epoch counter; cancellation is
/// checked between epochs only, never inside a fit or rollout.
pub struct Experiment<E>
where
    E: Environment<Observation = Vec<f64>, Action = i64>,
{
    cfg: ExperimentConfig,
    model: Rc<RefCell<PriorsModel>>,
    data: Dataset,
    test_data: Option<Dataset>,
    env: Option<TransformedEnv<E>>,
    action_space: Vec<i64>,
    recorder: Box<dyn Recorder>,
    rng: StdRng,
    epoch: usize,
    history: TrainHistory,
    performance: Option<Performance>,
}

impl<E> Experiment<E>
where
    E: Environment<Observation = Vec<f64>, Action = i64>,
{
    pub fn new(
        cfg: ExperimentConfig,
        model: Rc<RefCell<PriorsModel>>,
        data: Dataset,
        recorder: Box<dyn Recorder>,
    ) -> Result<Self> {
        cfg.validate()?;
        data.validate()?;
        let performance = cfg.qlearning.then(|| {
            Performance::new(
                cfg.num_epochs,
                cfg.n_qlearnings,
                cfg.n_test_episodes,
                cfg.n_test_steps,
            )
        });
        let rng = StdRng::seed_from_u64(cfg.seed);
        Ok(Self {
            cfg,
            model,
            data,
            test_data: None,
            env: None,
            action_space: Vec::new(),
            recorder,
            rng,
            epoch: 0,
            history: TrainHistory::default(),
            performance,
        })
    }

    /// Attaches the rollout environment, wrapping it so the policy sees the
    /// live model's state vectors instead of raw observations.
    pub fn with_environment(mut self, env: E, action_space: Vec<i64>) -> Result<Self> {
        if action_space.len() != self.data.num_actions {
            return Err(Error::config(format!(
                "action space has {} entries but the dataset declares {}",
                action_space.len(),
                self.data.num_actions
            )));
        }
        let hook = PriorsModel::observation_hook(&self.model);
        self.env = Some(TransformedEnv::new(env, hook));
        self.action_space = action_space;
        Ok(self)
    }

    /// Held-out dataset recorded at the end in representation-only mode.
    pub fn with_test_data(mut self, data: Dataset) -> Result<Self> {
        data.validate()?;
        self.test_data = Some(data);
        Ok(self)
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn is_done(&self) -> bool {
        self.epoch >= self.cfg.num_epochs
    }

    /// Runs the remaining epochs to completion.
    pub fn run(&mut self) -> Result<ExperimentReport> {
        self.run_until(|| false)
    }

    /// Runs epochs until done, checking `cancel` between epochs.
    pub fn run_until(&mut self, mut cancel: impl FnMut() -> bool) -> Result<ExperimentReport> {
        if self.cfg.qlearning && self.env.is_none() {
            return Err(Error::config(
                "q-learning evaluation needs an attached environment",
            ));
        }
        while !self.is_done() {
            if cancel() {
                log::info!("experiment cancelled after epoch {}", self.epoch);
                break;
            }
            self.step_epoch()?;
        }
        self.finish()
    }

    /// Advances the experiment by exactly one epoch.
    pub fn step_epoch(&mut self) -> Result<()> {
        let epoch_history = self.model.borrow_mut().fit(
            &self.data,
            1,
            self.cfg.batch_size,
            self.cfg.validation_ratio,
        )?;
        self.history.extend(&epoch_history);

        // Snapshot the representation on the first and every 5th epoch.
        if self.epoch == 0 || (self.epoch + 1) % 5 == 0 {
            let states = self.model.borrow().phi(&self.data.observations)?;
            let colors = reward_colors(&self.data);
            self.recorder.representation(
                &format!("train_{}", self.epoch + 1),
                &states[1..],
                &colors,
            )?;
        }

        if self.cfg.qlearning {
            self.qlearning_round()?;
        }
        self.epoch += 1;
        Ok(())
    }

    // One round of policy fits and rollouts on the current representation.
    fn qlearning_round(&mut self) -> Result<()> {
        let states = self.model.borrow().phi(&self.data.observations)?;
        let evaluator = Evaluator::new(self.cfg.n_test_episodes, self.cfg.n_test_steps);

        for trial in 0..self.cfg.n_qlearnings {
            let trial_seed = self.rng.gen();
            let mut learner = FittedQIteration::new(self.cfg.n_rbf, self.data.num_actions)
                .with_seed(trial_seed);
            let policy = learner.fit(
                &states,
                &self.data.actions_int,
                &self.data.rewards,
                &self.data.episode_starts,
                self.cfg.discount,
                self.cfg.q_iterations,
                self.cfg.recompute_mapping,
            )?;
            let mut plugged = PlugPolicy::new(policy, self.action_space.clone())?;
            let env = match self.env.as_mut() {
                Some(env) => env,
                None => {
                    return Err(Error::config(
                        "q-learning evaluation needs an attached environment",
                    ))
                }
            };
            let stats = evaluator.run(env, &mut plugged)?;
            if let Some(performance) = self.performance.as_mut() {
                performance.record(self.epoch, trial, &stats.rewards)?;
            }
            log::debug!(
                "epoch {} trial {}: mean episode return {:.3}",
                self.epoch + 1,
                trial + 1,
                stats.mean_return()
            );
        }
        Ok(())
    }

    // Final artifacts and the report.
    fn finish(&mut self) -> Result<ExperimentReport> {
        self.recorder.loss_history(&self.history)?;

        let states = self.model.borrow().phi(&self.data.observations)?;
        self.recorder.pca_variance(&pca_variance_ratio(&states)?)?;

        if !self.cfg.qlearning {
            if let Some(test_data) = &self.test_data {
                let test_states = self.model.borrow().phi(&test_data.observations)?;
                let colors = reward_colors(test_data);
                self.recorder
                    .representation("test", &test_states[1..], &colors)?;
            }
        }
        if let Some(performance) = &self.performance {
            self.recorder.qlearning_rewards(performance)?;
        }

        Ok(ExperimentReport {
            history: self.history.clone(),
            performance: self.performance.clone(),
            states,
        })
    }
}

// Color values aligning states[1..] with the reward earned arriving at each
// state, zeroed where a new episode begins.
fn reward_colors(data: &Dataset) -> Vec<f64> {
    (1..data.len())
        .map(|t| {
            if data.episode_starts[t] {
                0.0
            } else {
                data.rewards[t - 1]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::navbot::{action_space, collect_random_dataset, EnvSpec, NavBot};
    use crate::recorder::NullRecorder;

    fn nav_dataset(n: usize) -> (Dataset, EnvSpec) {
        let spec = EnvSpec {
            max_steps: 10,
            ..EnvSpec::default()
        };
        let mut env = NavBot::new(spec.clone(), 21);
        (collect_random_dataset(&mut env, n, 22).unwrap(), spec)
    }

    fn nav_model(data: &Dataset, seed: u64) -> Rc<RefCell<PriorsModel>> {
        let mut cfg = ModelConfig::new(data.obs_shape.clone(), 2);
        cfg.seed = seed;
        cfg.learning_rate = 1e-3;
        Rc::new(RefCell::new(PriorsModel::new(cfg).unwrap()))
    }

    #[test]
    fn performance_tensor_indexing_round_trips() {
        let mut perf = Performance::new(2, 3, 4, 5);
        let grid = vec![vec![1.5; 5]; 4];
        perf.record(1, 2, &grid).unwrap();

        assert_eq!(perf.get(1, 2, 3, 4), 1.5);
        assert_eq!(perf.get(0, 0, 0, 0), 0.0);
        assert_eq!(perf.shape(), [2, 3, 4, 5]);
        assert!(perf.is_finite());
        assert_eq!(perf.episode_return_means()[1][2], 7.5);
    }

    #[test]
    fn performance_rejects_bad_grids() {
        let mut perf = Performance::new(1, 1, 2, 3);
        assert!(perf.record(0, 5, &vec![vec![0.0; 3]; 2]).is_err());
        assert!(perf.record(0, 0, &vec![vec![0.0; 4]; 2]).is_err());
    }

    #[test]
    fn representation_only_experiment_collects_history() {
        let (data, _) = nav_dataset(120);
        let model = nav_model(&data, 4);
        let cfg = ExperimentConfig {
            num_epochs: 3,
            batch_size: 32,
            display: true,
            ..ExperimentConfig::default()
        };

        let mut experiment =
            Experiment::<NavBot>::new(cfg, model, data, Box::new(NullRecorder)).unwrap();
        let report = experiment.run().unwrap();

        assert_eq!(report.history.len(), 3);
        assert!(report.performance.is_none());
        assert_eq!(report.states.len(), 120);
    }

    #[test]
    fn qlearning_experiment_fills_the_performance_tensor() {
        let (data, spec) = nav_dataset(150);
        let model = nav_model(&data, 8);
        let cfg = ExperimentConfig {
            num_epochs: 2,
            batch_size: 32,
            qlearning: true,
            n_qlearnings: 2,
            n_test_episodes: 3,
            n_test_steps: 6,
            n_rbf: 20,
            record_to: Some(std::env::temp_dir().join("robopriors_exp_test")),
            ..ExperimentConfig::default()
        };
        let rollout_spec = EnvSpec {
            max_steps: cfg.n_test_steps,
            ..spec
        };
        let env = NavBot::new(rollout_spec, 99);

        let mut experiment =
            Experiment::new(cfg, model, data, Box::new(NullRecorder))
                .unwrap()
                .with_environment(env, action_space())
                .unwrap();
        let report = experiment.run().unwrap();

        let perf = report.performance.unwrap();
        assert_eq!(perf.shape(), [2, 2, 3, 6]);
        assert!(perf.is_finite());
    }

    #[test]
    fn cancellation_is_checked_between_epochs() {
        let (data, _) = nav_dataset(80);
        let model = nav_model(&data, 2);
        let cfg = ExperimentConfig {
            num_epochs: 10,
            batch_size: 16,
            display: true,
            ..ExperimentConfig::default()
        };

        let mut experiment =
            Experiment::<NavBot>::new(cfg, model, data, Box::new(NullRecorder)).unwrap();
        let mut budget = 2;
        let report = experiment
            .run_until(|| {
                if budget == 0 {
                    return true;
                }
                budget -= 1;
                false
            })
            .unwrap();

        assert_eq!(report.history.len(), 2);
        assert_eq!(experiment.epoch(), 2);
    }

    #[test]
    fn qlearning_without_environment_fails_fast() {
        let (data, _) = nav_dataset(80);
        let model = nav_model(&data, 2);
        let cfg = ExperimentConfig {
            num_epochs: 1,
            batch_size: 16,
            qlearning: true,
            record_to: Some("out".into()),
            ..ExperimentConfig::default()
        };

        let mut experiment =
            Experiment::<NavBot>::new(cfg, model, data, Box::new(NullRecorder)).unwrap();
        assert!(matches!(experiment.run(), Err(Error::Config(_))));
    }
}
