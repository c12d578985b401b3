use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;

use robopriors::config::{ExperimentConfig, ModelConfig};
use robopriors::experiment::Experiment;
use robopriors::navbot::{action_space, collect_random_dataset, EnvSpec, NavBot};
use robopriors::recorder::JsonRecorder;
use robopriors::trainer::PriorsModel;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // 1. Collect training data with a random policy.
    let spec = EnvSpec::default();
    let mut source_env = NavBot::new(spec, 1);
    let data = collect_random_dataset(&mut source_env, 2000, 2)
        .context("collecting the training dataset")?;
    log::info!("collected {} transitions", data.len());

    // 2. The representation model.
    let mut model_cfg = ModelConfig::new(data.obs_shape.clone(), 2);
    model_cfg.seed = 3;
    model_cfg.learning_rate = 1e-3;
    let model = Rc::new(RefCell::new(PriorsModel::new(model_cfg)?));

    // 3. Experiment configuration: Q-learning evaluation after each epoch.
    let cfg = ExperimentConfig {
        num_epochs: 10,
        qlearning: true,
        record_to: Some("out".into()),
        seed: 4,
        ..ExperimentConfig::default()
    };
    let recorder = JsonRecorder::create("out")?;

    // 4. Rebuild an equivalent environment from the dataset metadata, with
    // episodes bounded to the test length.
    let mut rollout_spec = EnvSpec::from_value(&data.env)?;
    rollout_spec.max_steps = cfg.n_test_steps;
    let rollout_env = NavBot::new(rollout_spec, 5);

    // 5. Run the experiment.
    log::info!("training representation and evaluating policies...");
    let report = Experiment::new(cfg, model, data, Box::new(recorder))?
        .with_environment(rollout_env, action_space())?
        .run()?;

    if let Some(performance) = &report.performance {
        for (epoch, trials) in performance.episode_return_means().iter().enumerate() {
            let mean = trials.iter().sum::<f64>() / trials.len().max(1) as f64;
            log::info!("epoch {}: mean episode return {:.3}", epoch + 1, mean);
        }
    }
    log::info!("artifacts written to out/");
    Ok(())
}
