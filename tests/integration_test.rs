use std::cell::RefCell;
use std::rc::Rc;

use robopriors::config::{ExperimentConfig, ModelConfig};
use robopriors::experiment::Experiment;
use robopriors::navbot::{action_space, collect_random_dataset, EnvSpec, NavBot};
use robopriors::recorder::NullRecorder;
use robopriors::trainer::PriorsModel;

fn collect(n_transitions: usize, env_seed: u64, policy_seed: u64) -> robopriors::data::Dataset {
    let spec = EnvSpec {
        max_steps: 25,
        ..EnvSpec::default()
    };
    let mut env = NavBot::new(spec, env_seed);
    collect_random_dataset(&mut env, n_transitions, policy_seed).expect("dataset collection")
}

#[test]
fn representation_learning_end_to_end() {
    // 1. Data: 1000 transitions of pseudo-camera observations.
    let data = collect(1000, 10, 11);

    // 2. Model: two-dimensional representation.
    let mut model_cfg = ModelConfig::new(data.obs_shape.clone(), 2);
    model_cfg.seed = 12;
    model_cfg.learning_rate = 1e-3;
    let model = Rc::new(RefCell::new(PriorsModel::new(model_cfg).unwrap()));

    // 3. Five training epochs with a 10% validation split.
    let cfg = ExperimentConfig {
        num_epochs: 5,
        validation_ratio: 0.1,
        display: true,
        ..ExperimentConfig::default()
    };
    let mut experiment =
        Experiment::<NavBot>::new(cfg, Rc::clone(&model), data, Box::new(NullRecorder)).unwrap();
    let report = experiment.run().unwrap();

    // 4. One validation entry per term per epoch, all non-negative.
    assert_eq!(report.history.len(), 5);
    for terms in [
        &report.history.temporal,
        &report.history.proportionality,
        &report.history.causality,
        &report.history.repeatability,
    ] {
        assert_eq!(terms.len(), 5);
        assert!(terms.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    // 5. States for every observation, at the configured dimension.
    assert_eq!(report.states.len(), 1000);
    assert!(report.states.iter().all(|s| s.len() == 2));
}

#[test]
fn qlearning_evaluation_end_to_end() {
    // 2 training epochs, 10 policy fits per epoch, each rolled out over
    // 20 episodes of 25 steps.
    let data = collect(1000, 20, 21);

    let mut model_cfg = ModelConfig::new(data.obs_shape.clone(), 2);
    model_cfg.seed = 22;
    model_cfg.learning_rate = 1e-3;
    let model = Rc::new(RefCell::new(PriorsModel::new(model_cfg).unwrap()));

    let cfg = ExperimentConfig {
        num_epochs: 2,
        qlearning: true,
        n_qlearnings: 10,
        n_test_episodes: 20,
        n_test_steps: 25,
        record_to: Some(std::env::temp_dir().join("robopriors_ql_it")),
        seed: 23,
        ..ExperimentConfig::default()
    };

    let mut rollout_spec = EnvSpec::from_value(&data.env).unwrap();
    rollout_spec.max_steps = cfg.n_test_steps;
    let rollout_env = NavBot::new(rollout_spec, 24);

    let mut experiment = Experiment::new(cfg, model, data, Box::new(NullRecorder))
        .unwrap()
        .with_environment(rollout_env, action_space())
        .unwrap();
    let report = experiment.run().unwrap();

    // The performance tensor is fully populated with finite values.
    let performance = report.performance.expect("q-learning mode fills performance");
    assert_eq!(performance.shape(), [2, 10, 20, 25]);
    assert!(performance.is_finite());
    assert_eq!(performance.as_slice().len(), 2 * 10 * 20 * 25);

    // The navigation episodes never terminate early at this step limit, so
    // at least some goal rewards should appear somewhere in the tensor.
    assert!(performance.as_slice().iter().any(|&r| r > 0.0));
}
