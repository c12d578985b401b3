use std::cell::RefCell;
use std::rc::Rc;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;

use crate::config::ModelConfig;
use crate::data::Dataset;
use crate::env::ObsTransform;
use crate::error::{Error, Result};
use crate::model::Encoder;
use crate::priors;

/// Per-epoch validation values of the four prior terms, unweighted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainHistory {
    pub temporal: Vec<f64>,
    pub proportionality: Vec<f64>,
    pub causality: Vec<f64>,
    pub repeatability: Vec<f64>,
}

impl TrainHistory {
    pub fn push(&mut self, terms: [f64; 4]) {
        self.temporal.push(terms[0]);
        self.proportionality.push(terms[1]);
        self.causality.push(terms[2]);
        self.repeatability.push(terms[3]);
    }

    pub fn extend(&mut self, other: &TrainHistory) {
        self.temporal.extend_from_slice(&other.temporal);
        self.proportionality.extend_from_slice(&other.proportionality);
        self.causality.extend_from_slice(&other.causality);
        self.repeatability.extend_from_slice(&other.repeatability);
    }

    pub fn len(&self) -> usize {
        self.temporal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temporal.is_empty()
    }
}

// Observation centering and scaling, computed once from the training data
// and applied inside phi as well.
#[derive(Debug, Clone)]
struct ObsNorm {
    mean: Vec<f64>,
    scale: f64,
}

impl ObsNorm {
    fn fit(observations: &[Vec<f64>]) -> Self {
        let n = observations.len().max(1);
        let dim = observations.first().map_or(0, Vec::len);
        let mut mean = vec![0.0; dim];
        for obs in observations {
            for (m, v) in mean.iter_mut().zip(obs) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }
        let mut var = 0.0;
        for obs in observations {
            for (m, v) in mean.iter().zip(obs) {
                var += (v - m).powi(2);
            }
        }
        let scale = (var / (n * dim.max(1)) as f64).sqrt().max(1e-12);
        Self { mean, scale }
    }

    fn apply_into(&self, obs: &[f64], out: &mut Vec<f64>) {
        for (v, m) in obs.iter().zip(&self.mean) {
            out.push((v - m) / self.scale);
        }
    }
}

/// The representation model: an encoder trained against the priors objective.
///
/// Owns the trainable vars, the optimizer and a seeded RNG, so construction
/// and training are reproducible for a given seed. Running `fit` for N
/// epochs in one call matches N single-epoch calls on the same data: the
/// validation split is the deterministic tail of the record sequence, the
/// normalizer is computed once, and every random draw flows through the one
/// owned RNG.
pub struct PriorsModel {
    cfg: ModelConfig,
    encoder: Encoder,
    vars: Vec<Var>,
    optimizer: AdamW,
    device: Device,
    rng: StdRng,
    norm: Option<ObsNorm>,
}

impl PriorsModel {
    pub fn new(cfg: ModelConfig) -> Result<Self> {
        cfg.validate()?;
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let (encoder, vars) =
            Encoder::new(cfg.obs_dim(), cfg.state_dim, cfg.hidden_units, &mut rng, &device)?;
        let optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: cfg.learning_rate,
                ..Default::default()
            },
        )?;
        Ok(Self {
            cfg,
            encoder,
            vars,
            optimizer,
            device,
            rng,
            norm: None,
        })
    }

    pub fn state_dim(&self) -> usize {
        self.cfg.state_dim
    }

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    /// Pure inference: observation batch to state batch. No side effects.
    pub fn phi(&self, observations: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if observations.is_empty() {
            return Ok(Vec::new());
        }
        let dim = self.cfg.obs_dim();
        let mut flat = Vec::with_capacity(observations.len() * dim);
        for (t, obs) in observations.iter().enumerate() {
            if obs.len() != dim {
                return Err(Error::data(format!(
                    "observation {t} has length {} but the model expects {dim}",
                    obs.len()
                )));
            }
            match &self.norm {
                Some(norm) => norm.apply_into(obs, &mut flat),
                None => flat.extend_from_slice(obs),
            }
        }
        let xs = Tensor::from_vec(flat, (observations.len(), dim), &self.device)?;
        let states = self.encoder.forward(&xs)?;
        Ok(states.to_vec2::<f64>()?)
    }

    /// Single-observation variant used by the environment hook.
    pub fn phi_one(&self, observation: &[f64]) -> Result<Vec<f64>> {
        let mut states = self.phi(std::slice::from_ref(&observation.to_vec()))?;
        Ok(states.swap_remove(0))
    }

    /// Builds the observation transform closure over a shared model handle.
    /// The hook always reads the current parameters, so rollouts after a
    /// training epoch see the updated representation.
    pub fn observation_hook(model: &Rc<RefCell<PriorsModel>>) -> ObsTransform {
        let model = Rc::clone(model);
        Box::new(move |obs| model.borrow().phi_one(obs))
    }

    /// Trains for `num_epochs` epochs and returns the validation history,
    /// one entry per term per epoch.
    pub fn fit(
        &mut self,
        data: &Dataset,
        num_epochs: usize,
        batch_size: usize,
        validation_ratio: f64,
    ) -> Result<TrainHistory> {
        data.validate()?;
        if data.obs_dim() != self.cfg.obs_dim() {
            return Err(Error::data(format!(
                "dataset observations have {} entries but the model expects {}",
                data.obs_dim(),
                self.cfg.obs_dim()
            )));
        }
        if batch_size < 2 {
            return Err(Error::config("batch_size must be at least 2 for pair sampling"));
        }
        let (n_train, _) = data.split_sizes(validation_ratio)?;
        let train_anchors = data.pair_anchors(0, n_train);
        let val_anchors = data.pair_anchors(n_train, data.len());
        if train_anchors.is_empty() {
            return Err(Error::data(
                "training split holds no usable transition pairs",
            ));
        }

        if self.norm.is_none() {
            self.norm = Some(ObsNorm::fit(&data.observations));
        }

        let mut history = TrainHistory::default();
        for _ in 0..num_epochs {
            let mut order = train_anchors.clone();
            order.shuffle(&mut self.rng);
            for chunk in order.chunks(batch_size) {
                let (loss, _) = self.batch_objective(data, chunk, true)?;
                self.optimizer.backward_step(&loss)?;
            }

            let mut sums = [0.0; 4];
            let mut batches = 0usize;
            for chunk in val_anchors.chunks(batch_size) {
                let (_, terms) = self.batch_objective(data, chunk, false)?;
                for (sum, term) in sums.iter_mut().zip(terms) {
                    *sum += term;
                }
                batches += 1;
            }
            if batches > 0 {
                for sum in &mut sums {
                    *sum /= batches as f64;
                }
            }
            history.push(sums);
        }
        Ok(history)
    }

    // Combined weighted objective plus the four raw term values for one
    // batch of pair anchors. Gaussian input noise and L1 regularization
    // apply only on training batches.
    fn batch_objective(
        &mut self,
        data: &Dataset,
        anchors: &[usize],
        training: bool,
    ) -> Result<(Tensor, [f64; 4])> {
        let b = anchors.len();
        let dim = self.cfg.obs_dim();
        let norm = match &self.norm {
            Some(norm) => norm,
            None => return Err(Error::data("normalizer missing before batch construction")),
        };

        let mut x_t = Vec::with_capacity(b * dim);
        let mut x_next = Vec::with_capacity(b * dim);
        for &t in anchors {
            norm.apply_into(&data.observations[t], &mut x_t);
            norm.apply_into(&data.observations[t + 1], &mut x_next);
        }
        if training && self.cfg.noise_stddev > 0.0 {
            let noise = Normal::new(0.0, self.cfg.noise_stddev)
                .map_err(|e| Error::config(format!("invalid noise stddev: {e}")))?;
            for v in x_t.iter_mut().chain(x_next.iter_mut()) {
                *v += noise.sample(&mut self.rng);
            }
        }
        let x_t = Tensor::from_vec(x_t, (b, dim), &self.device)?;
        let x_next = Tensor::from_vec(x_next, (b, dim), &self.device)?;
        let s_t = self.encoder.forward(&x_t)?;
        let s_next = self.encoder.forward(&x_next)?;
        let ds = (&s_next - &s_t)?;

        // Each batch element draws one random partner; the same-action and
        // differing-reward masks select the pairs each term consumes.
        let mut same_i = Vec::new();
        let mut same_j = Vec::new();
        let mut diff_i = Vec::new();
        let mut diff_j = Vec::new();
        if b >= 2 {
            for i in 0..b {
                let mut j = self.rng.gen_range(0..b - 1);
                if j >= i {
                    j += 1;
                }
                let (ti, tj) = (anchors[i], anchors[j]);
                if data.actions_int[ti] == data.actions_int[tj] {
                    same_i.push(i as u32);
                    same_j.push(j as u32);
                }
                if data.rewards[ti] != data.rewards[tj] {
                    diff_i.push(i as u32);
                    diff_j.push(j as u32);
                }
            }
        }

        let zero = Tensor::zeros((), DType::F64, &self.device)?;
        let l_temporal = priors::temporal_coherence(&ds)?;
        let (l_proportionality, l_repeatability) = if same_i.is_empty() {
            (zero.clone(), zero.clone())
        } else {
            let ii = Tensor::from_vec(same_i, (same_j.len(),), &self.device)?;
            let jj = Tensor::from_vec(same_j, ii.dims(), &self.device)?;
            let s_i = s_t.index_select(&ii, 0)?;
            let s_j = s_t.index_select(&jj, 0)?;
            let ds_i = ds.index_select(&ii, 0)?;
            let ds_j = ds.index_select(&jj, 0)?;
            (
                priors::proportionality(&ds_i, &ds_j)?,
                priors::repeatability(&s_i, &s_j, &ds_i, &ds_j)?,
            )
        };
        let l_causality = if diff_i.is_empty() {
            zero.clone()
        } else {
            let ii = Tensor::from_vec(diff_i, (diff_j.len(),), &self.device)?;
            let jj = Tensor::from_vec(diff_j, ii.dims(), &self.device)?;
            priors::causality(&s_t.index_select(&ii, 0)?, &s_t.index_select(&jj, 0)?)?
        };

        let w = self.cfg.weights;
        let mut total = ((&l_temporal * w.temporal)? + (&l_proportionality * w.proportionality)?)?;
        total = (total + (&l_causality * w.causality)?)?;
        total = (total + (&l_repeatability * w.repeatability)?)?;
        if training && self.cfg.l1_reg > 0.0 {
            let mut l1 = zero;
            for var in &self.vars {
                l1 = (l1 + var.as_tensor().abs()?.sum_all()?)?;
            }
            total = (total + (l1 * self.cfg.l1_reg)?)?;
        }

        let terms = [
            l_temporal.to_scalar::<f64>()?,
            l_proportionality.to_scalar::<f64>()?,
            l_causality.to_scalar::<f64>()?,
            l_repeatability.to_scalar::<f64>()?,
        ];
        Ok((total, terms))
    }
}
