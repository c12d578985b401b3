use candle_core::{DType, Device, Module, Result, Tensor, Var};
use candle_nn::Linear;
use rand::rngs::StdRng;
use rand::Rng;

/// Encoder mapping flattened observations to state vectors.
///
/// With `hidden_units` the network is Linear -> tanh -> Linear; without it
/// the encoder stays strictly linear.
#[derive(Debug, Clone)]
pub struct Encoder {
    hidden: Option<Linear>,
    out: Linear,
}

impl Encoder {
    /// Builds the encoder with weights drawn from `rng`, uniform in
    /// +-1/sqrt(fan_in), biases zero. Returns the trainable vars alongside
    /// so the caller can own the optimizer.
    pub fn new(
        obs_dim: usize,
        state_dim: usize,
        hidden_units: Option<usize>,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<(Self, Vec<Var>)> {
        let mut vars = Vec::new();
        let (hidden, feat_dim) = match hidden_units {
            Some(units) => {
                let (layer, mut v) = init_linear(obs_dim, units, rng, device)?;
                vars.append(&mut v);
                (Some(layer), units)
            }
            None => (None, obs_dim),
        };
        let (out, mut v) = init_linear(feat_dim, state_dim, rng, device)?;
        vars.append(&mut v);
        Ok((Self { hidden, out }, vars))
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = match &self.hidden {
            Some(layer) => layer.forward(xs)?.tanh()?,
            None => xs.clone(),
        };
        self.out.forward(&xs)
    }
}

fn init_linear(
    in_dim: usize,
    out_dim: usize,
    rng: &mut StdRng,
    device: &Device,
) -> Result<(Linear, Vec<Var>)> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let weights: Vec<f64> = (0..in_dim * out_dim)
        .map(|_| rng.gen_range(-bound..bound))
        .collect();
    let weight = Var::from_tensor(&Tensor::from_vec(weights, (out_dim, in_dim), device)?)?;
    let bias = Var::from_tensor(&Tensor::zeros((out_dim,), DType::F64, device)?)?;
    let layer = Linear::new(weight.as_tensor().clone(), Some(bias.as_tensor().clone()));
    Ok((layer, vec![weight, bias]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn linear_encoder_produces_state_dim_outputs() {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let (encoder, vars) = Encoder::new(6, 2, None, &mut rng, &device).unwrap();
        assert_eq!(vars.len(), 2);

        let xs = Tensor::zeros((5, 6), DType::F64, &device).unwrap();
        let out = encoder.forward(&xs).unwrap();
        assert_eq!(out.dims(), &[5, 2]);
    }

    #[test]
    fn hidden_encoder_stacks_a_tanh_layer() {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let (encoder, vars) = Encoder::new(6, 3, Some(8), &mut rng, &device).unwrap();
        assert_eq!(vars.len(), 4);

        let xs = Tensor::ones((2, 6), DType::F64, &device).unwrap();
        let out = encoder.forward(&xs).unwrap();
        assert_eq!(out.dims(), &[2, 3]);
    }

    #[test]
    fn same_seed_builds_identical_weights() {
        let device = Device::Cpu;
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let (enc_a, _) = Encoder::new(4, 2, None, &mut rng_a, &device).unwrap();
        let (enc_b, _) = Encoder::new(4, 2, None, &mut rng_b, &device).unwrap();

        let xs = Tensor::ones((1, 4), DType::F64, &device).unwrap();
        let a = enc_a.forward(&xs).unwrap().to_vec2::<f64>().unwrap();
        let b = enc_b.forward(&xs).unwrap().to_vec2::<f64>().unwrap();
        assert_eq!(a, b);
    }
}
