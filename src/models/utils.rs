use candle_core::{DType, Tensor, Var};
use candle_nn::{AdamW, Linear, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use itertools::Itertools;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, Result},
    hparams::XAVIER_GAIN,
    DEVICE,
};

/// Weight initialization for linear layers. Biases always start at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitScheme {
    /// Glorot uniform: `U(-b, b)` with `b = gain * sqrt(6 / (fan_in + fan_out))`.
    XavierUniform { gain: f64 },
    /// He normal: `N(0, (gain / sqrt(fan_in))^2)`.
    KaimingNormal { gain: f64 },
}

impl Default for InitScheme {
    fn default() -> Self {
        InitScheme::XavierUniform { gain: XAVIER_GAIN }
    }
}

impl InitScheme {
    pub fn gain(&self) -> f64 {
        match *self {
            InitScheme::XavierUniform { gain } | InitScheme::KaimingNormal { gain } => gain,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let gain = self.gain();
        if !gain.is_finite() || gain <= 0.0 {
            return Err(ModelError::Config(format!(
                "init gain must be positive and finite, got {gain}"
            )));
        }
        Ok(())
    }

    /// Draws a `[fan_out, fan_in]` weight matrix from `rng`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<Tensor> {
        self.validate()?;
        let n = fan_in * fan_out;
        let values = match *self {
            InitScheme::XavierUniform { gain } => {
                let bound = (gain * (6.0 / (fan_in + fan_out) as f64).sqrt()) as f32;
                let dist = Uniform::new_inclusive(-bound, bound);
                (0..n).map(|_| dist.sample(rng)).collect_vec()
            }
            InitScheme::KaimingNormal { gain } => {
                let std = gain / (fan_in as f64).sqrt();
                let dist = Normal::new(0.0f32, std as f32)
                    .map_err(|e| ModelError::Config(format!("bad Kaiming std {std}: {e}")))?;
                (0..n).map(|_| dist.sample(rng)).collect_vec()
            }
        };
        Ok(Tensor::from_vec(values, (fan_out, fan_in), &DEVICE)?)
    }
}

/// Registers `{name}.weight` and `{name}.bias` in `varmap` and returns the layer
/// backed by those variables.
pub fn linear<R: Rng + ?Sized>(
    in_len: usize,
    out_len: usize,
    init: &InitScheme,
    rng: &mut R,
    varmap: &mut VarMap,
    name: &str,
) -> Result<Linear> {
    let zeros = candle_nn::Init::Const(0.0);
    let (weight, bias) = {
        let vs = VarBuilder::from_varmap(varmap, DType::F32, &DEVICE).pp(name);
        let weight = vs.get_with_hints((out_len, in_len), "weight", zeros)?;
        let bias = vs.get_with_hints(out_len, "bias", zeros)?;
        (weight, bias)
    };
    let sampled = init.sample(in_len, out_len, rng)?;
    varmap.set_one(format!("{name}.weight"), &sampled)?;
    Ok(Linear::new(weight, Some(bias)))
}

pub fn adam(vars: Vec<Var>, lr: f64) -> Result<AdamW> {
    let optim = AdamW::new(
        vars,
        ParamsAdamW {
            lr,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;
    Ok(optim)
}

/// Splits a rank-1 or rank-2 input into its batch size (if any) and feature width.
pub(crate) fn batch_and_width(x: &Tensor, input: &str) -> Result<(Option<usize>, usize)> {
    match *x.dims() {
        [width] => Ok((None, width)),
        [batch, width] => Ok((Some(batch), width)),
        _ => Err(ModelError::Rank {
            input: input.to_owned(),
            rank: x.rank(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_xavier_bound() -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let w = InitScheme::default().sample(12, 64, &mut rng)?;
        assert_eq!(w.dims(), &[64, 12]);
        let bound = (6.0f32 / 76.0).sqrt();
        let values = w.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.abs() <= bound));
        assert!(values.iter().any(|v| *v != 0.0));
        Ok(())
    }

    #[test]
    fn test_kaiming_spread() -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let init = InitScheme::KaimingNormal { gain: 5.0 / 3.0 };
        let w = init.sample(64, 64, &mut rng)?;
        let values = w.flatten_all()?.to_vec1::<f32>()?;
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        let expected = (5.0f32 / 3.0).powi(2) / 64.0;
        assert!(mean.abs() < 0.02, "{mean}");
        assert!((var - expected).abs() / expected < 0.15, "{var} vs {expected}");
        Ok(())
    }

    #[test]
    fn test_bad_gain() {
        let init = InitScheme::XavierUniform { gain: 0.0 };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = init.sample(2, 2, &mut rng).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
    }

    #[test]
    fn test_adam_step_moves_weights() -> Result<()> {
        let mut varmap = VarMap::new();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let layer = linear(3, 2, &InitScheme::default(), &mut rng, &mut varmap, "fc")?;
        let before = layer.weight().to_vec2::<f32>()?;
        let mut optim = adam(varmap.all_vars(), 1e-2)?;
        let x = Tensor::ones((4, 3), DType::F32, &DEVICE)?;
        let loss = candle_core::Module::forward(&layer, &x)?.sqr()?.sum_all()?;
        optim.backward_step(&loss)?;
        assert_ne!(layer.weight().to_vec2::<f32>()?, before);
        Ok(())
    }

    #[test]
    fn test_linear_registers_vars() -> Result<()> {
        let mut varmap = VarMap::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let layer = linear(3, 5, &InitScheme::default(), &mut rng, &mut varmap, "fc")?;
        assert_eq!(layer.weight().dims(), &[5, 3]);
        let data = varmap.data().lock().unwrap();
        assert_eq!(data.len(), 2);
        let stored = data["fc.weight"].as_tensor().to_vec2::<f32>()?;
        assert_eq!(stored, layer.weight().to_vec2::<f32>()?);
        let bias = data["fc.bias"].as_tensor().to_vec1::<f32>()?;
        assert_eq!(bias, vec![0.0; 5]);
        Ok(())
    }
}
