use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarMap};
use rand::Rng;

use crate::{
    error::{ModelError, Result},
    hparams::HIDDEN_DIM,
};

use super::{
    utils::{batch_and_width, linear, InitScheme},
    Parameterized, Policy,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ActorConfig {
    pub obs_dim: usize,
    pub act_dim: usize,
    pub hidden_dim: usize,
    pub continuous_actions: bool,
    pub init: InitScheme,
}

impl ActorConfig {
    pub fn new(obs_dim: usize, act_dim: usize, continuous_actions: bool) -> Self {
        Self {
            obs_dim,
            act_dim,
            hidden_dim: HIDDEN_DIM,
            continuous_actions,
            init: InitScheme::default(),
        }
    }
}

/// What the actor produces for a batch of observations.
#[derive(Debug, Clone)]
pub enum PolicyOutput {
    /// Action means, read downstream as logits or a deterministic action.
    Deterministic(Tensor),
    /// Action means plus the raw output of the std head. The head has no
    /// activation, so callers decide whether it is a std or a log-std.
    Gaussian { mean: Tensor, std: Tensor },
}

impl PolicyOutput {
    pub fn mean(&self) -> &Tensor {
        match self {
            PolicyOutput::Deterministic(mean) | PolicyOutput::Gaussian { mean, .. } => mean,
        }
    }

    pub fn std(&self) -> Option<&Tensor> {
        match self {
            PolicyOutput::Deterministic(_) => None,
            PolicyOutput::Gaussian { std, .. } => Some(std),
        }
    }

    pub fn into_pair(self) -> (Tensor, Option<Tensor>) {
        match self {
            PolicyOutput::Deterministic(mean) => (mean, None),
            PolicyOutput::Gaussian { mean, std } => (mean, Some(std)),
        }
    }
}

pub struct ActorNetwork {
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
    std_fc: Option<Linear>,
    config: ActorConfig,
    varmap: VarMap,
}

impl ActorNetwork {
    pub fn new<R: Rng + ?Sized>(config: ActorConfig, rng: &mut R) -> Result<Self> {
        let ActorConfig {
            obs_dim,
            act_dim,
            hidden_dim,
            continuous_actions,
            init,
        } = config;
        for (what, dim) in [
            ("obs_dim", obs_dim),
            ("act_dim", act_dim),
            ("hidden_dim", hidden_dim),
        ] {
            if dim == 0 {
                return Err(ModelError::Config(format!("actor {what} must be positive")));
            }
        }
        init.validate()?;

        let mut varmap = VarMap::new();
        let fc1 = linear(obs_dim, hidden_dim, &init, rng, &mut varmap, "fc1")?;
        let fc2 = linear(hidden_dim, hidden_dim, &init, rng, &mut varmap, "fc2")?;
        let fc3 = linear(hidden_dim, act_dim, &init, rng, &mut varmap, "fc3")?;
        let std_fc = if continuous_actions {
            Some(linear(hidden_dim, act_dim, &init, rng, &mut varmap, "std_fc")?)
        } else {
            None
        };

        let this = Self {
            fc1,
            fc2,
            fc3,
            std_fc,
            config,
            varmap,
        };
        tracing::debug!(
            obs_dim,
            act_dim,
            hidden_dim,
            continuous_actions,
            num_parameters = this.num_parameters(),
            "built actor network"
        );
        Ok(this)
    }

    pub fn config(&self) -> &ActorConfig {
        &self.config
    }

    pub fn forward(&self, obs: &Tensor) -> Result<PolicyOutput> {
        let (batch, width) = batch_and_width(obs, "observation")?;
        if width != self.config.obs_dim {
            return Err(ModelError::Shape {
                input: "observation".to_owned(),
                expected: self.config.obs_dim,
                actual: width,
            });
        }
        let x = match batch {
            Some(_) => obs.clone(),
            None => obs.unsqueeze(0)?,
        };

        let hid1 = self.fc1.forward(&x)?.relu()?;
        let hid2 = self.fc2.forward(&hid1)?.relu()?;
        let mean = self.fc3.forward(&hid2)?;
        let std = match &self.std_fc {
            Some(std_fc) => Some(std_fc.forward(&hid2)?),
            None => None,
        };

        let unbatch = |t: Tensor| -> Result<Tensor> {
            match batch {
                Some(_) => Ok(t),
                None => Ok(t.squeeze(0)?),
            }
        };
        let mean = unbatch(mean)?;
        Ok(match std {
            Some(std) => PolicyOutput::Gaussian {
                mean,
                std: unbatch(std)?,
            },
            None => PolicyOutput::Deterministic(mean),
        })
    }
}

impl Policy for ActorNetwork {
    type Logits = PolicyOutput;

    fn action_logits(&self, obs: &Tensor) -> Result<Self::Logits> {
        self.forward(obs)
    }
}

impl Parameterized for ActorNetwork {
    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}
