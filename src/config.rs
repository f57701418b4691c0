use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, Result},
    hparams::{DEFAULT_SEED, HIDDEN_DIM},
    models::{actor::ActorConfig, critic::CriticConfig, utils::InitScheme},
};

/// Observation and action widths of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDims {
    pub obs_dim: usize,
    pub act_dim: usize,
}

impl AgentDims {
    pub fn new(obs_dim: usize, act_dim: usize) -> Self {
        Self { obs_dim, act_dim }
    }

    pub fn width(&self) -> usize {
        self.obs_dim + self.act_dim
    }
}

fn default_hidden_dim() -> usize {
    HIDDEN_DIM
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaModelParams {
    pub obs_dim: usize,
    pub act_dim: usize,
    pub critic_in_dim: usize,
    #[serde(default)]
    pub continuous_actions: bool,
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentDims>>,
    #[serde(default)]
    pub init: InitScheme,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl MaModelParams {
    pub fn new(obs_dim: usize, act_dim: usize, critic_in_dim: usize) -> Self {
        Self {
            obs_dim,
            act_dim,
            critic_in_dim,
            continuous_actions: false,
            hidden_dim: HIDDEN_DIM,
            agents: None,
            init: InitScheme::default(),
            seed: DEFAULT_SEED,
        }
    }

    /// `n` identical agents; the critic sees all of their observations and actions.
    pub fn homogeneous(num_agents: usize, obs_dim: usize, act_dim: usize) -> Self {
        let agents = vec![AgentDims::new(obs_dim, act_dim); num_agents];
        Self::new(obs_dim, act_dim, num_agents * (obs_dim + act_dim)).with_agents(agents)
    }

    pub fn with_agents(mut self, agents: Vec<AgentDims>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_continuous_actions(mut self, continuous_actions: bool) -> Self {
        self.continuous_actions = continuous_actions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (what, dim) in [
            ("obs_dim", self.obs_dim),
            ("act_dim", self.act_dim),
            ("critic_in_dim", self.critic_in_dim),
            ("hidden_dim", self.hidden_dim),
        ] {
            if dim == 0 {
                return Err(ModelError::Config(format!("{what} must be positive")));
            }
        }
        if let Some(agents) = &self.agents {
            if agents.is_empty() {
                return Err(ModelError::Config("agent list must not be empty".to_owned()));
            }
            if let Some(i) = agents.iter().position(|a| a.obs_dim == 0 || a.act_dim == 0) {
                return Err(ModelError::Config(format!(
                    "agent {i} has a zero-width observation or action"
                )));
            }
            let own = AgentDims::new(self.obs_dim, self.act_dim);
            if !agents.contains(&own) {
                return Err(ModelError::Config(format!(
                    "actor dims (obs {}, act {}) match none of the configured agents",
                    self.obs_dim, self.act_dim
                )));
            }
            let total = agents.iter().map(AgentDims::width).sum::<usize>();
            if total != self.critic_in_dim {
                return Err(ModelError::Config(format!(
                    "critic_in_dim is {} but the agents' observations and actions add up to {total}",
                    self.critic_in_dim
                )));
            }
        }
        self.init.validate()
    }

    pub fn actor_config(&self) -> ActorConfig {
        ActorConfig {
            obs_dim: self.obs_dim,
            act_dim: self.act_dim,
            hidden_dim: self.hidden_dim,
            continuous_actions: self.continuous_actions,
            init: self.init,
        }
    }

    pub fn critic_config(&self) -> CriticConfig {
        CriticConfig {
            critic_in_dim: self.critic_in_dim,
            hidden_dim: self.hidden_dim,
            init: self.init,
            agents: self.agents.clone(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = File::create(path)?;
        let s = self.to_yaml()?;
        write!(f, "{}", s)?;
        Ok(())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let this: Self = serde_yaml::from_str(yaml)?;
        this.validate()?;
        Ok(this)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut f = File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        Self::from_yaml(s.as_str())
    }
}
