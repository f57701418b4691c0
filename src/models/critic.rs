use candle_core::{Module, Tensor};
use candle_nn::{seq, Activation, Sequential, VarMap};
use itertools::Itertools;
use rand::Rng;

use crate::{
    config::AgentDims,
    error::{ModelError, Result},
    hparams::{CRITIC_OUT_DIM, HIDDEN_DIM},
};

use super::{
    utils::{batch_and_width, linear, InitScheme},
    Parameterized, ValueEstimator,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CriticConfig {
    pub critic_in_dim: usize,
    pub hidden_dim: usize,
    pub init: InitScheme,
    /// Per-agent widths, in the order their tensors are passed to `forward`.
    pub agents: Option<Vec<AgentDims>>,
}

impl CriticConfig {
    pub fn new(critic_in_dim: usize) -> Self {
        Self {
            critic_in_dim,
            hidden_dim: HIDDEN_DIM,
            init: InitScheme::default(),
            agents: None,
        }
    }

    pub fn for_agents(agents: Vec<AgentDims>) -> Self {
        let critic_in_dim = agents.iter().map(AgentDims::width).sum();
        Self {
            agents: Some(agents),
            ..Self::new(critic_in_dim)
        }
    }
}

#[derive(Debug, Clone)]
pub enum CriticOutput {
    Single(Tensor),
    Twin { q1: Tensor, q2: Tensor },
}

impl CriticOutput {
    pub fn q1(&self) -> &Tensor {
        match self {
            CriticOutput::Single(q1) | CriticOutput::Twin { q1, .. } => q1,
        }
    }

    pub fn q2(&self) -> Option<&Tensor> {
        match self {
            CriticOutput::Single(_) => None,
            CriticOutput::Twin { q2, .. } => Some(q2),
        }
    }

    pub fn into_pair(self) -> (Tensor, Option<Tensor>) {
        match self {
            CriticOutput::Single(q1) => (q1, None),
            CriticOutput::Twin { q1, q2 } => (q1, Some(q2)),
        }
    }
}

/// Twin Q-networks over the joint observations and actions of every agent.
pub struct CriticNetwork {
    q1: Sequential,
    q2: Sequential,
    config: CriticConfig,
    varmap: VarMap,
}

fn q_stack<R: Rng + ?Sized>(
    config: &CriticConfig,
    rng: &mut R,
    varmap: &mut VarMap,
    name: &str,
) -> Result<Sequential> {
    let CriticConfig {
        critic_in_dim,
        hidden_dim,
        init,
        ..
    } = *config;
    Ok(seq()
        .add(linear(
            critic_in_dim,
            hidden_dim,
            &init,
            rng,
            varmap,
            &format!("{name}.l1"),
        )?)
        .add(Activation::Relu)
        .add(linear(
            hidden_dim,
            hidden_dim,
            &init,
            rng,
            varmap,
            &format!("{name}.l2"),
        )?)
        .add(Activation::Relu)
        .add(linear(
            hidden_dim,
            CRITIC_OUT_DIM,
            &init,
            rng,
            varmap,
            &format!("{name}.l3"),
        )?))
}

impl CriticNetwork {
    pub fn new<R: Rng + ?Sized>(config: CriticConfig, rng: &mut R) -> Result<Self> {
        if config.critic_in_dim == 0 || config.hidden_dim == 0 {
            return Err(ModelError::Config(
                "critic dimensions must be positive".to_owned(),
            ));
        }
        if let Some(agents) = &config.agents {
            if agents.is_empty() {
                return Err(ModelError::Config(
                    "critic agent list must not be empty".to_owned(),
                ));
            }
            let total = agents.iter().map(AgentDims::width).sum::<usize>();
            if total != config.critic_in_dim {
                return Err(ModelError::Config(format!(
                    "critic_in_dim {} does not match the agents' total width {total}",
                    config.critic_in_dim
                )));
            }
        }
        config.init.validate()?;

        let mut varmap = VarMap::new();
        let q1 = q_stack(&config, rng, &mut varmap, "q1")?;
        let q2 = q_stack(&config, rng, &mut varmap, "q2")?;
        let this = Self {
            q1,
            q2,
            config,
            varmap,
        };
        tracing::debug!(
            critic_in_dim = this.config.critic_in_dim,
            hidden_dim = this.config.hidden_dim,
            num_agents = this.config.agents.as_ref().map(Vec::len),
            num_parameters = this.num_parameters(),
            "built critic network"
        );
        Ok(this)
    }

    pub fn config(&self) -> &CriticConfig {
        &self.config
    }

    /// Concatenates every observation, then every action, along the feature
    /// axis. Returns the joint input as `[batch, critic_in_dim]` and the batch
    /// size, or `None` when all inputs were single rank-1 vectors.
    fn joint_input(&self, obs_n: &[Tensor], act_n: &[Tensor]) -> Result<(Tensor, Option<usize>)> {
        if let Some(agents) = &self.config.agents {
            for (input, tensors) in [("observation", obs_n), ("action", act_n)] {
                if tensors.len() != agents.len() {
                    return Err(ModelError::AgentCount {
                        input: input.to_owned(),
                        expected: agents.len(),
                        actual: tensors.len(),
                    });
                }
            }
        }

        let obs_shapes = obs_n
            .iter()
            .enumerate()
            .map(|(i, o)| batch_and_width(o, &format!("observation {i}")))
            .collect::<Result<Vec<_>>>()?;
        let act_shapes = act_n
            .iter()
            .enumerate()
            .map(|(i, a)| batch_and_width(a, &format!("action {i}")))
            .collect::<Result<Vec<_>>>()?;

        let Some(&(batch, _)) = obs_shapes.first().or(act_shapes.first()) else {
            return Err(ModelError::Shape {
                input: "critic input".to_owned(),
                expected: self.config.critic_in_dim,
                actual: 0,
            });
        };
        for &(other, _) in obs_shapes.iter().chain(act_shapes.iter()) {
            match (batch, other) {
                (Some(b), Some(o)) if b != o => {
                    return Err(ModelError::BatchMismatch {
                        expected: b,
                        actual: o,
                    })
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(ModelError::Rank {
                        input: "critic input".to_owned(),
                        rank: if other.is_some() { 2 } else { 1 },
                    })
                }
                _ => {}
            }
        }

        if let Some(agents) = &self.config.agents {
            let checks = agents
                .iter()
                .zip(obs_shapes.iter())
                .enumerate()
                .map(|(i, (agent, (_, w)))| (format!("observation {i}"), agent.obs_dim, *w))
                .chain(
                    agents
                        .iter()
                        .zip(act_shapes.iter())
                        .enumerate()
                        .map(|(i, (agent, (_, w)))| (format!("action {i}"), agent.act_dim, *w)),
                );
            for (input, expected, actual) in checks {
                if expected != actual {
                    return Err(ModelError::Shape {
                        input,
                        expected,
                        actual,
                    });
                }
            }
        }

        let width = obs_shapes
            .iter()
            .chain(act_shapes.iter())
            .map(|(_, w)| w)
            .sum::<usize>();
        if width != self.config.critic_in_dim {
            return Err(ModelError::Shape {
                input: "critic input".to_owned(),
                expected: self.config.critic_in_dim,
                actual: width,
            });
        }

        let parts = obs_n.iter().chain(act_n.iter()).collect_vec();
        let inputs = match batch {
            Some(_) => Tensor::cat(&parts, 1)?,
            None => Tensor::cat(&parts, 0)?.unsqueeze(0)?,
        };
        Ok((inputs, batch))
    }

    fn head(&self, stack: &Sequential, inputs: &Tensor, batched: bool) -> Result<Tensor> {
        let q = stack.forward(inputs)?.squeeze(1)?;
        if batched {
            Ok(q)
        } else {
            Ok(q.squeeze(0)?)
        }
    }

    pub fn forward(&self, obs_n: &[Tensor], act_n: &[Tensor], with_q2: bool) -> Result<CriticOutput> {
        let (inputs, batch) = self.joint_input(obs_n, act_n)?;
        let batched = batch.is_some();
        let q1 = self.head(&self.q1, &inputs, batched)?;
        if with_q2 {
            let q2 = self.head(&self.q2, &inputs, batched)?;
            Ok(CriticOutput::Twin { q1, q2 })
        } else {
            Ok(CriticOutput::Single(q1))
        }
    }
}

impl ValueEstimator for CriticNetwork {
    fn estimate_value(
        &self,
        obs_n: &[Tensor],
        act_n: &[Tensor],
        with_q2: bool,
    ) -> Result<CriticOutput> {
        self.forward(obs_n, act_n, with_q2)
    }
}

impl Parameterized for CriticNetwork {
    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}
