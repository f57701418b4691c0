use candle_core::{Tensor, Var};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{config::MaModelParams, error::Result};

use super::{
    actor::{ActorNetwork, PolicyOutput},
    critic::{CriticNetwork, CriticOutput},
    apply_updates, CopyWeights, Parameterized,
};

/// One actor and one twin critic, with separately exposed parameter sets.
pub struct MultiAgentModel {
    actor: ActorNetwork,
    critic: CriticNetwork,
    params: MaModelParams,
}

impl MultiAgentModel {
    /// Builds the actor and then the critic from a single RNG seeded with
    /// `params.seed`, so equal params always give equal weights.
    pub fn new(params: &MaModelParams) -> Result<Self> {
        params.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let actor = ActorNetwork::new(params.actor_config(), &mut rng)?;
        let critic = CriticNetwork::new(params.critic_config(), &mut rng)?;
        tracing::debug!(
            seed = params.seed,
            actor_parameters = actor.num_parameters(),
            critic_parameters = critic.num_parameters(),
            "built multi-agent model"
        );
        Ok(Self {
            actor,
            critic,
            params: params.clone(),
        })
    }

    pub fn policy(&self, obs: &Tensor) -> Result<PolicyOutput> {
        self.actor.forward(obs)
    }

    pub fn value(&self, obs_n: &[Tensor], act_n: &[Tensor], with_q2: bool) -> Result<CriticOutput> {
        self.critic.forward(obs_n, act_n, with_q2)
    }

    pub fn actor_parameters(&self) -> Vec<Var> {
        self.actor.parameters()
    }

    pub fn critic_parameters(&self) -> Vec<Var> {
        self.critic.parameters()
    }

    /// Moves `target` towards this model: `target <- (1 - tau) * target + tau * self`.
    pub fn sync_weights_to(&self, target: &MultiAgentModel, tau: f64) -> Result<()> {
        // Both networks are checked before the target is written.
        let mut updates = target.actor.blend(&self.actor, tau)?;
        updates.extend(target.critic.blend(&self.critic, tau)?);
        apply_updates(updates)?;
        tracing::debug!(tau, "synced weights to target model");
        Ok(())
    }

    pub fn actor(&self) -> &ActorNetwork {
        &self.actor
    }

    pub fn critic(&self) -> &CriticNetwork {
        &self.critic
    }

    pub fn params(&self) -> &MaModelParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        config::AgentDims,
        error::ModelError,
        models::utils::{adam, InitScheme},
        DEVICE,
    };
    use candle_core::DType;
    use candle_nn::Optimizer;

    fn snapshot(vars: &[Var]) -> Result<Vec<Vec<f32>>> {
        vars.iter()
            .map(|v| -> Result<Vec<f32>> { Ok(v.as_tensor().flatten_all()?.to_vec1::<f32>()?) })
            .collect()
    }

    fn named_snapshot<P: Parameterized>(net: &P) -> Result<Vec<(String, Vec<f32>)>> {
        net.named_parameters()
            .into_iter()
            .map(|(name, v)| -> Result<(String, Vec<f32>)> {
                Ok((name, v.as_tensor().flatten_all()?.to_vec1::<f32>()?))
            })
            .collect()
    }

    #[test]
    fn test_two_agent_scenario() -> Result<()> {
        let model = MultiAgentModel::new(&MaModelParams::new(4, 2, 12))?;
        let action = model.policy(&Tensor::zeros(4, DType::F32, &DEVICE)?)?;
        assert_eq!(action.mean().dims(), &[2]);

        let obs = vec![Tensor::zeros(4, DType::F32, &DEVICE)?; 2];
        let act = vec![Tensor::zeros(2, DType::F32, &DEVICE)?; 2];
        let (q1, q2) = model.value(&obs, &act, true)?.into_pair();
        assert_eq!(q1.rank(), 0);
        assert_eq!(q2.unwrap().rank(), 0);
        Ok(())
    }

    #[test]
    fn test_continuous_policy() -> Result<()> {
        let params = MaModelParams::homogeneous(2, 4, 2).with_continuous_actions(true);
        let model = MultiAgentModel::new(&params)?;
        let obs = Tensor::randn(0.0f32, 1.0, (10, 4), &DEVICE)?;
        let out = model.policy(&obs)?;
        assert_eq!(out.mean().dims(), &[10, 2]);
        assert_eq!(out.std().unwrap().dims(), &[10, 2]);
        Ok(())
    }

    #[test]
    fn test_parameter_sets_are_disjoint() -> Result<()> {
        let model = MultiAgentModel::new(&MaModelParams::homogeneous(2, 4, 2))?;
        let actor_ids = model
            .actor_parameters()
            .iter()
            .map(|v| v.as_tensor().id())
            .collect::<HashSet<_>>();
        let critic_ids = model
            .critic_parameters()
            .iter()
            .map(|v| v.as_tensor().id())
            .collect::<HashSet<_>>();
        assert_eq!(actor_ids.len(), 6);
        assert_eq!(critic_ids.len(), 12);
        assert!(actor_ids.is_disjoint(&critic_ids));
        Ok(())
    }

    #[test]
    fn test_seed_reproducibility() -> Result<()> {
        let params = MaModelParams::homogeneous(2, 4, 2).with_seed(17);
        let a = MultiAgentModel::new(&params)?;
        let b = MultiAgentModel::new(&params)?;
        let c = MultiAgentModel::new(&params.clone().with_seed(18))?;
        assert_eq!(named_snapshot(a.actor())?, named_snapshot(b.actor())?);
        assert_eq!(named_snapshot(a.critic())?, named_snapshot(b.critic())?);
        assert_ne!(named_snapshot(a.actor())?, named_snapshot(c.actor())?);

        let obs = Tensor::randn(0.0f32, 1.0, (4, 4), &DEVICE)?;
        assert_eq!(
            a.policy(&obs)?.mean().to_vec2::<f32>()?,
            b.policy(&obs)?.mean().to_vec2::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn test_critic_step_leaves_actor_untouched() -> Result<()> {
        let model = MultiAgentModel::new(&MaModelParams::homogeneous(2, 4, 2))?;
        let actor_before = snapshot(&model.actor_parameters())?;
        let critic_vars = model.critic_parameters();
        let critic_before = snapshot(&critic_vars)?;

        let mut optim = adam(critic_vars.clone(), 1e-2)?;
        let obs = vec![Tensor::randn(0.0f32, 1.0, (16, 4), &DEVICE)?; 2];
        let act = vec![Tensor::randn(0.0f32, 1.0, (16, 2), &DEVICE)?; 2];
        let target = Tensor::ones(16, DType::F32, &DEVICE)?;
        let (q1, q2) = model.value(&obs, &act, true)?.into_pair();
        let loss = ((q1 - &target)?.sqr()?.mean_all()? + (q2.unwrap() - &target)?.sqr()?.mean_all()?)?;
        optim.backward_step(&loss)?;

        assert_eq!(snapshot(&model.actor_parameters())?, actor_before);
        assert_ne!(snapshot(&critic_vars)?, critic_before);
        Ok(())
    }

    #[test]
    fn test_policy_loss_reaches_actor() -> Result<()> {
        let model = MultiAgentModel::new(&MaModelParams::homogeneous(2, 4, 2))?;
        let obs = Tensor::randn(0.0f32, 1.0, (8, 4), &DEVICE)?;
        let loss = model.policy(&obs)?.mean().sqr()?.sum_all()?;
        let grads = loss.backward()?;
        for var in model.actor_parameters() {
            assert!(grads.get(var.as_tensor()).is_some());
        }
        for var in model.critic_parameters() {
            assert!(grads.get(var.as_tensor()).is_none());
        }
        Ok(())
    }

    #[test]
    fn test_sync_weights() -> Result<()> {
        let params = MaModelParams::homogeneous(2, 4, 2);
        let online = MultiAgentModel::new(&params)?;
        let target = MultiAgentModel::new(&params.clone().with_seed(1))?;

        let online_actor = named_snapshot(online.actor())?;
        let target_actor = named_snapshot(target.actor())?;
        online.sync_weights_to(&target, 0.25)?;
        for ((name, after), ((_, before), (_, src))) in named_snapshot(target.actor())?
            .into_iter()
            .zip(target_actor.iter().zip(online_actor.iter()))
        {
            for ((a, b), s) in after.iter().zip(before).zip(src) {
                let expected = 0.75 * b + 0.25 * s;
                assert!((a - expected).abs() < 1e-6, "{name}: {a} vs {expected}");
            }
        }

        online.sync_weights_to(&target, 1.0)?;
        assert_eq!(named_snapshot(target.actor())?, online_actor);
        assert_eq!(
            named_snapshot(target.critic())?,
            named_snapshot(online.critic())?
        );
        // the source is never written
        assert_eq!(named_snapshot(online.actor())?, online_actor);
        Ok(())
    }

    #[test]
    fn test_failed_sync_leaves_target_untouched() -> Result<()> {
        let online = MultiAgentModel::new(&MaModelParams::homogeneous(2, 4, 2))?;
        // same actor shape, wider critic input
        let target = MultiAgentModel::new(&MaModelParams::new(4, 2, 18).with_seed(5))?;
        let actor_before = named_snapshot(target.actor())?;
        let critic_before = named_snapshot(target.critic())?;

        let err = online.sync_weights_to(&target, 1.0).unwrap_err();
        assert!(matches!(err, ModelError::VarShape { .. }), "{err}");
        assert_eq!(named_snapshot(target.actor())?, actor_before);
        assert_eq!(named_snapshot(target.critic())?, critic_before);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_reports_dims() -> Result<()> {
        let online = MultiAgentModel::new(&MaModelParams::homogeneous(2, 4, 2))?;
        let target = MultiAgentModel::new(&MaModelParams::new(4, 2, 18))?;
        match online.sync_weights_to(&target, 0.5).unwrap_err() {
            ModelError::VarShape {
                name,
                expected,
                actual,
            } => {
                assert_eq!(name, "q1.l1.weight");
                assert_eq!(expected, vec![64, 18]);
                assert_eq!(actual, vec![64, 12]);
            }
            err => panic!("unexpected error: {err}"),
        }
        Ok(())
    }

    #[test]
    fn test_sync_weights_errors() -> Result<()> {
        let online = MultiAgentModel::new(&MaModelParams::homogeneous(2, 4, 2))?;
        let err = online.sync_weights_to(&online, 1.5).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));

        let wider = MaModelParams::new(4, 2, 12)
            .with_agents(vec![AgentDims::new(4, 2), AgentDims::new(4, 2)])
            .with_continuous_actions(true);
        let other = MultiAgentModel::new(&wider)?;
        assert!(online.sync_weights_to(&other, 0.5).unwrap_err().is_shape_error());

        let mut narrow = MaModelParams::homogeneous(2, 4, 2);
        narrow.hidden_dim = 32;
        narrow.init = InitScheme::KaimingNormal { gain: 1.0 };
        let other = MultiAgentModel::new(&narrow)?;
        assert!(online.sync_weights_to(&other, 0.5).unwrap_err().is_shape_error());
        Ok(())
    }
}
