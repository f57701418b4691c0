use std::path::PathBuf;

use candle_core::{DType, Tensor};
use candle_nn::Optimizer;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mamodel::{
    hparams::{CRITIC_LR, SOFT_UPDATE_TAU},
    models::utils::adam,
    MaModelParams, MultiAgentModel, Parameterized, Result, DEVICE,
};

/// Builds a multi-agent model from YAML params and runs one forward pass,
/// one critic update and one target sync on zero-filled inputs.
#[derive(Parser, Debug)]
#[command(name = "mamodel-probe")]
struct Args {
    /// YAML file with model params. Defaults to two agents with 4-dim
    /// observations and 2-dim actions.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Batch size of the probe inputs.
    #[arg(short, long, default_value_t = 8)]
    batch: usize,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let params = match &args.config {
        Some(path) => MaModelParams::from_yaml_file(path)?,
        None => MaModelParams::homogeneous(2, 4, 2),
    };
    info!("params:\n{}", params.to_yaml()?);

    let model = MultiAgentModel::new(&params)?;
    let target = MultiAgentModel::new(&params)?;
    info!(
        actor_parameters = model.actor().num_parameters(),
        critic_parameters = model.critic().num_parameters(),
        "model ready"
    );

    let obs = Tensor::zeros((args.batch, params.obs_dim), DType::F32, &DEVICE)?;
    let policy = model.policy(&obs)?;
    info!(
        mean = ?policy.mean().dims(),
        std = ?policy.std().map(|s| s.dims().to_vec()),
        "policy output"
    );

    // Without per-agent dims the critic input is one observation block and
    // one action block whose widths add up to critic_in_dim.
    let (obs_n, act_n) = match &params.agents {
        Some(agents) => {
            let obs_n = agents
                .iter()
                .map(|a| Tensor::zeros((args.batch, a.obs_dim), DType::F32, &DEVICE))
                .collect::<candle_core::Result<Vec<_>>>()?;
            let act_n = agents
                .iter()
                .map(|a| Tensor::zeros((args.batch, a.act_dim), DType::F32, &DEVICE))
                .collect::<candle_core::Result<Vec<_>>>()?;
            (obs_n, act_n)
        }
        None => {
            let act_width = params.act_dim.min(params.critic_in_dim - 1);
            (
                vec![Tensor::zeros(
                    (args.batch, params.critic_in_dim - act_width),
                    DType::F32,
                    &DEVICE,
                )?],
                vec![Tensor::zeros((args.batch, act_width), DType::F32, &DEVICE)?],
            )
        }
    };

    let mut critic_optim = adam(model.critic_parameters(), CRITIC_LR)?;

    let (q1, q2) = model.value(&obs_n, &act_n, true)?.into_pair();
    info!(q1 = ?q1.dims(), q2 = ?q2.as_ref().map(|q| q.dims().to_vec()), "value output");

    let returns = Tensor::ones(args.batch, DType::F32, &DEVICE)?;
    let loss = (q1 - &returns)?.sqr()?.mean_all()?;
    info!(loss = loss.to_scalar::<f32>()?, "critic loss before update");
    critic_optim.backward_step(&loss)?;

    let (q1, _) = model.value(&obs_n, &act_n, false)?.into_pair();
    let loss = (q1 - &returns)?.sqr()?.mean_all()?;
    info!(loss = loss.to_scalar::<f32>()?, "critic loss after update");

    model.sync_weights_to(&target, SOFT_UPDATE_TAU)?;
    info!(tau = SOFT_UPDATE_TAU, "target model synced");
    Ok(())
}
