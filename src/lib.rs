//! Actor and twin-critic networks for multi-agent actor-critic learning,
//! built on candle.
//!
//! [`MultiAgentModel`] owns one [`ActorNetwork`] and one [`CriticNetwork`]
//! and hands out their parameter sets separately so each can be driven by
//! its own optimizer.

use candle_core::Device;

pub mod config;
pub mod error;
pub mod hparams;
pub mod models;

pub use config::{AgentDims, MaModelParams};
pub use error::{ModelError, Result};
pub use models::{
    actor::{ActorConfig, ActorNetwork, PolicyOutput},
    critic::{CriticConfig, CriticNetwork, CriticOutput},
    multi_agent::MultiAgentModel,
    utils::InitScheme,
    CopyWeights, Parameterized, Policy, ValueEstimator,
};

lazy_static::lazy_static! {
    pub static ref DEVICE: Device = Device::Cpu;
}
