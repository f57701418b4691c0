use std::sync::PoisonError;

use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use itertools::Itertools;

use crate::error::{ModelError, Result};

use self::critic::CriticOutput;

pub mod actor;
pub mod critic;
pub mod multi_agent;
pub mod utils;

pub trait Policy {
    type Logits;
    fn action_logits(&self, obs: &Tensor) -> Result<Self::Logits>;
}

pub trait ValueEstimator {
    fn estimate_value(
        &self,
        obs_n: &[Tensor],
        act_n: &[Tensor],
        with_q2: bool,
    ) -> Result<CriticOutput>;
}

/// A network whose learnable tensors all live in one [`VarMap`].
pub trait Parameterized {
    fn varmap(&self) -> &VarMap;

    fn parameters(&self) -> Vec<Var> {
        self.varmap().all_vars()
    }

    /// Variables sorted by name.
    fn named_parameters(&self) -> Vec<(String, Var)> {
        let data = self
            .varmap()
            .data()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        data.iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .collect_vec()
    }

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|v| v.elem_count()).sum()
    }
}

pub trait CopyWeights {
    /// Blended values `(1 - tau) * self + tau * other` for every variable of
    /// `self`. Nothing is written; every pair is checked before any tensor math.
    fn blend(&self, other: &Self, tau: f64) -> Result<Vec<(Var, Tensor)>>;

    fn soft_update(&self, other: &Self, tau: f64) -> Result<()> {
        apply_updates(self.blend(other, tau)?)
    }

    fn hard_update(&self, other: &Self) -> Result<()> {
        self.soft_update(other, 1.0)
    }
}

/// Writes values produced by [`CopyWeights::blend`].
pub fn apply_updates(updates: Vec<(Var, Tensor)>) -> Result<()> {
    for (var, value) in updates {
        var.set(&value)?;
    }
    Ok(())
}

impl<T: Parameterized> CopyWeights for T {
    fn blend(&self, other: &Self, tau: f64) -> Result<Vec<(Var, Tensor)>> {
        if !(0.0..=1.0).contains(&tau) {
            return Err(ModelError::Config(format!(
                "soft update tau must lie in [0, 1], got {tau}"
            )));
        }
        // Snapshot both maps first so the locks are never held together.
        let theirs = other.named_parameters();
        let mine = self.named_parameters();
        if mine.len() != theirs.len() {
            return Err(ModelError::ParamCount {
                expected: mine.len(),
                actual: theirs.len(),
            });
        }
        for ((name, my_var), (other_name, other_var)) in mine.iter().zip(theirs.iter()) {
            if name != other_name {
                return Err(ModelError::Config(format!(
                    "variable {name} has no counterpart in the source model"
                )));
            }
            if my_var.dims() != other_var.dims() {
                return Err(ModelError::VarShape {
                    name: name.clone(),
                    expected: my_var.dims().to_vec(),
                    actual: other_var.dims().to_vec(),
                });
            }
        }

        let mut updates = Vec::with_capacity(mine.len());
        for ((_, my_var), (_, other_var)) in mine.into_iter().zip(theirs) {
            if my_var.as_tensor().id() == other_var.as_tensor().id() {
                continue;
            }
            let new_var = if tau == 1.0 {
                other_var.as_tensor().copy()?
            } else {
                my_var
                    .as_tensor()
                    .affine(1.0 - tau, 0.0)?
                    .add(&other_var.as_tensor().affine(tau, 0.0)?)?
            };
            updates.push((my_var, new_var));
        }
        Ok(updates)
    }
}
