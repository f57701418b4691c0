pub const HIDDEN_DIM: usize = 64;
pub const CRITIC_OUT_DIM: usize = 1;
pub const XAVIER_GAIN: f64 = 1.0;
pub const DEFAULT_SEED: u64 = 0;
pub const SOFT_UPDATE_TAU: f64 = 0.01;
pub const CRITIC_LR: f64 = 1e-3;
