use thiserror::Error;

/// Errors raised while building or evaluating the models.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Shape error: {input} expected trailing dimension {expected}, got {actual}")]
    Shape {
        input: String,
        expected: usize,
        actual: usize,
    },

    #[error("Shape error: {input} must have rank 1 or 2, got rank {rank}")]
    Rank { input: String, rank: usize },

    #[error("Shape error: expected {expected} {input} tensors, got {actual}")]
    AgentCount {
        input: String,
        expected: usize,
        actual: usize,
    },

    #[error("Shape error: batch size mismatch, expected {expected}, got {actual}")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("Shape error: variable {name} has dims {expected:?}, source has {actual:?}")]
    VarShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Shape error: expected {expected} variables, source has {actual}")]
    ParamCount { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// True for every variant caused by an input tensor of the wrong shape.
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            ModelError::Shape { .. }
                | ModelError::Rank { .. }
                | ModelError::AgentCount { .. }
                | ModelError::BatchMismatch { .. }
                | ModelError::VarShape { .. }
                | ModelError::ParamCount { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
