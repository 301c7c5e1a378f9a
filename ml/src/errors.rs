use ndarray::ShapeError;
use ndarray_npy::{ReadNpzError, WriteNpzError};
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("keep_prob must be a scalar tensor or a float in the range (0, 1], got {0}")]
    KeepProbabilityError(f32),
    #[error("Variable {0} already exists, open the scope with reuse to share it")]
    VariableExistsError(String),
    #[error("No variable with name {0} found")]
    VariableKeyError(String),
    #[error("Invalid shape: {0}")]
    InvalidShapeError(String),
    #[error("Noise shape {noise:?} is not broadcastable to input shape {input:?}")]
    NoiseShapeError {
        noise: Vec<usize>,
        input: Vec<usize>,
    },
    #[error("Weight file didn't have the correct format (required: JSON dict of pairs (key, flattened array of weights))")]
    WeightFormatError,
    #[error("File access failed. Filesystem reported error\n {0}.")]
    IoError(#[from] std::io::Error),
    #[error("Checkpoint not readable. Reported error\n {0}.")]
    NpzReadError(#[from] ReadNpzError),
    #[error("Checkpoint not writable. Reported error\n {0}.")]
    NpzWriteError(#[from] WriteNpzError),
    #[error("Summary serialization failed:\n {0}.")]
    JsonError(#[from] serde_json::Error),
    #[error("Summary image could not be saved:\n {0}.")]
    ImageError(#[from] image::ImageError),
    #[error("Wrong shape for array:\n {0}.")]
    ShapeError(#[from] ShapeError),
}
