use ml::errors::ModelError;
use ndarray::ShapeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Images size {0} does not match label size {1}.")]
    SizeMismatchError(usize, usize),
    #[error("Unknown input type {0}, expected one of train, validation, test.")]
    InputTypeError(String),
    #[error("Expected an image with 3 channels, got shape {0:?}.")]
    ChannelError(Vec<usize>),
    #[error("Corrupted record: {0}.")]
    CorruptedRecordError(String),
    #[error("Record has no int64 or bytes feature named {0}.")]
    MissingFeatureError(String),
    #[error("Image of {height}x{width}x{depth} elements can't be stored in {len} bytes.")]
    ImageSizeError {
        height: i64,
        width: i64,
        depth: i64,
        len: usize,
    },
    #[error("Batch size has to be positive.")]
    BatchSizeError,
    #[error("File access failed. Filesystem reported error\n {0}.")]
    IoError(#[from] std::io::Error),
    #[error("Record is not a valid tf.Example:\n {0}.")]
    DecodeError(#[from] prost::DecodeError),
    #[error("Wrong shape for array:\n {0}.")]
    ShapeError(#[from] ShapeError),
    #[error(transparent)]
    ModelError(#[from] ModelError),
}

pub type InputResult<T> = std::result::Result<T, InputError>;
