//! Building blocks for convolutional neural networks on top of ndarray:
//! variable initialization, convolutional and fully connected layers, batch normalization,
//! dropout variants and visualization of kernels and activations.
//!
//! Layers register their variables, weight decay terms and summaries in a
//! [`context::ModelContext`].
pub mod activation_functions;
pub mod batch_norm;
pub mod checkpoint;
pub mod context;
pub mod convolutions;
pub mod dropout;
pub mod errors;
pub mod fully_connected;
pub mod initializers;
pub mod layers;
pub mod summaries;
pub mod visualization;

pub type WeightPrecision = f32;
pub type ImagePrecision = f32;
