//! Input pipeline for image datasets: conversion of labeled images to TFRecord files,
//! reading them back, colorspace transforms and queued batching.
pub mod batch;
pub mod colorspace;
pub mod errors;
pub mod input_type;
pub mod proto;
pub mod tfrecord;

pub use batch::{generate_image_and_label_batch, BatchConfig, BatchQueue};
pub use input_type::InputType;
pub use tfrecord::{convert_to_tfrecords, read_tfrecords, Dataset, ImageRecord};
