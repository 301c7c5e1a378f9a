//! Variable initializers.
//!
//! The default initializer for weights is the variance scaling initializer
//! with the parameters proposed by He et al. 2015, <https://arxiv.org/abs/1502.01852>
//! (factor 2, fan in, normal distribution), biases default to a constant 0.
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};
use ndarray_rand::RandomExt;

use crate::errors::{ModelError, ModelResult};
use crate::WeightPrecision;

/// Which fan is used to compute the variance of the initial weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    FanIn,
    FanOut,
    FanAvg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    /// Samples with a variance of `factor / n`, where `n` is picked by the mode.
    /// The normal variant uses a truncated normal distribution (cut at two standard
    /// deviations), the standard deviation is corrected by a factor of 1.3 to account for
    /// the truncation.
    VarianceScaling {
        factor: f64,
        mode: FanMode,
        uniform: bool,
    },
    Constant(WeightPrecision),
    Zeros,
    Ones,
}

impl Initializer {
    /// He initialization, the default of [`crate::layers::weight`].
    pub fn he() -> Self {
        Initializer::VarianceScaling {
            factor: 2.0,
            mode: FanMode::FanIn,
            uniform: false,
        }
    }

    pub fn initialize<R: Rng + ?Sized>(
        &self,
        shape: &[usize],
        rng: &mut R,
    ) -> ModelResult<ArrayD<WeightPrecision>> {
        let dim = IxDyn(shape);
        let arr = match *self {
            Initializer::Constant(v) => ArrayD::from_elem(dim, v),
            Initializer::Zeros => ArrayD::zeros(dim),
            Initializer::Ones => ArrayD::ones(dim),
            Initializer::VarianceScaling {
                factor,
                mode,
                uniform,
            } => {
                let (fan_in, fan_out) = fans(shape);
                let n = match mode {
                    FanMode::FanIn => fan_in,
                    FanMode::FanOut => fan_out,
                    FanMode::FanAvg => (fan_in + fan_out) / 2.0,
                };
                if n <= 0.0 {
                    return Err(ModelError::InvalidShapeError(format!(
                        "cannot compute the fan of shape {:?}",
                        shape
                    )));
                }
                if uniform {
                    let limit = (3.0 * factor / n).sqrt() as f32;
                    ArrayD::random_using(dim, Uniform::new_inclusive(-limit, limit), rng)
                } else {
                    let stddev = (1.3 * factor / n).sqrt() as f32;
                    truncated_normal(dim, stddev, rng)?
                }
            }
        };
        Ok(arr)
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::he()
    }
}

/// Computes (fan in, fan out) of a weight shape.
/// Convolution kernels are expected as (height, width, input channels, output channels),
/// fully connected weights as (input units, output units).
fn fans(shape: &[usize]) -> (f64, f64) {
    match shape.len() {
        0 => (1.0, 1.0),
        1 => (shape[0] as f64, shape[0] as f64),
        2 => (shape[0] as f64, shape[1] as f64),
        n => {
            let receptive_field: usize = shape[..n - 2].iter().product();
            (
                (receptive_field * shape[n - 2]) as f64,
                (receptive_field * shape[n - 1]) as f64,
            )
        }
    }
}

/// Normal samples, values further than two standard deviations from the mean are redrawn.
fn truncated_normal<R: Rng + ?Sized>(
    dim: IxDyn,
    stddev: f32,
    rng: &mut R,
) -> ModelResult<ArrayD<WeightPrecision>> {
    let normal = Normal::new(0.0f32, stddev).map_err(|_| {
        ModelError::InvalidShapeError(format!("invalid standard deviation {}", stddev))
    })?;
    let mut arr = ArrayD::zeros(dim);
    for v in arr.iter_mut() {
        let mut sample = normal.sample(rng);
        while sample.abs() > 2.0 * stddev {
            sample = normal.sample(rng);
        }
        *v = sample;
    }
    Ok(arr)
}
