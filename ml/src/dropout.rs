//! Dropout variants.
//!
//! Both variants drop every element with probability `1 - keep_prob` (or groups of
//! elements, see `noise_shape`), they differ in how the kept elements are scaled:
//!
//! - [`direct_dropout`] is dropout as described in the original paper (Srivastava et al. 2014),
//!   not the inverted version. Kept elements are not scaled at training time, so the
//!   activations have to be scaled by `keep_prob` at test time.
//! - [`binomial_dropout`] scales the kept elements of every example by `1 / (1 - P)`, where `P`
//!   is the probability of keeping exactly as many neurons as were kept, under the binomial
//!   distribution `Binomial(num_neurons, keep_prob)`.
//!
//! In both variants, `noise_shape` has to be broadcastable to the shape of `x`, only
//! dimensions with `noise_shape[i] == shape(x)[i]` make independent decisions.
//! For example, if `shape(x) = [k, l, m, n]` and `noise_shape = [k, 1, 1, n]`, each batch
//! and channel component is kept independently and each row and column is kept or
//! dropped together.
use ndarray::*;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use special::Gamma;

use crate::errors::{ModelError, ModelResult};
use crate::ImagePrecision;

/// Counts the number of neurons in a single element of the layer.
/// Returns the number and the shape of a single element.
///
/// The layer is (batch size, height, width, depth) if it's convolutional,
/// (batch size, number of neurons) if it's fully connected.
pub fn num_neurons_and_shape(layer_shape: &[usize]) -> ModelResult<(usize, Vec<usize>)> {
    match layer_shape.len() {
        4 | 2 => {
            let shape = layer_shape[1..].to_vec();
            Ok((shape.iter().product(), shape))
        }
        n => Err(ModelError::InvalidShapeError(format!(
            "expected a convolutional (rank 4) or fully connected (rank 2) layer, got rank {}",
            n
        ))),
    }
}

/// Counts the number of active (> off_value) neurons of every element of the batch.
pub fn active_neurons<S, D>(layer: &ArrayBase<S, D>, off_value: ImagePrecision) -> ModelResult<Array1<usize>>
where
    S: Data<Elem = ImagePrecision>,
    D: Dimension,
{
    num_neurons_and_shape(layer.shape())?;
    Ok(layer
        .view()
        .into_dyn()
        .outer_iter()
        .map(|element| element.iter().filter(|&&v| v > off_value).count())
        .collect())
}

/// Probability of k successes in n trials with success probability p.
pub fn binomial_pmf(n: usize, p: f64, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    if p <= 0.0 {
        return if k == 0 { 1.0 } else { 0.0 };
    }
    if p >= 1.0 {
        return if k == n { 1.0 } else { 0.0 };
    }
    let (n, k) = (n as f64, k as f64);
    let ln_binomial_coefficient =
        (n + 1.0).ln_gamma().0 - (k + 1.0).ln_gamma().0 - (n - k + 1.0).ln_gamma().0;
    (ln_binomial_coefficient + k * p.ln() + (n - k) * (1.0 - p).ln()).exp()
}

fn check_keep_prob(keep_prob: f32) -> ModelResult<()> {
    // written this way to reject NaN as well
    if keep_prob > 0.0 && keep_prob <= 1.0 {
        Ok(())
    } else {
        Err(ModelError::KeepProbabilityError(keep_prob))
    }
}

/// Draws the keep (1) / drop (0) mask and broadcasts it to `dim`.
fn binary_mask<D: Dimension>(
    dim: &D,
    keep_prob: f32,
    noise_shape: Option<&[usize]>,
    seed: Option<u64>,
) -> ModelResult<Array<ImagePrecision, D>> {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let noise_shape = noise_shape.unwrap_or_else(|| dim.slice());

    // uniform [keep_prob, 1.0 + keep_prob), flooring gives
    // 0. if [keep_prob, 1.0) and 1. if [1.0, 1.0 + keep_prob)
    let random = ArrayD::random_using(IxDyn(noise_shape), Uniform::new(0.0f32, 1.0), &mut rng);
    let binary = random.mapv(|u| (keep_prob + u).floor());

    let broadcast = binary
        .broadcast(dim.clone())
        .ok_or_else(|| ModelError::NoiseShapeError {
            noise: noise_shape.to_vec(),
            input: dim.slice().to_vec(),
        })?;
    Ok(broadcast.to_owned())
}

/// Computes dropout, rescaling every element of the batch with the binomial probability
/// of its number of kept neurons.
///
/// With probability `keep_prob`, outputs the input element scaled up by
/// `1 / (1 - P(Binomial(num_neurons(x), keep_prob) = kept(x)))`, otherwise outputs `0`.
///
/// `x` has to be the output of a convolutional (batch, height, width, depth) or fully
/// connected (batch, neurons) layer. A `seed` makes the result deterministic.
///
/// Fails if `keep_prob` is not in (0, 1] or if `noise_shape` does not broadcast to `x`.
pub fn binomial_dropout<D: Dimension>(
    x: &Array<ImagePrecision, D>,
    keep_prob: f32,
    noise_shape: Option<&[usize]>,
    seed: Option<u64>,
) -> ModelResult<Array<ImagePrecision, D>> {
    check_keep_prob(keep_prob)?;
    let (num_neurons, _) = num_neurons_and_shape(x.shape())?;
    if keep_prob == 1.0 || num_neurons == 0 {
        return Ok(x.clone());
    }

    let binary_tensor = binary_mask(&x.raw_dim(), keep_prob, noise_shape, seed)?;
    let kept_on = active_neurons(&binary_tensor, 0.0)?;

    let mut ret = x * &binary_tensor;
    for (mut element, &kept) in ret
        .view_mut()
        .into_dyn()
        .outer_iter_mut()
        .zip(kept_on.iter())
    {
        let prob = binomial_pmf(num_neurons, keep_prob as f64, kept);
        let boost = (1.0 / (1.0 - prob)) as ImagePrecision;
        element.mapv_inplace(|v| v * boost);
    }
    Ok(ret)
}

/// Computes dropout as described in the original paper, not the inverted version:
/// with probability `keep_prob` outputs the input element, otherwise outputs `0`.
///
/// The kept activations are NOT scaled, so they have to be scaled by `keep_prob` at test
/// time. A `seed` makes the result deterministic.
///
/// Fails if `keep_prob` is not in (0, 1] or if `noise_shape` does not broadcast to `x`.
pub fn direct_dropout<D: Dimension>(
    x: &Array<ImagePrecision, D>,
    keep_prob: f32,
    noise_shape: Option<&[usize]>,
    seed: Option<u64>,
) -> ModelResult<Array<ImagePrecision, D>> {
    check_keep_prob(keep_prob)?;
    if keep_prob == 1.0 {
        return Ok(x.clone());
    }

    let binary_tensor = binary_mask(&x.raw_dim(), keep_prob, noise_shape, seed)?;
    Ok(x * &binary_tensor)
}
