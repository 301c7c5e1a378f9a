//! Batch normalization as described in Ioffe, Szegedy 2015, <https://arxiv.org/abs/1502.03167>.
use ndarray::*;

use crate::context::ModelContext;
use crate::errors::{ModelError, ModelResult};
use crate::initializers::Initializer;
use crate::ImagePrecision;

/// Decay of the moving averages of mean and variance.
pub const DECAY: f32 = 0.999;
/// Added to the variance to avoid dividing by zero.
pub const EPSILON: f32 = 1e-3;

/// Applies batch normalization to the layer output.
///
/// Statistics are computed per channel (last axis) over every other axis, so this works
/// for (batch, height, width, channels) as well as (batch, units) outputs.
/// The layer is centered (beta) and scaled (gamma).
///
/// When `is_training` is set, the batch statistics are used and the moving averages are
/// updated in place. Otherwise the moving averages are used. The moving averages are
/// added to the required non trainables, as they have to be saved along with the model.
///
/// Variables are created in the scope "BatchNorm" below the current scope, so every call
/// has to happen in its own scope.
pub fn batch_norm<D: Dimension>(
    ctx: &mut ModelContext,
    layer_output: &Array<ImagePrecision, D>,
    is_training: bool,
) -> ModelResult<Array<ImagePrecision, D>> {
    if layer_output.ndim() == 0 {
        return Err(ModelError::InvalidShapeError(
            "batch normalization needs at least one axis".to_string(),
        ));
    }
    let channels = layer_output.shape()[layer_output.ndim() - 1];
    let rows = if channels == 0 {
        0
    } else {
        layer_output.len() / channels
    };
    let flat = Array::from_shape_vec((rows, channels), layer_output.iter().cloned().collect())?;

    ctx.scoped("BatchNorm", |ctx| -> ModelResult<Array<ImagePrecision, D>> {
        let beta = ctx
            .get_variable("beta", &[channels], &Initializer::Zeros, true)?
            .into_dimensionality::<Ix1>()?;
        let gamma = ctx
            .get_variable("gamma", &[channels], &Initializer::Ones, true)?
            .into_dimensionality::<Ix1>()?;
        let moving_mean = ctx
            .get_variable("moving_mean", &[channels], &Initializer::Zeros, false)?
            .into_dimensionality::<Ix1>()?;
        let moving_variance = ctx
            .get_variable("moving_variance", &[channels], &Initializer::Ones, false)?
            .into_dimensionality::<Ix1>()?;

        let moving_mean_name = ctx.scoped_name("moving_mean");
        let moving_variance_name = ctx.scoped_name("moving_variance");
        ctx.add_required_non_trainable(&moving_mean_name)?;
        ctx.add_required_non_trainable(&moving_variance_name)?;

        let (mean, variance) = if is_training {
            let mean = flat.mean_axis(Axis(0)).ok_or_else(|| {
                ModelError::InvalidShapeError("cannot normalize an empty batch".to_string())
            })?;
            let variance = flat.var_axis(Axis(0), 0.0);

            let new_mean = &moving_mean * DECAY + &mean * (1.0 - DECAY);
            let new_variance = &moving_variance * DECAY + &variance * (1.0 - DECAY);
            ctx.assign(&moving_mean_name, new_mean.into_dyn())?;
            ctx.assign(&moving_variance_name, new_variance.into_dyn())?;
            (mean, variance)
        } else {
            (moving_mean, moving_variance)
        };

        let inv_std = variance.mapv(|v| 1.0 / (v + EPSILON).sqrt());
        let normalized = (&flat - &mean) * &(inv_std * &gamma) + &beta;
        Ok(normalized.into_shape(layer_output.raw_dim())?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::REQUIRED_NON_TRAINABLES;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    #[test]
    fn test_training_normalizes() {
        let mut ctx = ModelContext::new(Some(0));
        let x = array![[1., 10.], [3., 20.], [5., 30.]];

        let y = ctx
            .scoped("fc1", |ctx| batch_norm(ctx, &x, true))
            .unwrap();

        assert_eq!(y.dim(), (3, 2));
        for col in y.axis_iter(Axis(1)) {
            assert_close(col.sum(), 0.0);
        }
        // mean 3, variance 8/3
        assert_close(y[[0, 0]], -2.0 / (8.0f32 / 3.0 + EPSILON).sqrt());

        let moving_mean = &ctx.variable("fc1/BatchNorm/moving_mean").unwrap().value;
        assert_close(moving_mean[[0]], 3.0 * (1.0 - DECAY));
        assert_close(moving_mean[[1]], 20.0 * (1.0 - DECAY));
        let moving_variance = &ctx.variable("fc1/BatchNorm/moving_variance").unwrap().value;
        assert_close(moving_variance[[0]], DECAY + 8.0 / 3.0 * (1.0 - DECAY));
    }

    #[test]
    fn test_inference_uses_moving_averages() {
        let mut ctx = ModelContext::new(Some(0));
        let x = Array::from_elem((2, 2, 2, 3), 2.0);

        let y = ctx
            .scoped("conv1", |ctx| batch_norm(ctx, &x, false))
            .unwrap();

        // moving mean 0 and variance 1 initially
        assert_eq!(y.dim(), (2, 2, 2, 3));
        for v in y.iter() {
            assert_close(*v, 2.0 / (1.0 + EPSILON).sqrt());
        }
        let mean = &ctx.variable("conv1/BatchNorm/moving_mean").unwrap().value;
        assert!(mean.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_moving_averages_are_required() {
        let mut ctx = ModelContext::new(Some(0));
        let x = Array2::ones((4, 3));
        ctx.scoped("bn", |ctx| batch_norm(ctx, &x, true)).unwrap();
        ctx.reuse_scoped("bn", |ctx| batch_norm(ctx, &x, true))
            .unwrap();

        let names: Vec<_> = ctx
            .required_non_trainables()
            .iter()
            .map(|v| v.name.clone())
            .collect();
        assert_eq!(
            names,
            vec!["bn/BatchNorm/moving_mean", "bn/BatchNorm/moving_variance"]
        );
        assert_eq!(ctx.trainable_variables().len(), 2);
        assert_eq!(REQUIRED_NON_TRAINABLES, "required_vars_collection");
    }
}
