//! Functions to define the layers of a model.
//!
//! Every function creates its variables in the given [`ModelContext`] (in the current
//! scope, so wrap calls in [`ModelContext::scoped`] to get distinct layers), registers
//! its weight decay term in the losses collection and logs summaries of its weights
//! and outputs.
use ndarray::*;

use crate::activation_functions::Activation;
use crate::context::ModelContext;
use crate::convolutions::{ConvolutionLayer, Padding};
use crate::errors::ModelResult;
use crate::fully_connected::FeedforwardLayer;
use crate::initializers::Initializer;
use crate::summaries::Summary;
use crate::visualization::{grid_side, put_kernels_on_grid};
use crate::{ImagePrecision, WeightPrecision};

/// Returns a variable with the requested shape, initialized using the provided initializer
/// ([`Initializer::he`] is the usual choice for weights).
///
/// A histogram of the values is logged. Kernels of a first convolutional layer (4d shape
/// with 1, 3 or 4 input channels) are additionally logged as an image.
pub fn weight(
    ctx: &mut ModelContext,
    name: &str,
    shape: &[usize],
    initializer: &Initializer,
) -> ModelResult<ArrayD<WeightPrecision>> {
    let weights = ctx.get_variable(name, shape, initializer, true)?;
    let full_name = ctx.scoped_name(name);

    let first_layer = shape.len() == 4 && [1, 3, 4].contains(&shape[2]);
    if first_layer {
        let side = grid_side(shape[3]);
        let kernels = weights.view().into_dimensionality::<Ix4>()?;
        // the grid side doubles as padding between the kernels
        let grid = put_kernels_on_grid(&kernels.slice(s![.., .., .., 0..side * side]), side, side)?;
        ctx.log_summary(Summary::image(&full_name, grid));
    }

    ctx.log_summary(Summary::histogram(&full_name, &weights));
    Ok(weights)
}

/// Returns a bias variable initialized with the provided initializer.
/// Biases are usually initialized with `Initializer::Constant(0.0)`.
pub fn bias(
    ctx: &mut ModelContext,
    name: &str,
    shape: &[usize],
    initializer: &Initializer,
) -> ModelResult<ArrayD<WeightPrecision>> {
    weight(ctx, name, shape, initializer)
}

/// Half the squared L2 norm
pub fn l2_loss<S, D>(w: &ArrayBase<S, D>) -> f64
where
    S: Data<Elem = WeightPrecision>,
    D: Dimension,
{
    w.fold(0.0, |acc, &x| acc + (x as f64).powi(2)) / 2.0
}

/// Feature maps of the first image in the batch as grid. Every channel becomes
/// a single channel kernel of the grid.
fn feature_map_grid(maps: &Array4<ImagePrecision>, side: usize) -> ModelResult<Array4<u8>> {
    let first = maps.index_axis(Axis(0), 0).insert_axis(Axis(2));
    put_kernels_on_grid(&first.slice(s![.., .., .., 0..side * side]), side, side)
}

/// Defines a convolutional layer.
///
/// - input: images in (batch, height, width, channels) layout
/// - shape: weight shape (kernel height, kernel width, input channels, output channels)
/// - stride: equal stride along both axes
/// - activation: nonlinearity applied to the result
/// - wd: weight decay factor, `wd * l2_loss(W)` is added to the losses collection
///
/// The first image's feature maps before and after the activation are logged
/// side by side as an image summary.
pub fn conv_layer(
    ctx: &mut ModelContext,
    input: &Array4<ImagePrecision>,
    shape: [usize; 4],
    stride: usize,
    padding: Padding,
    activation: Activation,
    wd: f64,
) -> ModelResult<Array4<ImagePrecision>> {
    let w = weight(ctx, "W", &shape, &Initializer::he())?.into_dimensionality::<Ix4>()?;
    let b = bias(ctx, "b", &[shape[3]], &Initializer::Constant(0.0))?
        .into_dimensionality::<Ix1>()?;

    ctx.add_loss("weight_loss", l2_loss(&w) * wd);

    let result = ConvolutionLayer::new(w, Some(b), stride, padding)?.convolve(input)?;
    let out = activation.activate(&result);

    if result.len_of(Axis(0)) > 0 {
        let side = grid_side(shape[3]);
        let pre_activation = feature_map_grid(&result, side)?;
        let post_activation = feature_map_grid(&out, side)?;
        let both = concatenate(Axis(2), &[pre_activation.view(), post_activation.view()])?;
        let name = ctx.scoped_name("pre_post_activation");
        ctx.log_summary(Summary::image(&name, both));
    }

    Ok(out)
}

/// Defines a fully connected layer.
///
/// - input: (batch, input units)
/// - shape: weight shape (input units, output units)
/// - activation: nonlinearity applied to the result
/// - wd: weight decay factor
pub fn fc_layer(
    ctx: &mut ModelContext,
    input: &Array2<ImagePrecision>,
    shape: [usize; 2],
    activation: Activation,
    wd: f64,
) -> ModelResult<Array2<ImagePrecision>> {
    let w = weight(ctx, "W", &shape, &Initializer::he())?.into_dimensionality::<Ix2>()?;
    let b = bias(ctx, "b", &[shape[1]], &Initializer::Constant(0.0))?
        .into_dimensionality::<Ix1>()?;

    ctx.add_loss("weight_loss", l2_loss(&w) * wd);

    let result = FeedforwardLayer::new(w, b)?.forward_pass(input)?;
    Ok(activation.activate(&result))
}
