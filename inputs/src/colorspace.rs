//! Conversion between the RGB and YUV colorspaces, <https://en.wikipedia.org/wiki/YUV>.
//!
//! Both conversions are a per-pixel linear transformation plus a bias, which we compute
//! as convolution with a 1x1 kernel.
use ml::convolutions::{ConvolutionLayer, Padding};
use ndarray::*;

use crate::errors::{InputError, InputResult};

/// Rows are the input channels (r, g, b), columns the output channels (y, u, v).
const RGB2YUV_FILTER: [[f32; 3]; 3] = [
    [0.299, -0.169, 0.499],
    [0.587, -0.331, -0.418],
    [0.114, 0.499, -0.0813],
];
const RGB2YUV_BIAS: [f32; 3] = [0., 0.5, 0.5];

/// Rows are the input channels (y, u, v), columns the output channels (r, g, b).
/// Expects yuv values in [0, 255].
const YUV2RGB_FILTER: [[f32; 3]; 3] = [
    [1., 1., 1.],
    [0., -0.34413999, 1.77199996],
    [1.40199995, -0.71414, 0.],
];
const YUV2RGB_BIAS: [f32; 3] = [-179.45599365, 135.45983887, -226.81599426];

fn pixelwise_transform(
    image: &Array3<f32>,
    filter: &[[f32; 3]; 3],
    bias: &[f32; 3],
) -> InputResult<Array3<f32>> {
    if image.len_of(Axis(2)) != 3 {
        return Err(InputError::ChannelError(image.shape().to_vec()));
    }
    let kernel = Array::from_shape_vec(
        (1, 1, 3, 3),
        filter.iter().flat_map(|row| row.iter().cloned()).collect(),
    )?;
    let layer = ConvolutionLayer::new(kernel, Some(arr1(bias)), 1, Padding::Same)?;

    let batch = image.view().insert_axis(Axis(0)).to_owned();
    Ok(layer.convolve(&batch)?.index_axis_move(Axis(0), 0))
}

/// Converts an RGB image of shape (height, width, 3) with values in [0, 1] to YUV.
pub fn rgb2yuv(rgb: &Array3<f32>) -> InputResult<Array3<f32>> {
    pixelwise_transform(rgb, &RGB2YUV_FILTER, &RGB2YUV_BIAS)
}

/// Converts a YUV image of shape (height, width, 3), as returned by [`rgb2yuv`], to RGB.
/// The result is clipped to [0, 1].
pub fn yuv2rgb(yuv: &Array3<f32>) -> InputResult<Array3<f32>> {
    let scaled = yuv * 255.0;
    let rgb = pixelwise_transform(&scaled, &YUV2RGB_FILTER, &YUV2RGB_BIAS)?;
    Ok(rgb.mapv(|x| x.max(0.0).min(255.0) / 255.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() < tol, "{} != {}", a, b);
    }

    #[test]
    fn test_rgb2yuv_black_and_white() {
        let img = array![[[0., 0., 0.], [1., 1., 1.]]];
        let yuv = rgb2yuv(&img).unwrap();

        assert_eq!(yuv.dim(), (1, 2, 3));
        assert_close(yuv[[0, 0, 0]], 0.0, 1e-6);
        assert_close(yuv[[0, 0, 1]], 0.5, 1e-6);
        assert_close(yuv[[0, 0, 2]], 0.5, 1e-6);
        assert_close(yuv[[0, 1, 0]], 1.0, 1e-6);
        assert_close(yuv[[0, 1, 1]], 0.499, 1e-6);
        assert_close(yuv[[0, 1, 2]], 0.4997, 1e-6);
    }

    #[test]
    fn test_round_trip() {
        let steps = 11;
        let img = Array::from_shape_fn((steps, steps * steps, 3), |(i, j, c)| {
            let v = match c {
                0 => i,
                1 => j / steps,
                _ => j % steps,
            };
            v as f32 / (steps - 1) as f32
        });

        let reconstructed = yuv2rgb(&rgb2yuv(&img).unwrap()).unwrap();

        assert_eq!(reconstructed.dim(), img.dim());
        for (a, b) in reconstructed.iter().zip(img.iter()) {
            assert_close(*a, *b, 1e-2);
        }
    }

    #[test]
    fn test_yuv2rgb_clips() {
        let yuv = array![[[2., 0., 0.]]];
        let rgb = yuv2rgb(&yuv).unwrap();
        assert!(rgb.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }

    #[test]
    fn test_wrong_channels() {
        let img = Array3::<f32>::zeros((2, 2, 4));
        assert!(matches!(rgb2yuv(&img), Err(InputError::ChannelError(_))));
        assert!(yuv2rgb(&img).is_err());
    }
}
