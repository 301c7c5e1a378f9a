use crate::errors::{ModelError, ModelResult};
use crate::{ImagePrecision, WeightPrecision};
use convolutions_rs::convolutions::ConvolutionLayer as ChwConvolution;
use ndarray::*;

/// Same padding pads the input so that the output has size ceil(input / stride),
/// valid padding only computes positions where the kernel fully fits the input.
pub use convolutions_rs::Padding;

/// Rust implementation of a convolutional layer.
/// Images are expected in (batch, height, width, channels) layout,
/// the weight matrix shall have dimension (in that order)
/// kernel height x kernel width x input channels x output channels.
pub struct ConvolutionLayer {
    /// Weight matrix of the kernel
    kernel: Array4<WeightPrecision>,
    bias: Option<Array1<WeightPrecision>>,
    stride: usize,
    padding: Padding,
}

impl ConvolutionLayer {
    pub fn new(
        kernel: Array4<WeightPrecision>,
        bias: Option<Array1<WeightPrecision>>,
        stride: usize,
        padding: Padding,
    ) -> ModelResult<ConvolutionLayer> {
        if stride == 0 {
            return Err(ModelError::InvalidShapeError(
                "stride of 0 passed".to_string(),
            ));
        }
        if let Some(b) = &bias {
            if b.len() != kernel.len_of(Axis(3)) {
                return Err(ModelError::InvalidShapeError(format!(
                    "bias of length {} for {} output channels",
                    b.len(),
                    kernel.len_of(Axis(3))
                )));
            }
        }
        Ok(ConvolutionLayer {
            kernel,
            bias,
            stride,
            padding,
        })
    }

    /// Performs a convolution on the given image batch using this layers parameters.
    pub fn convolve(&self, images: &Array4<ImagePrecision>) -> ModelResult<Array4<ImagePrecision>> {
        let mut out = conv2d(images, &self.kernel, self.stride, self.padding)?;
        if let Some(b) = &self.bias {
            out += b;
        }
        Ok(out)
    }
}

/// 2d convolution of a batch of images in (batch, height, width, channels) layout
/// with a kernel of shape (kernel height, kernel width, input channels, output channels).
///
/// The convolution itself is done image by image by convolutions-rs, which works on
/// (channels, height, width) images and (output channels, input channels, height, width)
/// kernels.
pub fn conv2d(
    images: &Array4<ImagePrecision>,
    kernel: &Array4<WeightPrecision>,
    stride: usize,
    padding: Padding,
) -> ModelResult<Array4<ImagePrecision>> {
    let (batch, im_height, im_width, im_channels) = images.dim();
    let (ker_height, ker_width, ker_channels, out_channels) = kernel.dim();

    if im_channels != ker_channels {
        return Err(ModelError::InvalidShapeError(format!(
            "input has {} channels, kernel expects {}",
            im_channels, ker_channels
        )));
    }
    if stride == 0 {
        return Err(ModelError::InvalidShapeError(
            "stride of 0 passed".to_string(),
        ));
    }
    if padding == Padding::Valid && (im_height < ker_height || im_width < ker_width) {
        return Err(ModelError::InvalidShapeError(format!(
            "kernel of {}x{} does not fit an image of {}x{} without padding",
            ker_height, ker_width, im_height, im_width
        )));
    }

    let chw_kernel = kernel.view().permuted_axes([3, 2, 0, 1]).as_standard_layout().to_owned();
    let layer = ChwConvolution::new(chw_kernel, None, stride, padding);

    let mut convolved = Vec::with_capacity(batch);
    for image in images.outer_iter() {
        let chw_image = image.permuted_axes([2, 0, 1]).as_standard_layout().to_owned();
        convolved.push(layer.convolve(&chw_image));
    }
    let views: Vec<ArrayView3<ImagePrecision>> = convolved
        .iter()
        .map(|c| c.view().permuted_axes([1, 2, 0]))
        .collect();
    if views.is_empty() {
        return Ok(Array4::zeros((0, 0, 0, out_channels)));
    }
    Ok(stack(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// (1, h, w, 1) image from a 2d array
    fn single(img: Array2<f32>) -> Array4<f32> {
        let (h, w) = img.dim();
        img.into_shape((1, h, w, 1)).unwrap()
    }

    #[test]
    fn test_valid_conv() {
        let test_img = single(array![[0., 1., 0.], [0., 0., 0.], [-1., 0., 0.]]);
        let kernel = Array::from_shape_vec((2, 2, 1, 1), vec![0., 1., -1., 0.]).unwrap();

        let convolved = conv2d(&test_img, &kernel, 1, Padding::Valid).unwrap();

        assert_eq!(
            convolved.index_axis(Axis(3), 0).index_axis(Axis(0), 0),
            array![[1., 0.], [1., 0.]]
        );
    }

    #[test]
    fn test_valid_conv_with_stride() {
        let test_img = single(array![[0., 1., 0.], [0., 0., 0.], [-1., 0., 0.]]);
        let kernel = Array::from_shape_vec((1, 1, 1, 1), vec![1.]).unwrap();

        let convolved = conv2d(&test_img, &kernel, 2, Padding::Valid).unwrap();

        assert_eq!(
            convolved.index_axis(Axis(3), 0).index_axis(Axis(0), 0),
            array![[0., 0.], [-1., 0.]]
        );
    }

    #[test]
    fn test_same_conv() {
        let test_img = single(array![[1., 2., 3.], [4., 5., 6.], [7., 8., 9.]]);
        let kernel = Array::from_elem((3, 3, 1, 1), 1.);

        let convolved = conv2d(&test_img, &kernel, 1, Padding::Same).unwrap();

        assert_eq!(convolved.dim(), (1, 3, 3, 1));
        assert_eq!(
            convolved.index_axis(Axis(3), 0).index_axis(Axis(0), 0),
            array![[12., 21., 16.], [27., 45., 33.], [24., 39., 28.]]
        );
    }

    #[test]
    fn test_same_conv_with_stride() {
        let test_img = Array::from_elem((1, 5, 5, 1), 1.);
        let kernel = Array::from_elem((3, 3, 1, 1), 1.);

        let convolved = conv2d(&test_img, &kernel, 2, Padding::Same).unwrap();

        assert_eq!(convolved.dim(), (1, 3, 3, 1));
        assert_eq!(convolved[[0, 0, 0, 0]], 4.);
        assert_eq!(convolved[[0, 1, 1, 0]], 9.);
    }

    #[test]
    fn test_multi_channel_conv() {
        // 2 input channels, 2 output channels: first sums the channels, second takes the difference
        let test_img = Array::from_shape_vec((1, 1, 2, 2), vec![1., 2., 3., 4.]).unwrap();
        let kernel = Array::from_shape_vec((1, 1, 2, 2), vec![1., 1., 1., -1.]).unwrap();
        let layer = ConvolutionLayer::new(kernel, Some(array![0.5, 0.0]), 1, Padding::Valid).unwrap();

        let out = layer.convolve(&test_img).unwrap();

        assert_eq!(out, Array::from_shape_vec((1, 1, 2, 2), vec![3.5, -1., 7.5, -1.]).unwrap());
    }

    #[test]
    fn test_kernel_bigger_than_image() {
        let test_img = Array4::zeros((1, 2, 2, 1));
        let kernel = Array4::zeros((3, 3, 1, 1));
        assert!(conv2d(&test_img, &kernel, 1, Padding::Valid).is_err());
    }

    #[test]
    fn test_channel_mismatch() {
        let test_img = Array4::zeros((1, 3, 3, 3));
        let kernel = Array4::zeros((2, 2, 1, 4));
        assert!(conv2d(&test_img, &kernel, 1, Padding::Valid).is_err());
    }
}
