use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use inputs::errors::{InputError, InputResult};
use ndarray::{Array3, ArrayView2};
use nshare::ToNdarray3;

/// Returns the image as array of shape (height, width, 3) with values in [0, 1].
pub fn image_to_array(img: &DynamicImage) -> Array3<f32> {
    // nshare gives us (C, H, W)
    img.to_rgb8()
        .into_ndarray3()
        .permuted_axes([1, 2, 0])
        .mapv(|x| x as f32 / 255.0)
}

/// Turns a value in [0, 1] into a pixel value, values outside of the range saturate.
pub fn to_pixel(x: f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Turns an array of shape (height, width, 3) with values in [0, 1] into an rgb image.
pub fn array_to_image(arr: &Array3<f32>) -> InputResult<RgbImage> {
    let (height, width, channels) = arr.dim();
    if channels != 3 {
        return Err(InputError::ChannelError(arr.shape().to_vec()));
    }
    Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (row, col) = (y as usize, x as usize);
        Rgb([
            to_pixel(arr[[row, col, 0]]),
            to_pixel(arr[[row, col, 1]]),
            to_pixel(arr[[row, col, 2]]),
        ])
    }))
}

/// Turns a single channel of shape (height, width) into a grayscale image.
pub fn channel_to_image(arr: ArrayView2<f32>) -> GrayImage {
    let (height, width) = arr.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([to_pixel(arr[[y as usize, x as usize]])])
    })
}
