//! Visualization of convolution kernels and feature maps.
use ndarray::*;
use num::integer::Roots;

use crate::errors::{ModelError, ModelResult};
use crate::WeightPrecision;

/// Side of the biggest square grid that fits `num_kernels` kernels.
pub fn grid_side(num_kernels: usize) -> usize {
    num_kernels.sqrt()
}

/// Converts a value in [0, 1] to a pixel, values outside of the range saturate.
fn to_pixel(x: WeightPrecision) -> u8 {
    // truncation after scaling with 255.5 rounds to the nearest pixel value
    (x * 255.5).max(0.0).min(255.0) as u8
}

/// Places the kernels into a grid, with `pad` black pixels around each of them.
/// Intended to visualize convolution filters (mostly of the first layer) and feature maps.
///
/// The kernel has shape (Y, X, channels, number of kernels) and has to contain exactly
/// `grid_side`² kernels. Values are normalized to [0, 1] with the minimum and maximum of
/// the whole kernel; a constant kernel is mapped to 0.
///
/// Kernel `k` is put in column `k / grid_side` and row `k % grid_side` of the grid, so the
/// grid is filled top to bottom, column after column.
///
/// Returns an image batch of size one: (1, (Y + 2 * pad) * grid_side, (X + 2 * pad) * grid_side, channels).
pub fn put_kernels_on_grid<S>(
    kernel: &ArrayBase<S, Ix4>,
    grid_side: usize,
    pad: usize,
) -> ModelResult<Array4<u8>>
where
    S: Data<Elem = WeightPrecision>,
{
    let (y, x, channels, num_kernels) = kernel.dim();
    if grid_side == 0 || num_kernels != grid_side * grid_side {
        return Err(ModelError::InvalidShapeError(format!(
            "{} kernels can't be placed on a grid of side {}",
            num_kernels, grid_side
        )));
    }

    let x_min = kernel.fold(WeightPrecision::INFINITY, |m, &v| m.min(v));
    let x_max = kernel.fold(WeightPrecision::NEG_INFINITY, |m, &v| m.max(v));
    let range = x_max - x_min;

    let cell_height = y + 2 * pad;
    let cell_width = x + 2 * pad;
    let mut grid = Array4::zeros((1, cell_height * grid_side, cell_width * grid_side, channels));

    for k in 0..num_kernels {
        let top = (k % grid_side) * cell_height + pad;
        let left = (k / grid_side) * cell_width + pad;
        let normalized = kernel.index_axis(Axis(3), k).mapv(|v| {
            if range > 0.0 {
                to_pixel((v - x_min) / range)
            } else {
                0
            }
        });
        grid.slice_mut(s![0, top..top + y, left..left + x, ..])
            .assign(&normalized);
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_side() {
        assert_eq!(grid_side(32), 5);
        assert_eq!(grid_side(64), 8);
        assert_eq!(grid_side(1), 1);
    }

    #[test]
    fn test_grid_layout() {
        // four 1x1 single channel kernels with values 0, 1, 2, 3
        let kernel = Array::from_shape_vec((1, 1, 1, 4), vec![0., 1., 2., 3.]).unwrap();
        let grid = put_kernels_on_grid(&kernel, 2, 1).unwrap();

        assert_eq!(grid.dim(), (1, 6, 6, 1));
        // padding stays black
        assert_eq!(grid[[0, 0, 0, 0]], 0);
        assert_eq!(grid[[0, 2, 2, 0]], 0);
        // kernels are placed column by column
        assert_eq!(grid[[0, 1, 1, 0]], 0);
        assert_eq!(grid[[0, 4, 1, 0]], 85);
        assert_eq!(grid[[0, 1, 4, 0]], 170);
        assert_eq!(grid[[0, 4, 4, 0]], 255);
    }

    #[test]
    fn test_grid_without_padding() {
        let kernel = Array::from_shape_fn((2, 3, 3, 9), |(i, _, _, k)| (k * 2 + i) as f32);
        let grid = put_kernels_on_grid(&kernel, 3, 0).unwrap();
        assert_eq!(grid.dim(), (1, 6, 9, 3));
        assert_eq!(grid[[0, 0, 0, 0]], 0);
        assert_eq!(grid[[0, 5, 8, 2]], 255);
    }

    #[test]
    fn test_constant_kernel() {
        let kernel = Array::from_elem((2, 2, 1, 1), 0.3);
        let grid = put_kernels_on_grid(&kernel, 1, 0).unwrap();
        assert!(grid.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_wrong_grid_side() {
        let kernel = Array4::<f32>::zeros((3, 3, 1, 5));
        assert!(put_kernels_on_grid(&kernel, 2, 1).is_err());
        assert!(put_kernels_on_grid(&kernel, 0, 1).is_err());
    }
}
