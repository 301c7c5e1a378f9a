//! This module provides the activation functions that can be passed to the layers.
//!
//! All activation functions are exposed as a variant of [`Activation`] as well as a free function.
use ndarray::*;

use crate::ImagePrecision;

/// Nonlinearity applied to the output of a layer. Layers default to the identity (linear).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    Relu,
    /// Leaky relu with the given slope for negative inputs
    LeakyRelu(ImagePrecision),
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Identity
    }
}

impl Activation {
    pub fn activate<D: Dimension>(&self, x: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
        match *self {
            Activation::Identity => x.clone(),
            Activation::Relu => relu(x),
            Activation::LeakyRelu(alpha) => leaky_relu(x, alpha),
        }
    }
}

/// Leaky relu implementation
pub fn leaky_relu<D: Dimension>(
    data: &Array<ImagePrecision, D>,
    alpha: ImagePrecision,
) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { alpha * x })
}

/// Relu implementation
pub fn relu<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { 0. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu() {
        let x = Array::from_shape_vec((1, 2, 2), vec![1., -2., 3., -4.]).unwrap();
        let out = Array::from_shape_vec((1, 2, 2), vec![1., 0., 3., 0.]).unwrap();
        assert_eq!(Activation::Relu.activate(&x), out);
    }

    #[test]
    fn test_leaky_relu() {
        let x = array![[1., -2.], [3., -4.]];
        assert_eq!(
            Activation::LeakyRelu(0.5).activate(&x),
            array![[1., -1.], [3., -2.]]
        );
    }

    #[test]
    fn test_identity() {
        let x = array![-1., 0., 1.];
        assert_eq!(Activation::default().activate(&x), x);
    }
}
