use crate::errors::{ModelError, ModelResult};
use crate::{ImagePrecision, WeightPrecision};
use ndarray::*;

/// Rust implementation of a feed forward layer.
/// The weight matrix shall have dimension (in that order)
/// input units x output units, inputs are batches (batch size x input units).
pub struct FeedforwardLayer {
    weights: Array2<WeightPrecision>,
    bias: Array1<WeightPrecision>,
}

impl FeedforwardLayer {
    pub fn new(
        weights: Array2<WeightPrecision>,
        bias: Array1<WeightPrecision>,
    ) -> ModelResult<FeedforwardLayer> {
        if weights.len_of(Axis(1)) != bias.len() {
            return Err(ModelError::InvalidShapeError(format!(
                "bias of length {} for {} output units",
                bias.len(),
                weights.len_of(Axis(1))
            )));
        }
        Ok(FeedforwardLayer { weights, bias })
    }

    pub fn input_dimension(&self) -> usize {
        self.weights.len_of(Axis(0))
    }

    pub fn output_dimension(&self) -> usize {
        self.weights.len_of(Axis(1))
    }

    pub fn forward_pass<'a, V>(&self, data: V) -> ModelResult<Array2<ImagePrecision>>
    where
        V: AsArray<'a, ImagePrecision, Ix2>,
    {
        let data_arr: ArrayView2<ImagePrecision> = data.into();
        if data_arr.len_of(Axis(1)) != self.input_dimension() {
            return Err(ModelError::InvalidShapeError(format!(
                "input has {} units, layer expects {}",
                data_arr.len_of(Axis(1)),
                self.input_dimension()
            )));
        }
        Ok(data_arr.dot(&self.weights) + &self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_pass() {
        let layer = FeedforwardLayer::new(array![[1., 0.], [0., 1.], [1., 1.]], array![0., 1.])
            .unwrap();
        let out = layer.forward_pass(&array![[1., 2., 3.], [0., 0., 0.]]).unwrap();
        assert_eq!(out, array![[4., 6.], [0., 1.]]);
    }

    #[test]
    fn test_wrong_input_size() {
        let layer = FeedforwardLayer::new(Array2::zeros((3, 2)), Array1::zeros(2)).unwrap();
        assert!(layer.forward_pass(&Array2::zeros((1, 4))).is_err());
        assert!(FeedforwardLayer::new(Array2::zeros((3, 2)), Array1::zeros(3)).is_err());
    }
}
