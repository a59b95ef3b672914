//! The burn implementation for backend provision.
//! Burn tensors carry their rank as a const generic, so the impl is generic
//! over it rather than macro-expanded per rank.
use super::{Backend, TensorReadError};
use burn::prelude::{Backend as BurnBackend, Tensor};

impl<B, const D: usize> Backend for Tensor<B, D>
where
    B: BurnBackend,
{
    fn shape(&self) -> Vec<usize> {
        self.shape().dims.to_vec()
    }

    fn to_f32_vec(&self) -> Result<Vec<f32>, TensorReadError> {
        self.clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| TensorReadError { message: format!("{e:?}") })
    }
}
