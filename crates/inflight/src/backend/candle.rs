use super::{Backend, TensorReadError};
use candle_core::{DType, Tensor};

impl Backend for Tensor {
    fn shape(&self) -> Vec<usize> {
        self.dims().to_vec()
    }

    fn to_f32_vec(&self) -> Result<Vec<f32>, TensorReadError> {
        self.flatten_all()
            .and_then(|flat| flat.to_dtype(DType::F32))
            .and_then(|flat| flat.to_vec1::<f32>())
            .map_err(|e| TensorReadError { message: e.to_string() })
    }
}
