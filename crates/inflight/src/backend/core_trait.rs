use std::fmt::Debug;
use thiserror::Error;

/// Raised when a backend cannot expose its values as `f32`.
#[derive(Error, Debug)]
#[error("failed to read tensor values: {message}")]
pub struct TensorReadError {
    /// Backend supplied description.
    pub message: String,
}

/// The backend trait that must be fulfilled by any raw engine output that is
/// fed to a post-processor
pub trait Backend: Debug + Clone + Send + Sync + 'static {
    /// Return the shape of this tensor
    fn shape(&self) -> Vec<usize>;

    /// Copy the tensor out as a row-major `f32` buffer
    fn to_f32_vec(&self) -> Result<Vec<f32>, TensorReadError>;
}

impl Backend for Vec<f32> {
    fn shape(&self) -> Vec<usize> {
        vec![self.len()]
    }

    fn to_f32_vec(&self) -> Result<Vec<f32>, TensorReadError> {
        Ok(self.clone())
    }
}
