use crate::backend::{Backend, TensorReadError};

// A simple mock tensor implementation for testing
#[derive(Clone, Debug)]
pub struct MockTensor {
    pub(crate) shape: Vec<usize>,
    pub(crate) values: Vec<f32>,
    pub(crate) unreadable: bool,
}

impl MockTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values, unreadable: false }
    }

    pub fn unreadable(shape: Vec<usize>) -> Self {
        Self { shape, values: vec![], unreadable: true }
    }
}

impl Backend for MockTensor {
    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn to_f32_vec(&self) -> Result<Vec<f32>, TensorReadError> {
        if self.unreadable {
            return Err(TensorReadError { message: "mock tensor refused read".into() });
        }
        Ok(self.values.clone())
    }
}
