use super::{Layer, Mode, Tensor};
use crate::activation::ActivationType;
use crate::error::{Error, Result};

/// Element-wise nonlinearity as a standalone layer.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    pub activation: ActivationType,
    input_cache: Option<Tensor>,
}

impl ActivationLayer {
    pub fn new(activation: ActivationType) -> Self {
        ActivationLayer {
            activation,
            input_cache: None,
        }
    }

    pub fn relu() -> Self {
        Self::new(ActivationType::ReLU)
    }

    pub fn relu6() -> Self {
        Self::new(ActivationType::ReLU6)
    }
}

impl Layer for ActivationLayer {
    fn forward(&mut self, input: &Tensor, _mode: Mode) -> Result<Tensor> {
        let output = self.activation.forward(input);
        self.input_cache = Some(input.clone());
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input_cache.as_ref().ok_or(Error::MissingCache("ActivationLayer"))?;
        if input.shape() != grad_output.shape() {
            return Err(Error::shape_mismatch("ActivationLayer", input.shape(), grad_output.shape()));
        }
        Ok(self.activation.backward(input, grad_output))
    }
}
