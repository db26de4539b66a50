use ndarray::Array2;
use rand::Rng;

use super::{into_logits, Network};
use crate::activation::ActivationType;
use crate::error::Result;
use crate::layers::{FeedForwardLayer, Layer, Mode, Parameter, Tensor};

/// Single linear unit producing one logit per sample.
#[derive(Debug, Clone)]
pub struct Perceptron {
    linear: FeedForwardLayer,
}

impl Perceptron {
    pub fn new<R: Rng + ?Sized>(inputs: usize, rng: &mut R) -> Self {
        Perceptron {
            linear: FeedForwardLayer::new(inputs, 1, ActivationType::Linear, rng),
        }
    }
}

impl Network for Perceptron {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Array2<f32>> {
        into_logits("Perceptron", self.linear.forward(input, mode)?)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        self.linear.backward(&grad_logits.clone().into_dyn())?;
        Ok(())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.linear.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.linear.parameters_mut()
    }
}
