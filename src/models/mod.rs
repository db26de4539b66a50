pub mod convnet;
pub mod perceptron;
pub mod recurrent;

use std::fmt::Debug;

use ndarray::{Array2, Ix2};

use crate::error::{Error, Result};
use crate::layers::{Mode, Parameter, Tensor};

pub use convnet::ConvNet;
pub use perceptron::Perceptron;
pub use recurrent::GruClassifier;

/// A trainable classifier: given a batch, produce one row of logits per sample.
pub trait Network: Debug {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Array2<f32>>;

    /// Back-propagates the gradient of the loss with respect to the logits of
    /// the most recent forward pass, accumulating into every parameter.
    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()>;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Parameters keyed by their index in [`Network::parameters`] and their
    /// layer-local name, so a perceptron yields `"0.weight"` and `"1.bias"`.
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.parameters()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("{}.{}", i, p.name), &p.value))
            .collect()
    }

    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }
}

pub(crate) fn into_logits(name: &'static str, output: Tensor) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();
    output
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::shape_mismatch(name, "(batch, outputs)", shape))
}
