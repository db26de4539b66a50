use crate::activation::ActivationType;
use crate::error::{Error, Result};
use crate::layers::{he_normal, Layer, Mode, Parameter, Tensor};
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::Rng;

/// Fully connected layer: `activation(x · Wᵀ + b)`.
#[derive(Debug, Clone)]
pub struct FeedForwardLayer {
    pub inputs: usize,
    pub neurons: usize,
    pub activation: ActivationType,
    weights: Parameter,
    bias: Parameter,
    input_cache: Option<Array2<f32>>,
    preactivation_cache: Option<Tensor>,
}

impl FeedForwardLayer {
    pub fn new<R: Rng + ?Sized>(
        inputs: usize,
        neurons: usize,
        activation: ActivationType,
        rng: &mut R,
    ) -> Self {
        // Weights are (neurons × inputs) so that a batch multiplies as x · Wᵀ
        let weights = he_normal(&[neurons, inputs], inputs, rng);

        FeedForwardLayer {
            inputs,
            neurons,
            activation,
            weights: Parameter::new("weight", weights),
            bias: Parameter::new("bias", Tensor::zeros(vec![neurons])),
            input_cache: None,
            preactivation_cache: None,
        }
    }

    /// Builds a layer from explicit weights `(neurons × inputs)` and bias.
    pub fn from_weights(weights: Array2<f32>, bias: Vec<f32>, activation: ActivationType) -> Self {
        let (neurons, inputs) = weights.dim();
        FeedForwardLayer {
            inputs,
            neurons,
            activation,
            weights: Parameter::new("weight", weights.into_dyn()),
            bias: Parameter::new("bias", Array1::from(bias).into_dyn()),
            input_cache: None,
            preactivation_cache: None,
        }
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights.value
    }
}

impl Layer for FeedForwardLayer {
    fn forward(&mut self, input: &Tensor, _mode: Mode) -> Result<Tensor> {
        let x = input
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| Error::shape_mismatch("FeedForwardLayer", ("batch", self.inputs), input.shape()))?;
        if x.ncols() != self.inputs {
            return Err(Error::shape_mismatch("FeedForwardLayer", ("batch", self.inputs), input.shape()));
        }

        let w = self.weights.value.view().into_dimensionality::<Ix2>()?;
        let b = self.bias.value.view().into_dimensionality::<Ix1>()?;

        // x is (batch × inputs), result is (batch × neurons)
        let output = (x.dot(&w.t()) + &b).into_dyn();
        let activated = self.activation.forward(&output);

        self.input_cache = Some(x.to_owned());
        self.preactivation_cache = Some(output);
        Ok(activated)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let (input, preactivation) = match (&self.input_cache, &self.preactivation_cache) {
            (Some(i), Some(p)) => (i, p),
            _ => return Err(Error::MissingCache("FeedForwardLayer")),
        };
        if grad_output.shape() != preactivation.shape() {
            return Err(Error::shape_mismatch("FeedForwardLayer", preactivation.shape(), grad_output.shape()));
        }

        // Gradient with respect to preactivation
        let dlayer = self.activation.backward(preactivation, grad_output).into_dimensionality::<Ix2>()?;

        let weight_grads = dlayer.t().dot(input);
        self.weights.grad += &weight_grads.into_dyn();
        self.bias.grad += &dlayer.sum_axis(Axis(0)).into_dyn();

        // weights is (neurons × inputs), dlayer is (batch × neurons), result is (batch × inputs)
        let w = self.weights.value.view().into_dimensionality::<Ix2>()?;
        Ok(dlayer.dot(&w).into_dyn())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weights, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weights, &mut self.bias]
    }
}
