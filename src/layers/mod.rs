pub mod activation;
pub mod batch_norm;
pub mod conv2d;
pub mod dropout;
pub mod feed_forward;
pub mod gru;
pub mod pooling;
pub mod sequential;

use std::fmt::Debug;

use ndarray::ArrayD;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::Result;

/// Batch-major tensor: axis 0 is always the sample index.
pub type Tensor = ArrayD<f32>;

/// Whether a forward pass is part of training or of evaluation.
///
/// Dropout and batch normalisation behave differently in the two modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A trainable tensor and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: Tensor,
    pub grad: Tensor,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        let grad = Tensor::zeros(value.raw_dim());
        Parameter {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// He-normal initialisation: `N(0, 2 / fan_in)`.
pub(crate) fn he_normal<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Tensor {
    let std_dev = (2.0 / fan_in.max(1) as f32).sqrt();
    Tensor::from_shape_simple_fn(shape.to_vec(), || {
        let z: f32 = StandardNormal.sample(&mut *rng);
        z * std_dev
    })
}

pub trait Layer: Debug {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor>;

    /// Propagates `grad_output` back through the most recent forward pass,
    /// accumulating parameter gradients and returning the input gradient.
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }
}

pub use activation::ActivationLayer;
pub use batch_norm::BatchNormLayer;
pub use conv2d::Conv2DLayer;
pub use dropout::DropoutLayer;
pub use feed_forward::FeedForwardLayer;
pub use gru::GruLayer;
pub use pooling::GlobalAvgPoolLayer;
pub use sequential::Sequential;
