use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Layer, Mode, Tensor};
use crate::error::{Error, Result};

/// Inverted dropout: surviving activations are scaled by `1 / (1 - rate)`
/// during training, and the layer is the identity in eval mode.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    dropout_rate: f32,
    scale: f32,
    mask: Option<Tensor>,
    rng: StdRng,
}

impl DropoutLayer {
    pub fn new<R: Rng + ?Sized>(dropout_rate: f32, rng: &mut R) -> Self {
        assert!((0.0..1.0).contains(&dropout_rate), "Dropout rate must be between 0 and 1");

        DropoutLayer {
            dropout_rate,
            scale: 1.0 / (1.0 - dropout_rate), // Scale factor for training
            mask: None,
            rng: StdRng::seed_from_u64(rng.random()),
        }
    }

    pub fn rate(&self) -> f32 {
        self.dropout_rate
    }
}

impl Layer for DropoutLayer {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        if mode == Mode::Eval || self.dropout_rate == 0.0 {
            self.mask = None;
            return Ok(input.clone());
        }

        let rate = self.dropout_rate;
        let scale = self.scale;
        let rng = &mut self.rng;
        let mask = Tensor::from_shape_simple_fn(input.raw_dim(), || {
            if rng.random::<f32>() >= rate {
                scale
            } else {
                0.0
            }
        });

        let output = input * &mask;
        self.mask = Some(mask);
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        // During backprop, we multiply gradients by the same mask
        match &self.mask {
            Some(mask) if mask.shape() == grad_output.shape() => Ok(grad_output * mask),
            Some(mask) => Err(Error::shape_mismatch("DropoutLayer", mask.shape(), grad_output.shape())),
            None => Ok(grad_output.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dropout = DropoutLayer::new(0.5, &mut rng);
        let input = Tensor::ones(vec![4, 8]);
        assert_eq!(dropout.forward(&input, Mode::Eval).unwrap(), input);
    }

    #[test]
    fn test_training_mask_is_scaled_and_reused() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dropout = DropoutLayer::new(0.5, &mut rng);
        let input = Tensor::ones(vec![16, 16]);
        let out = dropout.forward(&input, Mode::Train).unwrap();
        assert!(out.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(out.iter().any(|&v| v == 0.0));

        let grad = dropout.backward(&Tensor::ones(vec![16, 16])).unwrap();
        assert_eq!(grad, out);
    }
}
