use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

/// Enum representing different activation function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationType {
    Sigmoid,
    ReLU,
    /// ReLU clamped at 6, used by the MobileNetV2 blocks
    ReLU6,
    Tanh,
    Linear,
}

impl ActivationType {
    /// Applies the activation function to a given input
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => sigmoid(x),
            ActivationType::ReLU => x.max(0.0),
            ActivationType::ReLU6 => x.clamp(0.0, 6.0),
            ActivationType::Tanh => x.tanh(),
            ActivationType::Linear => x,
        }
    }

    /// Computes the derivative of the activation function with respect to its input
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            ActivationType::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationType::ReLU6 => {
                if x > 0.0 && x < 6.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationType::Tanh => 1.0 - x.tanh().powi(2),
            ActivationType::Linear => 1.0,
        }
    }

    pub fn forward(&self, preactivation: &ArrayD<f32>) -> ArrayD<f32> {
        preactivation.mapv(|x| self.apply(x))
    }

    /// Chains `grad_output` through the activation evaluated at `preactivation`.
    pub fn backward(&self, preactivation: &ArrayD<f32>, grad_output: &ArrayD<f32>) -> ArrayD<f32> {
        if *self == ActivationType::Linear {
            return grad_output.clone();
        }
        let mut grad = grad_output.clone();
        Zip::from(&mut grad)
            .and(preactivation)
            .for_each(|g, &x| *g *= self.derivative(x));
        grad
    }
}

/// Numerically stable logistic function.
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_activation_functions() {
        // Sigmoid tests
        assert!((ActivationType::Sigmoid.apply(0.0) - 0.5).abs() < f32::EPSILON);
        assert!(ActivationType::Sigmoid.apply(-100.0) >= 0.0);

        // ReLU tests
        assert_eq!(ActivationType::ReLU.apply(-1.0), 0.0);
        assert_eq!(ActivationType::ReLU.apply(2.0), 2.0);

        // ReLU6 tests
        assert_eq!(ActivationType::ReLU6.apply(7.5), 6.0);
        assert_eq!(ActivationType::ReLU6.apply(3.0), 3.0);

        // Tanh tests
        assert!((ActivationType::Tanh.apply(0.0)).abs() < f32::EPSILON);

        // Linear tests
        assert_eq!(ActivationType::Linear.apply(5.0), 5.0);
    }

    #[test]
    fn test_activation_derivatives() {
        assert!((ActivationType::Sigmoid.derivative(0.0) - 0.25).abs() < f32::EPSILON);

        assert_eq!(ActivationType::ReLU.derivative(-1.0), 0.0);
        assert_eq!(ActivationType::ReLU.derivative(2.0), 1.0);

        assert_eq!(ActivationType::ReLU6.derivative(6.5), 0.0);
        assert_eq!(ActivationType::ReLU6.derivative(0.5), 1.0);

        assert!((ActivationType::Tanh.derivative(0.0) - 1.0).abs() < f32::EPSILON);

        assert_eq!(ActivationType::Linear.derivative(5.0), 1.0);
    }

    #[test]
    fn test_backward_masks_gradient() {
        let pre = arr1(&[-1.0f32, 2.0, 7.0]).into_dyn();
        let grad = arr1(&[1.0f32, 1.0, 1.0]).into_dyn();
        let out = ActivationType::ReLU6.backward(&pre, &grad);
        assert_eq!(out.as_slice().unwrap(), &[0.0, 1.0, 0.0]);
    }
}
