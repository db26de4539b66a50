use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::layers::{Parameter, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Stochastic gradient descent with optional heavy-ball momentum.
    Sgd { momentum: f32 },
    Adam { beta1: f32, beta2: f32, epsilon: f32 },
}

impl OptimizerKind {
    pub fn adam() -> Self {
        OptimizerKind::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Applies gradient updates to a network's parameters.
///
/// Per-parameter state (momentum buffers, Adam moments) is created on the
/// first step and matched to parameters by position, so the same optimizer
/// must always be stepped with the same network.
#[derive(Debug, Clone)]
pub struct Optimizer {
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub kind: OptimizerKind,
    step_count: u32,
    first_moments: Vec<Tensor>,
    second_moments: Vec<Tensor>,
}

impl Optimizer {
    pub fn new(learning_rate: f32) -> Self {
        Self::sgd(learning_rate, 0.0)
    }

    pub fn sgd(learning_rate: f32, momentum: f32) -> Self {
        Self::with_kind(learning_rate, OptimizerKind::Sgd { momentum })
    }

    pub fn adam(learning_rate: f32) -> Self {
        Self::with_kind(learning_rate, OptimizerKind::adam())
    }

    pub fn with_kind(learning_rate: f32, kind: OptimizerKind) -> Self {
        Optimizer {
            learning_rate,
            weight_decay: 0.0,
            kind,
            step_count: 0,
            first_moments: Vec::new(),
            second_moments: Vec::new(),
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn steps_taken(&self) -> u32 {
        self.step_count
    }

    pub fn step(&mut self, parameters: &mut [&mut Parameter]) {
        if self.first_moments.len() != parameters.len() {
            self.first_moments = parameters.iter().map(|p| Tensor::zeros(p.value.raw_dim())).collect();
            self.second_moments = parameters.iter().map(|p| Tensor::zeros(p.value.raw_dim())).collect();
        }
        self.step_count += 1;

        let lr = self.learning_rate;
        let decay = self.weight_decay;
        for (i, param) in parameters.iter_mut().enumerate() {
            let Parameter { value, grad, .. } = &mut **param;
            if decay != 0.0 {
                grad.scaled_add(decay, &*value);
            }

            match self.kind {
                OptimizerKind::Sgd { momentum } => {
                    if momentum != 0.0 {
                        let buffer = &mut self.first_moments[i];
                        if self.step_count == 1 {
                            buffer.assign(&*grad);
                        } else {
                            *buffer *= momentum;
                            *buffer += &*grad;
                        }
                        value.scaled_add(-lr, &*buffer);
                    } else {
                        value.scaled_add(-lr, &*grad);
                    }
                }
                OptimizerKind::Adam { beta1, beta2, epsilon } => {
                    let t = self.step_count as i32;
                    let bias1 = 1.0 - beta1.powi(t);
                    let bias2 = 1.0 - beta2.powi(t);
                    let m = &mut self.first_moments[i];
                    let v = &mut self.second_moments[i];
                    Zip::from(value)
                        .and(&*grad)
                        .and(m)
                        .and(v)
                        .for_each(|w, &g, m, v| {
                            *m = beta1 * *m + (1.0 - beta1) * g;
                            *v = beta2 * *v + (1.0 - beta2) * g * g;
                            let m_hat = *m / bias1;
                            let v_hat = *v / bias2;
                            *w -= lr * m_hat / (v_hat.sqrt() + epsilon);
                        });
                }
            }
        }
    }
}

/// Scales all gradients so that their global L2 norm does not exceed `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(parameters: &mut [&mut Parameter], max_norm: f32) -> f32 {
    let total_norm = parameters
        .iter()
        .map(|p| p.grad.iter().map(|g| g * g).sum::<f32>())
        .sum::<f32>()
        .sqrt();
    if total_norm > max_norm {
        let scale = max_norm / (total_norm + 1e-6);
        for p in parameters.iter_mut() {
            p.grad *= scale;
        }
    }
    total_norm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(values: &[f32], grads: &[f32]) -> Parameter {
        let mut p = Parameter::new("p", Tensor::from_shape_vec(vec![values.len()], values.to_vec()).unwrap());
        p.grad = Tensor::from_shape_vec(vec![grads.len()], grads.to_vec()).unwrap();
        p
    }

    #[test]
    fn test_plain_sgd_step() {
        let mut p = param(&[1.0, -2.0], &[0.5, -1.0]);
        let mut optimizer = Optimizer::new(0.1);
        optimizer.step(&mut [&mut p]);
        assert!((p.value[[0]] - 0.95).abs() < 1e-6);
        assert!((p.value[[1]] + 1.9).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut p = param(&[0.0], &[1.0]);
        let mut optimizer = Optimizer::sgd(1.0, 0.9);
        optimizer.step(&mut [&mut p]);
        assert!((p.value[[0]] + 1.0).abs() < 1e-6);
        optimizer.step(&mut [&mut p]);
        // buffer = 0.9 · 1 + 1
        assert!((p.value[[0]] + 2.9).abs() < 1e-6);
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut p = param(&[1.0, 1.0], &[0.3, -7.0]);
        let mut optimizer = Optimizer::adam(0.01);
        optimizer.step(&mut [&mut p]);
        assert!((p.value[[0]] - 0.99).abs() < 1e-5);
        assert!((p.value[[1]] - 1.01).abs() < 1e-5);
        assert_eq!(optimizer.steps_taken(), 1);
    }

    #[test]
    fn test_clip_grad_norm() {
        let mut a = param(&[0.0, 0.0], &[3.0, 0.0]);
        let mut b = param(&[0.0], &[4.0]);
        let norm = clip_grad_norm(&mut [&mut a, &mut b], 1.0);
        assert!((norm - 5.0).abs() < 1e-6);
        assert!((a.grad[[0]] - 0.6).abs() < 1e-4);
        assert!((b.grad[[0]] - 0.8).abs() < 1e-4);

        let norm = clip_grad_norm(&mut [&mut a, &mut b], 10.0);
        assert!(norm < 1.0 + 1e-4);
        assert!((b.grad[[0]] - 0.8).abs() < 1e-4);
    }
}
