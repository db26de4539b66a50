use ndarray::{Array4, Axis, Ix2, Ix4};

use super::{Layer, Mode, Tensor};
use crate::error::{Error, Result};

/// Averages each channel over its spatial extent:
/// `(batch, channels, height, width)` → `(batch, channels)`.
#[derive(Debug, Clone, Default)]
pub struct GlobalAvgPoolLayer {
    input_shape: Option<(usize, usize, usize, usize)>,
}

impl GlobalAvgPoolLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for GlobalAvgPoolLayer {
    fn forward(&mut self, input: &Tensor, _mode: Mode) -> Result<Tensor> {
        let x = input
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| {
                Error::shape_mismatch("GlobalAvgPoolLayer", "(batch, channels, height, width)", input.shape())
            })?;
        let dim = x.dim();
        let area = (dim.2 * dim.3).max(1) as f32;
        self.input_shape = Some(dim);
        let pooled = x.sum_axis(Axis(3)).sum_axis(Axis(2)) / area;
        Ok(pooled.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let dim = self.input_shape.ok_or(Error::MissingCache("GlobalAvgPoolLayer"))?;
        let grad = grad_output.view().into_dimensionality::<Ix2>()?;
        if grad.dim() != (dim.0, dim.1) {
            return Err(Error::shape_mismatch("GlobalAvgPoolLayer", (dim.0, dim.1), grad_output.shape()));
        }
        let area = (dim.2 * dim.3).max(1) as f32;
        let mut input_grad = Array4::<f32>::zeros(dim);
        for ((n, c), &g) in grad.indexed_iter() {
            input_grad
                .slice_mut(ndarray::s![n, c, .., ..])
                .fill(g / area);
        }
        Ok(input_grad.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_and_spread_gradient() {
        let input = Tensor::from_shape_vec(vec![1, 2, 2, 2], vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 8.0]).unwrap();
        let mut pool = GlobalAvgPoolLayer::new();
        let out = pool.forward(&input, Mode::Train).unwrap();
        assert_eq!(out.shape(), &[1, 2]);
        assert_eq!(out[[0, 0]], 2.5);
        assert_eq!(out[[0, 1]], 2.0);

        let grad = pool.backward(&Tensor::ones(vec![1, 2])).unwrap();
        assert!(grad.iter().all(|&g| (g - 0.25).abs() < 1e-7));
    }
}
