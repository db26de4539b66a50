use crate::error::{Error, Result};
use crate::layers::{Layer, Mode, Parameter, Tensor};
use ndarray::{Array1, Array3, Axis};

/// Per-channel batch normalisation over axis 1.
///
/// Accepts `(batch, features)` and `(batch, channels, height, width)` tensors.
/// Running statistics are updated in training mode only and used in eval mode.
#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    pub channels: usize,
    pub momentum: f32,
    pub epsilon: f32,
    gamma: Parameter,
    beta: Parameter,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    cache: Option<NormCache>,
}

#[derive(Debug, Clone)]
struct NormCache {
    shape: Vec<usize>,
    normalized: Array3<f32>,
    inv_std: Array1<f32>,
    mode: Mode,
}

impl BatchNormLayer {
    pub fn new(channels: usize) -> Self {
        BatchNormLayer {
            channels,
            momentum: 0.1,
            epsilon: 1e-5,
            gamma: Parameter::new("gamma", Tensor::ones(vec![channels])),
            beta: Parameter::new("beta", Tensor::zeros(vec![channels])),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            cache: None,
        }
    }

    pub fn running_mean(&self) -> &Array1<f32> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Array1<f32> {
        &self.running_var
    }

    fn as_3d(&self, input: &Tensor) -> Result<Array3<f32>> {
        let shape = input.shape();
        if shape.len() < 2 || shape[1] != self.channels {
            return Err(Error::shape_mismatch("BatchNormLayer", ("batch", self.channels, "..."), shape));
        }
        let spatial: usize = shape[2..].iter().product();
        Ok(input.to_shape((shape[0], self.channels, spatial))?.to_owned())
    }
}

impl Layer for BatchNormLayer {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let x = self.as_3d(input)?;
        let (batch, channels, spatial) = x.dim();
        let count = batch * spatial;

        let (mean, var) = match mode {
            Mode::Train => {
                if count < 2 {
                    return Err(Error::InsufficientData(
                        "batch normalisation needs more than one value per channel in training".into(),
                    ));
                }
                let mut mean = Array1::<f32>::zeros(channels);
                let mut var = Array1::<f32>::zeros(channels);
                for c in 0..channels {
                    let values = x.index_axis(Axis(1), c);
                    let m = values.sum() / count as f32;
                    let v = values.mapv(|v| (v - m).powi(2)).sum() / count as f32;
                    mean[c] = m;
                    var[c] = v;
                }
                let unbiased = count as f32 / (count - 1) as f32;
                self.running_mean = &self.running_mean * (1.0 - self.momentum) + &mean * self.momentum;
                self.running_var = &self.running_var * (1.0 - self.momentum) + &var * (self.momentum * unbiased);
                (mean, var)
            }
            Mode::Eval => (self.running_mean.clone(), self.running_var.clone()),
        };

        let inv_std = var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let mut normalized = x;
        let mut output = Array3::<f32>::zeros((batch, channels, spatial));
        for c in 0..channels {
            let gamma = self.gamma.value[[c]];
            let beta = self.beta.value[[c]];
            let mut xhat = normalized.index_axis_mut(Axis(1), c);
            xhat.mapv_inplace(|v| (v - mean[c]) * inv_std[c]);
            output
                .index_axis_mut(Axis(1), c)
                .assign(&xhat.mapv(|v| gamma * v + beta));
        }

        self.cache = Some(NormCache {
            shape: input.shape().to_vec(),
            normalized,
            inv_std,
            mode,
        });
        Ok(output.into_shape_with_order(input.raw_dim())?)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self.cache.as_ref().ok_or(Error::MissingCache("BatchNormLayer"))?;
        if grad_output.shape() != cache.shape.as_slice() {
            return Err(Error::shape_mismatch("BatchNormLayer", &cache.shape, grad_output.shape()));
        }
        let dy = self.as_3d(grad_output)?;
        let (batch, channels, spatial) = dy.dim();
        let count = (batch * spatial) as f32;

        let mut dx = Array3::<f32>::zeros((batch, channels, spatial));
        for c in 0..channels {
            let dy_c = dy.index_axis(Axis(1), c);
            let xhat_c = cache.normalized.index_axis(Axis(1), c);
            let gamma = self.gamma.value[[c]];

            let dbeta = dy_c.sum();
            let dgamma = (&dy_c * &xhat_c).sum();
            self.beta.grad[[c]] += dbeta;
            self.gamma.grad[[c]] += dgamma;

            let mut dx_c = dx.index_axis_mut(Axis(1), c);
            match cache.mode {
                Mode::Train => {
                    // dx = γ/σ · (dy − mean(dy) − x̂ · mean(dy · x̂))
                    let scale = gamma * cache.inv_std[c];
                    let mean_dy = dbeta / count;
                    let mean_dy_xhat = dgamma / count;
                    dx_c.assign(&(&dy_c - mean_dy - &xhat_c * mean_dy_xhat));
                    dx_c.mapv_inplace(|v| v * scale);
                }
                Mode::Eval => {
                    let scale = gamma * cache.inv_std[c];
                    dx_c.assign(&dy_c.mapv(|v| v * scale));
                }
            }
        }

        Ok(dx.into_shape_with_order(grad_output.raw_dim())?)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.gamma, &self.beta]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.gamma, &mut self.beta]
    }
}
