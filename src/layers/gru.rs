use ndarray::{concatenate, s, Array2, Array3, ArrayView2, Axis, Ix1, Ix2, Ix3};
use rand::Rng;

use super::{Layer, Mode, Parameter, Tensor};
use crate::activation::sigmoid;
use crate::error::{Error, Result};

/// Gated recurrent unit over `(batch, time, features)` sequences.
///
/// Gate rows are laid out as `[reset | update | new]`:
///
/// ```text
/// r  = σ(W_ir x + b_ir + W_hr h + b_hr)
/// z  = σ(W_iz x + b_iz + W_hz h + b_hz)
/// n  = tanh(W_in x + b_in + r ⊙ (W_hn h + b_hn))
/// h' = (1 − z) ⊙ n + z ⊙ h
/// ```
///
/// The output is the hidden state at every step, `(batch, time, hidden)`.
#[derive(Debug, Clone)]
pub struct GruLayer {
    pub input_size: usize,
    pub hidden_size: usize,
    w_ih: Parameter,
    w_hh: Parameter,
    b_ih: Parameter,
    b_hh: Parameter,
    cache: Option<SequenceCache>,
}

#[derive(Debug, Clone)]
struct StepCache {
    h_prev: Array2<f32>,
    reset: Array2<f32>,
    update: Array2<f32>,
    candidate: Array2<f32>,
    hidden_new: Array2<f32>,
}

#[derive(Debug, Clone)]
struct SequenceCache {
    input: Array3<f32>,
    steps: Vec<StepCache>,
}

impl GruLayer {
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let limit = 1.0 / (hidden_size.max(1) as f32).sqrt();
        let mut uniform = |shape: Vec<usize>| Tensor::from_shape_simple_fn(shape, || rng.random_range(-limit..limit));

        GruLayer {
            input_size,
            hidden_size,
            w_ih: Parameter::new("weight_ih", uniform(vec![3 * hidden_size, input_size])),
            w_hh: Parameter::new("weight_hh", uniform(vec![3 * hidden_size, hidden_size])),
            b_ih: Parameter::new("bias_ih", uniform(vec![3 * hidden_size])),
            b_hh: Parameter::new("bias_hh", uniform(vec![3 * hidden_size])),
            cache: None,
        }
    }

    fn weights(&self) -> Result<(ArrayView2<f32>, ArrayView2<f32>)> {
        Ok((
            self.w_ih.value.view().into_dimensionality::<Ix2>()?,
            self.w_hh.value.view().into_dimensionality::<Ix2>()?,
        ))
    }
}

impl Layer for GruLayer {
    fn forward(&mut self, input: &Tensor, _mode: Mode) -> Result<Tensor> {
        let expected = ("batch", "time", self.input_size);
        let x = input
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| Error::shape_mismatch("GruLayer", expected, input.shape()))?;
        let (batch, steps, features) = x.dim();
        if features != self.input_size {
            return Err(Error::shape_mismatch("GruLayer", expected, input.shape()));
        }

        let hs = self.hidden_size;
        let (w_ih, w_hh) = self.weights()?;
        let b_ih = self.b_ih.value.view().into_dimensionality::<Ix1>()?;
        let b_hh = self.b_hh.value.view().into_dimensionality::<Ix1>()?;

        let mut output = Array3::<f32>::zeros((batch, steps, hs));
        let mut cache = Vec::with_capacity(steps);
        let mut h = Array2::<f32>::zeros((batch, hs));

        for t in 0..steps {
            let x_t = x.slice(s![.., t, ..]);
            let gi = x_t.dot(&w_ih.t()) + &b_ih;
            let gh = h.dot(&w_hh.t()) + &b_hh;

            let reset = (&gi.slice(s![.., 0..hs]) + &gh.slice(s![.., 0..hs])).mapv(sigmoid);
            let update = (&gi.slice(s![.., hs..2 * hs]) + &gh.slice(s![.., hs..2 * hs])).mapv(sigmoid);
            let hidden_new = gh.slice(s![.., 2 * hs..]).to_owned();
            let candidate = (&gi.slice(s![.., 2 * hs..]) + &(&reset * &hidden_new)).mapv(f32::tanh);

            let h_next = &candidate * &update.mapv(|z| 1.0 - z) + &update * &h;
            output.slice_mut(s![.., t, ..]).assign(&h_next);

            cache.push(StepCache {
                h_prev: std::mem::replace(&mut h, h_next),
                reset,
                update,
                candidate,
                hidden_new,
            });
        }

        self.cache = Some(SequenceCache {
            input: x.to_owned(),
            steps: cache,
        });
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self.cache.take().ok_or(Error::MissingCache("GruLayer"))?;
        let (batch, steps, features) = cache.input.dim();
        let hs = self.hidden_size;
        let dout = grad_output.view().into_dimensionality::<Ix3>()?;
        if dout.dim() != (batch, steps, hs) {
            return Err(Error::shape_mismatch("GruLayer", (batch, steps, hs), grad_output.shape()));
        }

        let (w_ih, w_hh) = {
            let (a, b) = self.weights()?;
            (a.to_owned(), b.to_owned())
        };
        let mut dw_ih = Array2::<f32>::zeros((3 * hs, features));
        let mut dw_hh = Array2::<f32>::zeros((3 * hs, hs));
        let mut db_ih = ndarray::Array1::<f32>::zeros(3 * hs);
        let mut db_hh = ndarray::Array1::<f32>::zeros(3 * hs);
        let mut dx = Array3::<f32>::zeros((batch, steps, features));
        let mut dh_next = Array2::<f32>::zeros((batch, hs));

        for t in (0..steps).rev() {
            let step = &cache.steps[t];
            let dh = &dout.slice(s![.., t, ..]) + &dh_next;

            let dcandidate = &dh * &step.update.mapv(|z| 1.0 - z);
            let dupdate = &dh * &(&step.h_prev - &step.candidate);
            let mut dh_prev = &dh * &step.update;

            let dcandidate_pre = &dcandidate * &step.candidate.mapv(|n| 1.0 - n * n);
            let dreset = &dcandidate_pre * &step.hidden_new;
            let dhidden_new = &dcandidate_pre * &step.reset;
            let dreset_pre = &dreset * &step.reset.mapv(|r| r * (1.0 - r));
            let dupdate_pre = &dupdate * &step.update.mapv(|z| z * (1.0 - z));

            let dgi = concatenate(Axis(1), &[dreset_pre.view(), dupdate_pre.view(), dcandidate_pre.view()])?;
            let dgh = concatenate(Axis(1), &[dreset_pre.view(), dupdate_pre.view(), dhidden_new.view()])?;

            let x_t = cache.input.slice(s![.., t, ..]);
            dw_ih += &dgi.t().dot(&x_t);
            db_ih += &dgi.sum_axis(Axis(0));
            dw_hh += &dgh.t().dot(&step.h_prev);
            db_hh += &dgh.sum_axis(Axis(0));

            dx.slice_mut(s![.., t, ..]).assign(&dgi.dot(&w_ih));
            dh_prev += &dgh.dot(&w_hh);
            dh_next = dh_prev;
        }

        self.w_ih.grad += &dw_ih.into_dyn();
        self.w_hh.grad += &dw_hh.into_dyn();
        self.b_ih.grad += &db_ih.into_dyn();
        self.b_hh.grad += &db_hh.into_dyn();
        self.cache = Some(cache);

        Ok(dx.into_dyn())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.w_ih, &self.w_hh, &self.b_ih, &self.b_hh]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.w_ih, &mut self.w_hh, &mut self.b_ih, &mut self.b_hh]
    }
}
