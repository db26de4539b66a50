use crate::error::{Error, Result};
use crate::layers::{he_normal, Layer, Mode, Parameter, Tensor};
use ndarray::{s, Array2, Array4, ArrayView3, ArrayViewMut3, Axis, Ix1, Ix4};
use rand::Rng;

/// 2-D convolution over `(batch, channels, height, width)` tensors.
///
/// `groups == in_channels == out_channels` gives a depthwise convolution.
#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    pub in_channels: usize,
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub stride: usize,
    pub padding: usize,
    pub groups: usize,
    weights: Parameter,
    bias: Option<Parameter>,
    input_cache: Option<Array4<f32>>,
}

impl Conv2DLayer {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        filters: usize,
        kernel_size: (usize, usize),
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Self {
        Self::grouped(in_channels, filters, kernel_size, stride, padding, 1, true, rng)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn grouped<R: Rng + ?Sized>(
        in_channels: usize,
        filters: usize,
        kernel_size: (usize, usize),
        stride: usize,
        padding: usize,
        groups: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        assert!(groups > 0 && in_channels % groups == 0 && filters % groups == 0,
            "channels must divide evenly into groups");
        assert!(stride > 0, "stride must be positive");

        let (kernel_h, kernel_w) = kernel_size;
        let fan_in = (in_channels / groups) * kernel_h * kernel_w;
        let weights = he_normal(&[filters, in_channels / groups, kernel_h, kernel_w], fan_in, rng);

        Conv2DLayer {
            in_channels,
            filters,
            kernel_size,
            stride,
            padding,
            groups,
            weights: Parameter::new("weight", weights),
            bias: bias.then(|| Parameter::new("bias", Tensor::zeros(vec![filters]))),
            input_cache: None,
        }
    }

    pub fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let (kh, kw) = self.kernel_size;
        let padded_h = height + 2 * self.padding;
        let padded_w = width + 2 * self.padding;
        if padded_h < kh || padded_w < kw {
            return None;
        }
        Some(((padded_h - kh) / self.stride + 1, (padded_w - kw) / self.stride + 1))
    }

    fn group_width(&self) -> usize {
        (self.in_channels / self.groups) * self.kernel_size.0 * self.kernel_size.1
    }

    /// Unrolls the receptive fields of one group into columns of shape
    /// `(channels_per_group · kh · kw, out_h · out_w)`.
    fn im2col(&self, input: ArrayView3<f32>, group: usize, out_h: usize, out_w: usize) -> Array2<f32> {
        let (_, height, width) = input.dim();
        let (kh, kw) = self.kernel_size;
        let per_group = self.in_channels / self.groups;
        let mut cols = Array2::zeros((self.group_width(), out_h * out_w));

        for c in 0..per_group {
            let channel = group * per_group + c;
            for ki in 0..kh {
                for kj in 0..kw {
                    let row = (c * kh + ki) * kw + kj;
                    for oy in 0..out_h {
                        let iy = (oy * self.stride + ki) as isize - self.padding as isize;
                        if iy < 0 || iy >= height as isize {
                            continue;
                        }
                        for ox in 0..out_w {
                            let ix = (ox * self.stride + kj) as isize - self.padding as isize;
                            if ix < 0 || ix >= width as isize {
                                continue;
                            }
                            cols[[row, oy * out_w + ox]] = input[[channel, iy as usize, ix as usize]];
                        }
                    }
                }
            }
        }
        cols
    }

    /// Scatters column gradients back onto the input positions they came from.
    fn col2im(&self, cols: &Array2<f32>, mut grad: ArrayViewMut3<f32>, group: usize, out_h: usize, out_w: usize) {
        let (_, height, width) = grad.dim();
        let (kh, kw) = self.kernel_size;
        let per_group = self.in_channels / self.groups;

        for c in 0..per_group {
            let channel = group * per_group + c;
            for ki in 0..kh {
                for kj in 0..kw {
                    let row = (c * kh + ki) * kw + kj;
                    for oy in 0..out_h {
                        let iy = (oy * self.stride + ki) as isize - self.padding as isize;
                        if iy < 0 || iy >= height as isize {
                            continue;
                        }
                        for ox in 0..out_w {
                            let ix = (ox * self.stride + kj) as isize - self.padding as isize;
                            if ix < 0 || ix >= width as isize {
                                continue;
                            }
                            grad[[channel, iy as usize, ix as usize]] += cols[[row, oy * out_w + ox]];
                        }
                    }
                }
            }
        }
    }
}

impl Layer for Conv2DLayer {
    fn forward(&mut self, input: &Tensor, _mode: Mode) -> Result<Tensor> {
        let expected = ("batch", self.in_channels, "height", "width");
        let x = input
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| Error::shape_mismatch("Conv2DLayer", expected, input.shape()))?;
        let (batch, channels, height, width) = x.dim();
        if channels != self.in_channels {
            return Err(Error::shape_mismatch("Conv2DLayer", expected, input.shape()));
        }
        let (out_h, out_w) = self
            .output_size(height, width)
            .ok_or_else(|| Error::shape_mismatch("Conv2DLayer", self.kernel_size, (height, width)))?;

        let per_group_filters = self.filters / self.groups;
        let kernels = self.weights.value.to_shape((self.filters, self.group_width()))?;
        let mut output = Array4::<f32>::zeros((batch, self.filters, out_h, out_w));

        for n in 0..batch {
            let sample = x.index_axis(Axis(0), n);
            for g in 0..self.groups {
                let filters = g * per_group_filters..(g + 1) * per_group_filters;
                let cols = self.im2col(sample, g, out_h, out_w);
                let result = kernels.slice(s![filters.clone(), ..]).dot(&cols);
                let result = result.to_shape((per_group_filters, out_h, out_w))?;
                output.slice_mut(s![n, filters, .., ..]).assign(&result);
            }
        }

        if let Some(bias) = &self.bias {
            let b = bias.value.view().into_dimensionality::<Ix1>()?;
            for (f, mut feature_map) in output.axis_iter_mut(Axis(1)).enumerate() {
                feature_map.map_inplace(|v| *v += b[f]);
            }
        }

        self.input_cache = Some(x.to_owned());
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self
            .input_cache
            .as_ref()
            .ok_or(Error::MissingCache("Conv2DLayer"))?;
        let (batch, _, height, width) = input.dim();
        let dout = grad_output
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| Error::shape_mismatch("Conv2DLayer", "4-D gradient", grad_output.shape()))?;
        let (_, _, out_h, out_w) = dout.dim();

        let per_group_filters = self.filters / self.groups;
        let kernels = self.weights.value.to_shape((self.filters, self.group_width()))?.to_owned();
        let mut weight_grads = Array2::<f32>::zeros((self.filters, self.group_width()));
        let mut input_grad = Array4::<f32>::zeros((batch, self.in_channels, height, width));

        for n in 0..batch {
            let sample = input.index_axis(Axis(0), n);
            for g in 0..self.groups {
                let filters = g * per_group_filters..(g + 1) * per_group_filters;
                let cols = self.im2col(sample, g, out_h, out_w);
                let dout_g = dout.slice(s![n, filters.clone(), .., ..]);
                let dout_g = dout_g.to_shape((per_group_filters, out_h * out_w))?;

                let mut wg = weight_grads.slice_mut(s![filters.clone(), ..]);
                wg += &dout_g.dot(&cols.t());

                let dcols = kernels.slice(s![filters, ..]).t().dot(&dout_g);
                self.col2im(&dcols, input_grad.index_axis_mut(Axis(0), n), g, out_h, out_w);
            }
        }

        let weight_grads = weight_grads.into_shape_with_order(self.weights.value.raw_dim())?;
        self.weights.grad += &weight_grads;

        if let Some(bias) = &mut self.bias {
            let db = dout.sum_axis(Axis(0)).sum_axis(Axis(1)).sum_axis(Axis(1));
            bias.grad += &db.into_dyn();
        }

        Ok(input_grad.into_dyn())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = vec![&self.weights];
        params.extend(self.bias.as_ref());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = vec![&mut self.weights];
        params.extend(self.bias.as_mut());
        params
    }
}
