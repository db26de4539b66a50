use std::fmt;

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{into_logits, Network};
use crate::activation::ActivationType;
use crate::error::{Error, Result};
use crate::layers::{
    ActivationLayer, BatchNormLayer, Conv2DLayer, DropoutLayer, FeedForwardLayer, GlobalAvgPoolLayer, Layer, Mode,
    Parameter, Sequential, Tensor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "resnet18")]
    ResNet18,
    #[serde(rename = "mobilenet_v2")]
    MobileNetV2,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::ResNet18 => write!(f, "resnet18"),
            Architecture::MobileNetV2 => write!(f, "mobilenet_v2"),
        }
    }
}

/// Convolutional image classifier over `(batch, 3, height, width)` images.
#[derive(Debug)]
pub struct ConvNet {
    pub architecture: Architecture,
    body: Sequential,
}

impl ConvNet {
    /// ResNet-18 with a 3×3 stride-1 stem for 32×32 inputs.
    ///
    /// `base_width` is the channel count of the first stage (64 in the
    /// reference network); the later stages double it.
    pub fn resnet18<R: Rng + ?Sized>(num_classes: usize, base_width: usize, rng: &mut R) -> Self {
        let base_width = base_width.max(1);
        let mut body = Sequential::new()
            .with(conv_bn(3, base_width, 3, 1, 1, 1, rng))
            .with(ActivationLayer::relu());

        let mut channels = base_width;
        for (stage, stride) in [1usize, 2, 2, 2].into_iter().enumerate() {
            let width = base_width << stage;
            body.push(BasicBlock::new(channels, width, stride, rng));
            body.push(BasicBlock::new(width, width, 1, rng));
            channels = width;
        }

        body.push(GlobalAvgPoolLayer::new());
        body.push(FeedForwardLayer::new(channels, num_classes, ActivationType::Linear, rng));
        ConvNet {
            architecture: Architecture::ResNet18,
            body,
        }
    }

    /// MobileNetV2 with the stride of the stem and of the second stage
    /// reduced to 1 for 32×32 inputs.
    pub fn mobilenet_v2<R: Rng + ?Sized>(num_classes: usize, width_mult: f32, rng: &mut R) -> Self {
        // (expansion, channels, repeats, stride)
        const SETTINGS: [(usize, usize, usize, usize); 7] = [
            (1, 16, 1, 1),
            (6, 24, 2, 1),
            (6, 32, 3, 2),
            (6, 64, 4, 2),
            (6, 96, 3, 1),
            (6, 160, 3, 2),
            (6, 320, 1, 1),
        ];

        let mut channels = make_divisible(32.0 * width_mult);
        let last_channels = make_divisible(1280.0 * width_mult);
        let mut body = Sequential::new()
            .with(conv_bn(3, channels, 3, 1, 1, 1, rng))
            .with(ActivationLayer::relu6());

        for (expansion, c, repeats, stride) in SETTINGS {
            let out = make_divisible(c as f32 * width_mult);
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                body.push(InvertedResidual::new(channels, out, stride, expansion, rng));
                channels = out;
            }
        }

        body.push(conv_bn(channels, last_channels, 1, 1, 0, 1, rng));
        body.push(ActivationLayer::relu6());
        body.push(GlobalAvgPoolLayer::new());
        body.push(DropoutLayer::new(0.2, rng));
        body.push(FeedForwardLayer::new(last_channels, num_classes, ActivationType::Linear, rng));
        ConvNet {
            architecture: Architecture::MobileNetV2,
            body,
        }
    }

    pub fn build<R: Rng + ?Sized>(architecture: Architecture, num_classes: usize, width: f32, rng: &mut R) -> Self {
        match architecture {
            Architecture::ResNet18 => Self::resnet18(num_classes, (64.0 * width).round() as usize, rng),
            Architecture::MobileNetV2 => Self::mobilenet_v2(num_classes, width, rng),
        }
    }
}

impl Network for ConvNet {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Array2<f32>> {
        if input.ndim() != 4 || input.shape()[1] != 3 {
            return Err(Error::shape_mismatch("ConvNet", ("batch", 3, "height", "width"), input.shape()));
        }
        into_logits("ConvNet", self.body.forward(input, mode)?)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        self.body.backward(&grad_logits.clone().into_dyn())?;
        Ok(())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.body.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.body.parameters_mut()
    }
}

/// Convolution without bias followed by batch normalisation.
fn conv_bn<R: Rng + ?Sized>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    groups: usize,
    rng: &mut R,
) -> Sequential {
    Sequential::new()
        .with(Conv2DLayer::grouped(
            in_channels,
            out_channels,
            (kernel, kernel),
            stride,
            padding,
            groups,
            false,
            rng,
        ))
        .with(BatchNormLayer::new(out_channels))
}

/// Rounds a channel count to the nearest multiple of 8, never dropping more
/// than 10% below the requested value.
fn make_divisible(value: f32) -> usize {
    const DIVISOR: usize = 8;
    let rounded = ((value + DIVISOR as f32 / 2.0) as usize / DIVISOR * DIVISOR).max(DIVISOR);
    if (rounded as f32) < 0.9 * value {
        rounded + DIVISOR
    } else {
        rounded
    }
}

/// Two 3×3 convolutions with an identity (or projected) shortcut.
#[derive(Debug)]
struct BasicBlock {
    main: Sequential,
    shortcut: Option<Sequential>,
    relu: ActivationLayer,
}

impl BasicBlock {
    fn new<R: Rng + ?Sized>(in_channels: usize, out_channels: usize, stride: usize, rng: &mut R) -> Self {
        let main = Sequential::new()
            .with(conv_bn(in_channels, out_channels, 3, stride, 1, 1, rng))
            .with(ActivationLayer::relu())
            .with(conv_bn(out_channels, out_channels, 3, 1, 1, 1, rng));
        let shortcut = (stride != 1 || in_channels != out_channels)
            .then(|| conv_bn(in_channels, out_channels, 1, stride, 0, 1, rng));
        BasicBlock {
            main,
            shortcut,
            relu: ActivationLayer::relu(),
        }
    }
}

impl Layer for BasicBlock {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let residual = self.main.forward(input, mode)?;
        let identity = match &mut self.shortcut {
            Some(projection) => projection.forward(input, mode)?,
            None => input.clone(),
        };
        self.relu.forward(&(residual + identity), mode)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let grad = self.relu.backward(grad_output)?;
        let grad_main = self.main.backward(&grad)?;
        let grad_skip = match &mut self.shortcut {
            Some(projection) => projection.backward(&grad)?,
            None => grad,
        };
        Ok(grad_main + grad_skip)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.main.parameters();
        if let Some(projection) = &self.shortcut {
            params.extend(projection.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.main.parameters_mut();
        if let Some(projection) = &mut self.shortcut {
            params.extend(projection.parameters_mut());
        }
        params
    }
}

/// Expand (1×1), depthwise 3×3, linear project (1×1); residual when the
/// block keeps both resolution and width.
#[derive(Debug)]
struct InvertedResidual {
    block: Sequential,
    residual: bool,
}

impl InvertedResidual {
    fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        rng: &mut R,
    ) -> Self {
        let hidden = in_channels * expansion;
        let mut block = Sequential::new();
        if expansion != 1 {
            block.push(conv_bn(in_channels, hidden, 1, 1, 0, 1, rng));
            block.push(ActivationLayer::relu6());
        }
        block.push(conv_bn(hidden, hidden, 3, stride, 1, hidden, rng));
        block.push(ActivationLayer::relu6());
        block.push(conv_bn(hidden, out_channels, 1, 1, 0, 1, rng));

        InvertedResidual {
            block,
            residual: stride == 1 && in_channels == out_channels,
        }
    }
}

impl Layer for InvertedResidual {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let output = self.block.forward(input, mode)?;
        Ok(if self.residual { output + input } else { output })
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let grad = self.block.backward(grad_output)?;
        Ok(if self.residual { grad + grad_output } else { grad })
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.block.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.block.parameters_mut()
    }
}
