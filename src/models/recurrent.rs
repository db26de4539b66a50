use ndarray::{s, Array2, Array3, Ix3};
use rand::Rng;

use super::{into_logits, Network};
use crate::activation::ActivationType;
use crate::error::{Error, Result};
use crate::layers::{DropoutLayer, FeedForwardLayer, GruLayer, Layer, Mode, Parameter, Tensor};

/// Stacked GRU over `(batch, time, features)` windows, classifying from the
/// hidden state of the last time step.
///
/// Dropout is applied between stacked GRU layers and to the final hidden
/// state before the output projection.
#[derive(Debug, Clone)]
pub struct GruClassifier {
    grus: Vec<GruLayer>,
    between: Vec<DropoutLayer>,
    dropout: DropoutLayer,
    head: FeedForwardLayer,
    sequence_shape: Option<(usize, usize, usize)>,
}

impl GruClassifier {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        outputs: usize,
        dropout: f32,
        rng: &mut R,
    ) -> Self {
        let num_layers = num_layers.max(1);
        let grus = (0..num_layers)
            .map(|i| GruLayer::new(if i == 0 { input_size } else { hidden_size }, hidden_size, rng))
            .collect();
        let between = (1..num_layers).map(|_| DropoutLayer::new(dropout, rng)).collect();

        GruClassifier {
            grus,
            between,
            dropout: DropoutLayer::new(dropout, rng),
            head: FeedForwardLayer::new(hidden_size, outputs, ActivationType::Linear, rng),
            sequence_shape: None,
        }
    }
}

impl Network for GruClassifier {
    fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Array2<f32>> {
        let mut sequence = self.grus[0].forward(input, mode)?;
        for (gru, dropout) in self.grus[1..].iter_mut().zip(self.between.iter_mut()) {
            sequence = dropout.forward(&sequence, mode)?;
            sequence = gru.forward(&sequence, mode)?;
        }

        let sequence = sequence.into_dimensionality::<Ix3>()?;
        let (batch, steps, hidden) = sequence.dim();
        if steps == 0 {
            return Err(Error::shape_mismatch("GruClassifier", ("batch", "time > 0", "features"), input.shape()));
        }
        self.sequence_shape = Some((batch, steps, hidden));

        let last = sequence.slice(s![.., steps - 1, ..]).to_owned().into_dyn();
        let last = self.dropout.forward(&last, mode)?;
        into_logits("GruClassifier", self.head.forward(&last, mode)?)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        let (batch, steps, hidden) = self.sequence_shape.ok_or(Error::MissingCache("GruClassifier"))?;

        let grad_last = self.head.backward(&grad_logits.clone().into_dyn())?;
        let grad_last = self.dropout.backward(&grad_last)?;

        // only the final step feeds the head
        let mut grad = Array3::<f32>::zeros((batch, steps, hidden));
        grad.slice_mut(s![.., steps - 1, ..])
            .assign(&grad_last.into_dimensionality::<ndarray::Ix2>()?);
        let mut grad = grad.into_dyn();

        for i in (1..self.grus.len()).rev() {
            grad = self.grus[i].backward(&grad)?;
            grad = self.between[i - 1].backward(&grad)?;
        }
        self.grus[0].backward(&grad)?;
        Ok(())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.grus
            .iter()
            .flat_map(|g| g.parameters())
            .chain(self.head.parameters())
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.grus
            .iter_mut()
            .flat_map(|g| g.parameters_mut())
            .chain(self.head.parameters_mut())
            .collect()
    }
}
