use ndarray::{Array1, Array2, Axis};

use crate::error::{Error, Result};

/// Per-column standardisation to zero mean and unit (population) variance.
///
/// Constant columns get a scale of 1 so they map to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::InsufficientData("cannot fit a scaler on zero rows".into()))?;
        let scale = data.std_axis(Axis(0), 0.0).mapv(|s| if s == 0.0 { 1.0 } else { s });
        Ok(StandardScaler { mean, scale })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        check_width("StandardScaler", self.mean.len(), data)?;
        Ok((data - &self.mean) / &self.scale)
    }

    pub fn fit_transform(data: &Array2<f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaler, scaled))
    }
}

/// Per-column rescaling to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    pub min: Array1<f64>,
    pub range: Array1<f64>,
}

impl MinMaxScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(Error::InsufficientData("cannot fit a scaler on zero rows".into()));
        }
        let min = data.fold_axis(Axis(0), f64::INFINITY, |a, &b| a.min(b));
        let max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |a, &b| a.max(b));
        let range = (&max - &min).mapv(|r| if r == 0.0 { 1.0 } else { r });
        Ok(MinMaxScaler { min, range })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        check_width("MinMaxScaler", self.min.len(), data)?;
        Ok((data - &self.min) / &self.range)
    }

    pub fn fit_transform(data: &Array2<f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaler, scaled))
    }
}

fn check_width(name: &'static str, expected: usize, data: &Array2<f64>) -> Result<()> {
    if data.ncols() != expected {
        return Err(Error::shape_mismatch(name, ("rows", expected), data.dim()));
    }
    Ok(())
}
