//! Reader for the CIFAR-10 binary distribution (`data_batch_*.bin`,
//! `test_batch.bin`).

use std::path::Path;

use ndarray::{Array1, Array4};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Dataset;
use crate::error::{Error, Result};

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
const PIXELS: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_LEN: usize = 1 + PIXELS;

pub const CLASS_NAMES: [&str; 10] = [
    "airplane", "automobile", "bird", "cat", "deer", "dog", "frog", "horse", "ship", "truck",
];

/// Per-channel normalisation applied after scaling pixels to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Normalization {
    pub mean: [f32; CHANNELS],
    pub std: [f32; CHANNELS],
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization {
            mean: [0.5; CHANNELS],
            std: [0.5; CHANNELS],
        }
    }
}

/// Decodes whole records from `bytes`, stopping after `limit` images.
pub fn parse_records(bytes: &[u8], norm: &Normalization, limit: Option<usize>) -> Result<Dataset> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(Error::InsufficientData(format!(
            "CIFAR batch of {} bytes is not a whole number of {}-byte records",
            bytes.len(),
            RECORD_LEN
        )));
    }
    let available = bytes.len() / RECORD_LEN;
    let count = limit.map_or(available, |l| l.min(available));

    let mut images = Array4::<f32>::zeros((count, CHANNELS, IMAGE_SIZE, IMAGE_SIZE));
    let mut labels = Array1::<usize>::zeros(count);
    for (i, record) in bytes.chunks_exact(RECORD_LEN).take(count).enumerate() {
        let label = record[0] as usize;
        if label >= CLASS_NAMES.len() {
            return Err(Error::InvalidConfig(format!("record {} has label {} outside 0..10", i, label)));
        }
        labels[i] = label;
        for (p, &byte) in record[1..].iter().enumerate() {
            let c = p / (IMAGE_SIZE * IMAGE_SIZE);
            let y = (p / IMAGE_SIZE) % IMAGE_SIZE;
            let x = p % IMAGE_SIZE;
            images[[i, c, y, x]] = (byte as f32 / 255.0 - norm.mean[c]) / norm.std[c];
        }
    }
    Dataset::new(images.into_dyn(), labels)
}

/// Reads and concatenates the named batch files from `dir`.
pub fn load_batches(
    dir: impl AsRef<Path>,
    files: &[String],
    norm: &Normalization,
    limit: Option<usize>,
) -> Result<Dataset> {
    let dir = dir.as_ref();
    let mut bytes = Vec::new();
    for file in files {
        let path = dir.join(file);
        let chunk = std::fs::read(&path)?;
        info!(path = %path.display(), records = chunk.len() / RECORD_LEN, "loaded CIFAR batch");
        bytes.extend_from_slice(&chunk);
        if limit.is_some_and(|l| bytes.len() / RECORD_LEN >= l) {
            break;
        }
    }
    if bytes.is_empty() {
        return Err(Error::InsufficientData(format!("no CIFAR records found in {}", dir.display())));
    }
    parse_records(&bytes, norm, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: u8, red: u8) -> Vec<u8> {
        let mut r = vec![label];
        r.extend(std::iter::repeat(red).take(IMAGE_SIZE * IMAGE_SIZE));
        r.extend(std::iter::repeat(0).take(IMAGE_SIZE * IMAGE_SIZE));
        r.extend(std::iter::repeat(255).take(IMAGE_SIZE * IMAGE_SIZE));
        r
    }

    #[test]
    fn test_parses_channels_in_planar_order() {
        let mut bytes = record(3, 255);
        bytes.extend(record(9, 0));
        let data = parse_records(&bytes, &Normalization::default(), None).unwrap();
        assert_eq!(data.features.shape(), &[2, 3, 32, 32]);
        assert_eq!(data.labels.to_vec(), vec![3, 9]);
        assert_eq!(data.features[[0, 0, 5, 7]], 1.0);
        assert_eq!(data.features[[0, 1, 31, 31]], -1.0);
        assert_eq!(data.features[[1, 2, 0, 0]], 1.0);
    }

    #[test]
    fn test_limit_and_truncated_input() {
        let mut bytes = record(1, 10);
        bytes.extend(record(2, 10));
        let data = parse_records(&bytes, &Normalization::default(), Some(1)).unwrap();
        assert_eq!(data.len(), 1);

        bytes.pop();
        assert!(parse_records(&bytes, &Normalization::default(), None).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_label() {
        assert!(parse_records(&record(10, 0), &Normalization::default(), None).is_err());
    }
}
