use ndarray::{Array1, Array2};
use nnlab::data::Dataset;
use nnlab::training::{evaluate, fit, TrainConfig};
use nnlab::{ConvNet, GruClassifier, Loss, Mode, Network, Optimizer, Perceptron, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Sequences whose label is the sign of the sum of their first feature.
fn trend_sequences(n: usize, steps: usize, rng: &mut StdRng) -> Dataset {
    let mut features = Tensor::zeros(vec![n, steps, 2]);
    let mut labels = Array1::zeros(n);
    for i in 0..n {
        let direction = if i % 2 == 0 { 1.0 } else { -1.0 };
        for t in 0..steps {
            features[[i, t, 0]] = direction * 0.5 + rng.random_range(-0.2..0.2);
            features[[i, t, 1]] = rng.random_range(-0.2..0.2);
        }
        labels[i] = usize::from(direction > 0.0);
    }
    Dataset::new(features, labels).unwrap()
}

#[test]
fn test_gru_classifier_learns_sequence_direction() {
    let mut rng = StdRng::seed_from_u64(21);
    let train = trend_sequences(64, 6, &mut rng);
    let val = trend_sequences(32, 6, &mut rng);
    let mut model = GruClassifier::new(2, 8, 1, 1, 0.0, &mut rng);
    let mut optimizer = Optimizer::adam(0.02);
    let config = TrainConfig {
        epochs: 15,
        batch_size: 16,
        clip_norm: Some(1.0),
        ..TrainConfig::default()
    };

    let history = fit(&mut model, &mut optimizer, Loss::BinaryCrossEntropy, &train, &val, &config, &mut rng).unwrap();
    let last = history.last().unwrap();
    assert!(last.val_loss < history.epochs[0].val_loss);
    assert!(last.val_accuracy >= 0.9, "accuracy {}", last.val_accuracy);
}

#[test]
fn test_evaluation_does_not_change_parameters() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut model = ConvNet::resnet18(10, 2, &mut rng);
    let before: Vec<Tensor> = model.parameters().iter().map(|p| p.value.clone()).collect();
    let data = Dataset::new(Tensor::ones(vec![3, 3, 8, 8]), Array1::from(vec![0, 4, 9])).unwrap();

    let first = evaluate(&mut model, Loss::CrossEntropy, &data, 2).unwrap();
    let second = evaluate(&mut model, Loss::CrossEntropy, &data, 2).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.total, 3);
    let after: Vec<Tensor> = model.parameters().iter().map(|p| p.value.clone()).collect();
    assert_eq!(before, after);
}

#[test]
fn test_zero_grad_clears_every_parameter() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut model = ConvNet::mobilenet_v2(10, 0.25, &mut rng);
    let input = Tensor::from_shape_fn(vec![2, 3, 8, 8], |d| (d[0] + d[3]) as f32 * 0.1);
    model.forward(&input, Mode::Train).unwrap();
    model.backward(&Array2::from_elem((2, 10), 0.05)).unwrap();
    assert!(model.parameters().iter().any(|p| p.grad.iter().any(|&g| g != 0.0)));

    model.zero_grad();
    assert!(model.parameters().iter().all(|p| p.grad.iter().all(|&g| g == 0.0)));
}

#[test]
fn test_named_parameters_are_unique() {
    let mut rng = StdRng::seed_from_u64(5);
    let model = GruClassifier::new(3, 4, 2, 1, 0.1, &mut rng);
    let named = model.named_parameters();
    for (i, ((name, value), param)) in named.iter().zip(model.parameters()).enumerate() {
        assert_eq!(*name, format!("{}.{}", i, param.name));
        assert_eq!(*value, &param.value);
    }
    let mut names: Vec<String> = named.into_iter().map(|(n, _)| n).collect();
    let count = names.len();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), count);
    assert_eq!(count, 2 * 4 + 2);
}

#[test]
fn test_perceptron_rejects_wrong_feature_count() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut model = Perceptron::new(8, &mut rng);
    assert!(model.forward(&Tensor::zeros(vec![4, 7]), Mode::Eval).is_err());
}
