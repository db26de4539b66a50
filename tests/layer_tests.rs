use nnlab::layers::{
    ActivationLayer, BatchNormLayer, Conv2DLayer, DropoutLayer, FeedForwardLayer, GlobalAvgPoolLayer, GruLayer,
    Sequential,
};
use nnlab::{ActivationType, Error, Layer, Mode, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn test_parameter_count_accuracy() {
    let mut rng = StdRng::seed_from_u64(0);
    // (inputs, neurons) per dense layer; weights plus biases
    let test_cases = vec![
        (vec![(10, 5), (5, 3)], 10 * 5 + 5 * 3 + 5 + 3),
        (vec![(20, 16), (16, 12), (12, 8), (8, 4)], 640 + 40),
        (vec![(15, 10), (10, 7), (7, 5)], 255 + 22),
    ];

    for (layer_configs, expected_params) in test_cases {
        let mut model = Sequential::new();
        for &(inputs, neurons) in &layer_configs {
            model.push(FeedForwardLayer::new(inputs, neurons, ActivationType::ReLU, &mut rng));
        }
        assert_eq!(
            model.parameter_count(),
            expected_params,
            "Parameter count mismatch for model with {:?}",
            layer_configs
        );
    }
}

#[test]
fn test_conv_stack_shapes() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut net = Sequential::new()
        .with(Conv2DLayer::new(3, 4, (3, 3), 1, 1, &mut rng))
        .with(BatchNormLayer::new(4))
        .with(ActivationLayer::relu())
        .with(Conv2DLayer::grouped(4, 4, (3, 3), 2, 1, 4, false, &mut rng))
        .with(GlobalAvgPoolLayer::new())
        .with(DropoutLayer::new(0.5, &mut rng))
        .with(FeedForwardLayer::new(4, 2, ActivationType::Linear, &mut rng));

    let input = Tensor::from_shape_fn(vec![2, 3, 8, 8], |d| (d[2] as f32 - d[3] as f32) / 8.0 + d[1] as f32);
    let out = net.forward(&input, Mode::Train).unwrap();
    assert_eq!(out.shape(), &[2, 2]);

    let grad = net.backward(&Tensor::ones(vec![2, 2])).unwrap();
    assert_eq!(grad.shape(), input.shape());
    // conv(3→4, bias) + bn + depthwise(no bias) + dense
    assert_eq!(net.parameter_count(), (4 * 3 * 9 + 4) + 8 + 4 * 9 + (4 * 2 + 2));
}

#[test]
fn test_backward_before_forward_is_an_error() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut gru = GruLayer::new(2, 3, &mut rng);
    assert!(matches!(gru.backward(&Tensor::zeros(vec![1, 1, 3])), Err(Error::MissingCache(_))));

    let mut dense = FeedForwardLayer::new(2, 3, ActivationType::Sigmoid, &mut rng);
    assert!(matches!(dense.backward(&Tensor::zeros(vec![1, 3])), Err(Error::MissingCache(_))));
}

#[test]
fn test_batch_norm_needs_two_values_per_channel_in_training() {
    let mut bn = BatchNormLayer::new(3);
    let single = Tensor::ones(vec![1, 3]);
    assert!(matches!(bn.forward(&single, Mode::Train), Err(Error::InsufficientData(_))));
    assert!(bn.forward(&single, Mode::Eval).is_ok());
}
