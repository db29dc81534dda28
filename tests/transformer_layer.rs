//! Integration tests for the pre-norm transformer layer: shape, residual
//! wiring, causality, config loading and a short training run with AdamW.

use std::io::Write;

use nanoblock::nn::{Activation, Module, TrainMode, VarBuilder, VarMap};
use nanoblock::optimizer::{AdamW, AdamWConfig, Gradients, Optimizer};
use nanoblock::{DType, Tensor, TransformerConfig, TransformerLayer};
use numr::autograd::{Var, backward, var_mean, var_mul, var_sub};
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};

fn setup() -> (CpuClient, CpuDevice) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let device = CpuDevice::new();
    let client = CpuClient::new(device.clone());
    (client, device)
}

fn config() -> TransformerConfig {
    TransformerConfig {
        hidden_size: 8,
        num_attention_heads: 2,
        intermediate_size: 32,
        attention_probs_dropout_prob: 0.0,
        hidden_dropout_prob: 0.0,
        layer_norm_eps: 1e-5,
        hidden_act: Activation::Gelu,
    }
}

fn input(b: usize, t: usize, h: usize, device: &CpuDevice) -> (Vec<f32>, Var<CpuRuntime>) {
    let data: Vec<f32> = (0..b * t * h)
        .map(|i| ((i as f32) * 0.31).sin() + 0.1 * (i % 3) as f32)
        .collect();
    let var = Var::new(Tensor::<CpuRuntime>::from_slice(&data, &[b, t, h], device), false);
    (data, var)
}

fn zero_mask(b: usize, t: usize, device: &CpuDevice) -> Var<CpuRuntime> {
    Var::new(
        Tensor::<CpuRuntime>::zeros(&[b, 1, 1, t], DType::F32, device),
        false,
    )
}

#[test]
fn test_output_shape_matches_input() {
    let (client, device) = setup();
    let mut map = VarMap::<CpuRuntime>::with_seed(0);
    let mut vb = VarBuilder::new(&mut map, &device);
    let layer = TransformerLayer::new(&config(), &mut vb).unwrap();

    for (b, t) in [(1, 1), (2, 5), (3, 7)] {
        let (_, x) = input(b, t, 8, &device);
        let out = layer.forward(&client, &x, &zero_mask(b, t, &device)).unwrap();
        assert_eq!(out.shape(), &[b, t, 8]);
    }
}

#[test]
fn test_zero_output_projections_give_identity() {
    let (client, device) = setup();
    let cfg = config();
    let (h, inter) = (cfg.hidden_size, cfg.intermediate_size);

    let mut map = VarMap::<CpuRuntime>::with_seed(9);
    map.insert(
        "layer.attention_dense.weight".into(),
        Tensor::<CpuRuntime>::zeros(&[h, h], DType::F32, &device),
    );
    map.insert(
        "layer.attention_dense.bias".into(),
        Tensor::<CpuRuntime>::zeros(&[h], DType::F32, &device),
    );
    map.insert(
        "layer.out_dense.weight".into(),
        Tensor::<CpuRuntime>::zeros(&[h, inter], DType::F32, &device),
    );
    map.insert(
        "layer.out_dense.bias".into(),
        Tensor::<CpuRuntime>::zeros(&[h], DType::F32, &device),
    );

    let mut vb = VarBuilder::new(&mut map, &device);
    let mut layer = TransformerLayer::new(&cfg, &mut vb.pp("layer")).unwrap();
    layer.set_training(false);

    let (data, x) = input(2, 4, h, &device);
    let out = layer.forward(&client, &x, &zero_mask(2, 4, &device)).unwrap();
    assert_eq!(out.tensor().to_vec::<f32>(), data);
}

#[test]
fn test_layer_is_causal() {
    let (client, device) = setup();
    let (b, t, h) = (1, 5, 8);
    let mut map = VarMap::<CpuRuntime>::with_seed(21);
    let mut vb = VarBuilder::new(&mut map, &device);
    let mut layer = TransformerLayer::new(&config(), &mut vb).unwrap();
    layer.set_training(false);

    let (data, x) = input(b, t, h, &device);
    let base = layer
        .forward(&client, &x, &zero_mask(b, t, &device))
        .unwrap()
        .tensor()
        .to_vec::<f32>();

    let j = 3;
    let mut perturbed = data.clone();
    for k in 0..h {
        perturbed[j * h + k] -= 2.0;
    }
    let x2 = Var::new(
        Tensor::<CpuRuntime>::from_slice(&perturbed, &[b, t, h], &device),
        false,
    );
    let out = layer
        .forward(&client, &x2, &zero_mask(b, t, &device))
        .unwrap()
        .tensor()
        .to_vec::<f32>();

    for i in 0..j {
        for k in 0..h {
            let idx = i * h + k;
            assert!((out[idx] - base[idx]).abs() < 1e-5, "position {i} saw position {j}");
        }
    }
}

#[test]
fn test_eval_mode_is_deterministic() {
    let (client, device) = setup();
    let mut cfg = config();
    cfg.hidden_dropout_prob = 0.5;
    cfg.attention_probs_dropout_prob = 0.5;
    let mut map = VarMap::<CpuRuntime>::with_seed(2);
    let mut vb = VarBuilder::new(&mut map, &device);
    let mut layer = TransformerLayer::new(&cfg, &mut vb).unwrap();

    let (_, x) = input(1, 4, 8, &device);
    let mask = zero_mask(1, 4, &device);

    layer.set_training(false);
    let a = layer.forward(&client, &x, &mask).unwrap().tensor().to_vec::<f32>();
    let b = layer.forward(&client, &x, &mask).unwrap().tensor().to_vec::<f32>();
    assert_eq!(a, b);
}

#[test]
fn test_config_from_files() {
    let yaml = "hidden_size: 16\nnum_attention_heads: 4\nintermediate_size: 64\n\
                attention_probs_dropout_prob: 0.1\nhidden_dropout_prob: 0.1\n\
                layer_norm_eps: 0.00001\n";
    let mut yaml_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    yaml_file.write_all(yaml.as_bytes()).unwrap();
    let from_yaml = TransformerConfig::load_yaml(yaml_file.path()).unwrap();
    assert_eq!(from_yaml.head_size(), 4);
    assert_eq!(from_yaml.hidden_act, Activation::Gelu);

    let json = serde_json::to_string(&from_yaml).unwrap();
    let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    json_file.write_all(json.as_bytes()).unwrap();
    let from_json = TransformerConfig::load_json(json_file.path()).unwrap();
    assert_eq!(from_json, from_yaml);

    let bad = "hidden_size: 10\nnum_attention_heads: 4\nintermediate_size: 64\n\
               attention_probs_dropout_prob: 0.1\nhidden_dropout_prob: 0.1\n\
               layer_norm_eps: 0.00001\n";
    let mut bad_file = tempfile::NamedTempFile::new().unwrap();
    bad_file.write_all(bad.as_bytes()).unwrap();
    assert!(TransformerConfig::load_yaml(bad_file.path()).is_err());

    assert!(TransformerConfig::load_json("/nonexistent/config.json").is_err());
}

#[test]
fn test_trains_with_adamw() {
    let (client, device) = setup();
    let (b, t, h) = (2, 3, 8);
    let mut map = VarMap::<CpuRuntime>::with_seed(13);
    let mut vb = VarBuilder::new(&mut map, &device);
    let mut layer = TransformerLayer::new(&config(), &mut vb).unwrap();
    layer.set_training(false);
    assert_eq!(layer.parameters().len(), 16);

    let (_, x) = input(b, t, h, &device);
    let target = Var::new(
        Tensor::<CpuRuntime>::zeros(&[b, t, h], DType::F32, &device),
        false,
    );
    let mask = zero_mask(b, t, &device);

    let mut opt = AdamW::<CpuRuntime>::new(AdamWConfig::default().with_lr(1e-2)).unwrap();
    let mut losses = Vec::new();
    for _ in 0..30 {
        let out = layer.forward(&client, &x, &mask).unwrap();
        let diff = var_sub(&out, &target, &client).unwrap();
        let sq = var_mul(&diff, &diff, &client).unwrap();
        let loss = var_mean(&sq, &[0, 1, 2], false, &client).unwrap();
        losses.push(loss.tensor().to_vec::<f32>()[0]);

        let grads = Gradients::from(&backward(&loss, &client).unwrap());
        let mut params = layer.parameter_map();
        Optimizer::step(&mut opt, &client, &mut params, &grads).unwrap();
        layer.load_parameters(&params);
    }

    assert!(
        losses[29] < losses[0],
        "loss did not decrease: {} -> {}",
        losses[0],
        losses[29]
    );
    let query_id = layer.self_attention().query().weight().id();
    assert_eq!(opt.state(query_id).unwrap().step(), 30);
}
