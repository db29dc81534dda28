use std::collections::HashMap;

use nanoblock::nn::{Linear, Module};
use nanoblock::optimizer::{
    AdamW, AdamWConfig, Gradients, Optimizer, ParamGroup, ParamGroupOverrides,
};
use nanoblock::{DType, Error, Tensor};
use numr::autograd::{Var, backward, var_mean, var_mul, var_sub};
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::TensorId;

fn cpu_setup() -> (CpuClient, CpuDevice) {
    let device = CpuDevice::new();
    let client = CpuClient::new(device.clone());
    (client, device)
}

fn ones(n: usize, device: &CpuDevice) -> Tensor<CpuRuntime> {
    Tensor::<CpuRuntime>::from_slice(&vec![1.0f32; n], &[n], device)
}

#[test]
fn test_unit_gradient_step_from_zero() {
    let (client, device) = cpu_setup();
    let id = TensorId::new();
    let mut params = HashMap::new();
    params.insert(id, Tensor::<CpuRuntime>::zeros(&[3, 3], DType::F32, &device));
    let mut grads = Gradients::new();
    grads.insert_dense(
        id,
        Tensor::<CpuRuntime>::from_slice(&[1.0f32; 9], &[3, 3], &device),
    );

    let config = AdamWConfig {
        lr: 0.001,
        betas: (0.9, 0.999),
        eps: 1e-6,
        weight_decay: 0.0,
        correct_bias: true,
    };
    let mut opt = AdamW::<CpuRuntime>::new(config).unwrap();
    opt.step(&client, &mut params, &grads).unwrap();

    for v in params[&id].to_vec::<f32>() {
        assert!((v + 0.001).abs() < 1e-6, "expected about -0.001, got {v}");
    }
}

#[test]
fn test_decay_needs_a_gradient() {
    let (client, device) = cpu_setup();
    let (with_grad, without_grad) = (TensorId::new(), TensorId::new());
    let mut params = HashMap::new();
    params.insert(with_grad, ones(2, &device));
    params.insert(without_grad, ones(2, &device));
    let mut grads = Gradients::new();
    grads.insert_dense(with_grad, ones(2, &device));

    let mut opt =
        AdamW::<CpuRuntime>::new(AdamWConfig::default().with_weight_decay(0.01)).unwrap();
    opt.step(&client, &mut params, &grads).unwrap();

    assert_eq!(params[&without_grad].to_vec::<f32>(), vec![1.0, 1.0]);
    // (1 - 0.001) * (1 - 0.01 * 0.001)
    let want = 0.999f32 * (1.0 - 1e-5);
    for v in params[&with_grad].to_vec::<f32>() {
        assert!((v - want).abs() < 1e-6, "got {v}, want {want}");
    }
}

#[test]
fn test_invalid_construction_fails() {
    for config in [
        AdamWConfig::default().with_lr(-1.0),
        AdamWConfig::default().with_betas(1.0, 0.999),
        AdamWConfig::default().with_betas(-0.1, 0.999),
    ] {
        assert!(matches!(
            AdamW::<CpuRuntime>::new(config),
            Err(Error::InvalidConfig { .. })
        ));
    }

    let overrides: ParamGroupOverrides = serde_json::from_str(r#"{"betas": [0.9, 1.0]}"#).unwrap();
    let group = ParamGroup::new([TensorId::new()]).with_overrides(overrides);
    assert!(AdamW::<CpuRuntime>::with_param_groups(AdamWConfig::default(), vec![group]).is_err());
}

/// Fit a linear layer to `y = 2x` and return the final weights.
fn fit_linear<O: Optimizer<CpuRuntime>>(opt: &mut O, steps: usize) -> Vec<f32> {
    let (client, device) = cpu_setup();
    let weight = Tensor::<CpuRuntime>::from_slice(&[0.3f32, -0.2, 0.1, 0.4], &[2, 2], &device);
    let mut linear = Linear::new(weight, None, true);

    let x = Var::new(
        Tensor::<CpuRuntime>::from_slice(&[1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2], &device),
        false,
    );
    let y = Var::new(
        Tensor::<CpuRuntime>::from_slice(&[2.0f32, 0.0, 0.0, 2.0, 2.0, 2.0], &[3, 2], &device),
        false,
    );

    for _ in 0..steps {
        let pred = linear.forward(&client, &x).unwrap();
        let diff = var_sub(&pred, &y, &client).unwrap();
        let sq = var_mul(&diff, &diff, &client).unwrap();
        let loss = var_mean(&sq, &[0, 1], false, &client).unwrap();
        let grads = Gradients::from(&backward(&loss, &client).unwrap());

        let mut params = linear.parameter_map();
        opt.step(&client, &mut params, &grads).unwrap();
        linear.load_parameters(&params);
    }
    linear.weight().tensor().to_vec::<f32>()
}

#[test]
fn test_fits_linear_layer() {
    let mut opt = AdamW::<CpuRuntime>::new(AdamWConfig::default().with_lr(0.05)).unwrap();
    let w = fit_linear(&mut opt, 300);
    let want = [2.0f32, 0.0, 0.0, 2.0];
    for (g, t) in w.iter().zip(want.iter()) {
        assert!((g - t).abs() < 0.1, "weights {w:?}");
    }
}

#[test]
fn test_repeated_fresh_runs_match() {
    let run = || {
        let mut opt = AdamW::<CpuRuntime>::new(AdamWConfig::default().with_lr(0.05)).unwrap();
        fit_linear(&mut opt, 20)
    };
    assert_eq!(run(), run());
}
