//! DnCNN from Zhang et al., "Beyond a Gaussian Denoiser: Residual Learning of
//! Deep CNN for Image Denoising" (2017).
use ndarray::Array4;
use tracing::debug;

use crate::checkpoint::{self, StateDict};
use crate::models::{Denoiser, DenoiserConfig};
use crate::nn::{Activation, Conv2d, Module, ReLU};
use crate::tensor::Device;
use crate::{ops, Error, Result};

/// Residual denoising CNN.
///
/// `depth` 3x3 convolutions with a ReLU after all but the last one. The
/// network predicts the residual, which is added back onto the input, so the
/// output has the shape of the input.
#[derive(Debug, Clone)]
pub struct DnCNN {
    depth: usize,
    in_conv: Conv2d,
    conv_list: Vec<Conv2d>,
    out_conv: Conv2d,
    nl_list: Vec<ReLU>,
    training: bool,
    device: Device,
}

impl DnCNN {
    /// Builds the network described by `config`.
    ///
    /// Loads the checkpoint at `ckpt_path` when `pretrain` is set, freezes the
    /// parameters unless `train` is set and finally moves the network to
    /// `device`.
    pub fn new(config: &DenoiserConfig) -> Result<Self> {
        let act: Activation = config.act_mode.parse()?;
        if config.depth < 2 {
            return Err(Error::InvalidConfig(format!(
                "DnCNN needs a depth of at least 2, got {}",
                config.depth
            )));
        }
        if config.in_channels != config.out_channels {
            return Err(Error::InvalidConfig(format!(
                "residual connection needs in_channels == out_channels, got {} and {}",
                config.in_channels, config.out_channels
            )));
        }

        let (depth, nf) = (config.depth, config.nf);
        let in_conv = Conv2d::new(config.in_channels, nf, 3, 1, config.bias);
        let conv_list = (0..depth - 2)
            .map(|_| Conv2d::new(nf, nf, 3, 1, config.bias))
            .collect();
        let out_conv = Conv2d::new(nf, config.out_channels, 3, 1, config.bias);
        let nl_list = match act {
            Activation::ReLU => vec![ReLU::default(); depth - 1],
        };

        let mut net = DnCNN {
            depth,
            in_conv,
            conv_list,
            out_conv,
            nl_list,
            training: true,
            device: Device::Cpu,
        };
        debug!(depth, nf, act = %act, "built DnCNN");

        if config.pretrain {
            if let Some(path) = &config.ckpt_path {
                net.load_state_dict(&checkpoint::load(path)?)?;
            }
        }

        if !config.train {
            net.eval();
            net.set_requires_grad(false);
        }

        if let Some(device) = &config.device {
            net.to(device.clone());
        }
        Ok(net)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Whether any parameter still tracks gradients.
    pub fn requires_grad(&self) -> bool {
        self.convs().any(|conv| {
            conv.weight().requires_grad() || conv.bias().map_or(false, |b| b.requires_grad())
        })
    }

    fn convs(&self) -> impl Iterator<Item = &Conv2d> {
        std::iter::once(&self.in_conv)
            .chain(self.conv_list.iter())
            .chain(std::iter::once(&self.out_conv))
    }

    fn convs_mut(&mut self) -> impl Iterator<Item = &mut Conv2d> {
        std::iter::once(&mut self.in_conv)
            .chain(self.conv_list.iter_mut())
            .chain(std::iter::once(&mut self.out_conv))
    }
}

impl Module for DnCNN {
    fn forward(&self, x_in: &Array4<f32>) -> Result<Array4<f32>> {
        let mut x = self.nl_list[0].forward(&self.in_conv.forward(x_in)?)?;
        for (conv, nl) in self.conv_list.iter().zip(&self.nl_list[1..]) {
            x = nl.forward(&conv.forward(&x)?)?;
        }
        ops::add(&self.out_conv.forward(&x)?, x_in, &self.device)
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        checkpoint::insert_prefixed(&mut state, "in_conv", self.in_conv.state_dict());
        for (i, conv) in self.conv_list.iter().enumerate() {
            checkpoint::insert_prefixed(&mut state, &format!("conv_list.{}", i), conv.state_dict());
        }
        checkpoint::insert_prefixed(&mut state, "out_conv", self.out_conv.state_dict());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        // keys, shapes and data lengths are all validated before any layer is touched
        checkpoint::expect_matching(&self.state_dict(), state)?;
        self.in_conv
            .load_state_dict(&checkpoint::sub_dict(state, "in_conv"))?;
        for (i, conv) in self.conv_list.iter_mut().enumerate() {
            conv.load_state_dict(&checkpoint::sub_dict(state, &format!("conv_list.{}", i)))?;
        }
        self.out_conv
            .load_state_dict(&checkpoint::sub_dict(state, "out_conv"))
    }

    fn set_requires_grad(&mut self, requires_grad: bool) {
        for conv in self.convs_mut() {
            conv.set_requires_grad(requires_grad);
        }
    }

    fn to(&mut self, device: Device) {
        for nl in &mut self.nl_list {
            nl.to(device.clone());
        }
        self.device = device;
    }

    fn train(&mut self, mode: bool) {
        self.training = mode;
    }
}

impl Denoiser for DnCNN {
    fn denoise(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        self.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::{
        rand::{self, Rng},
        rand_distr::Uniform,
        RandomExt,
    };

    fn small() -> DenoiserConfig {
        DenoiserConfig::default().depth(4).nf(8)
    }

    #[test]
    fn output_shape_equals_input_shape() {
        for _ in 0..5 {
            let c: usize = rand::thread_rng().gen_range(1..4);
            let depth: usize = rand::thread_rng().gen_range(2..6);
            let net = DnCNN::new(&small().channels(c, c).depth(depth)).unwrap();
            let n: usize = rand::thread_rng().gen_range(1..3);
            let h: usize = rand::thread_rng().gen_range(1..16);
            let w: usize = rand::thread_rng().gen_range(1..16);
            let x = Array4::<f32>::random((n, c, h, w), Uniform::new(0., 1.));
            assert_eq!(net.denoise(&x).unwrap().shape(), x.shape());
        }
    }

    #[test]
    fn topology_follows_depth() {
        let net = DnCNN::new(&small().depth(5)).unwrap();
        assert_eq!(net.conv_list.len(), 3);
        assert_eq!(net.nl_list.len(), 4);
        let state = net.state_dict();
        assert_eq!(state.len(), 10);
        assert_eq!(state["in_conv.weight"].shape, vec![8, 1, 3, 3]);
        assert_eq!(state["conv_list.2.bias"].shape, vec![8]);
        assert_eq!(state["out_conv.weight"].shape, vec![1, 8, 3, 3]);

        let net = DnCNN::new(&small().depth(2).bias(false)).unwrap();
        assert!(net.conv_list.is_empty());
        assert_eq!(net.state_dict().len(), 2);
    }

    #[test]
    fn zero_residual_is_identity() {
        let mut net = DnCNN::new(&small()).unwrap();
        let mut state = net.state_dict();
        for key in ["out_conv.weight", "out_conv.bias"].iter() {
            let td = state.get_mut(*key).unwrap();
            td.data.iter_mut().for_each(|v| *v = 0.);
        }
        net.load_state_dict(&state).unwrap();
        let x = Array4::<f32>::random((1, 1, 6, 6), Uniform::new(0., 1.));
        assert_eq!(net.denoise(&x).unwrap(), x);
    }

    #[test]
    fn frozen_unless_trainable() {
        let net = DnCNN::new(&small()).unwrap();
        assert!(!net.is_training());
        assert!(!net.requires_grad());

        let net = DnCNN::new(&small().train(true)).unwrap();
        assert!(net.is_training());
        assert!(net.requires_grad());
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            DnCNN::new(&small().act_mode("L")),
            Err(Error::UnsupportedActivation(_))
        ));
        assert!(matches!(
            DnCNN::new(&small().depth(1)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            DnCNN::new(&small().channels(1, 3)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn pretrained_checkpoint_reproduces_outputs() {
        let path = std::env::temp_dir().join("proxinv_dncnn_pretrained.bin");
        let net = DnCNN::new(&small()).unwrap();
        checkpoint::save(&net.state_dict(), &path).unwrap();

        let loaded = DnCNN::new(&small().pretrained(&path)).unwrap();
        let x = Array4::<f32>::random((2, 1, 7, 5), Uniform::new(0., 1.));
        assert_eq!(loaded.denoise(&x).unwrap(), net.denoise(&x).unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pretrain_flag_without_path_keeps_random_init() {
        let mut config = small();
        config.pretrain = true;
        assert!(DnCNN::new(&config).is_ok());
    }

    #[test]
    fn mismatched_checkpoint_fails_loudly() {
        let path = std::env::temp_dir().join("proxinv_dncnn_mismatch.bin");
        let net = DnCNN::new(&small().nf(4)).unwrap();
        checkpoint::save(&net.state_dict(), &path).unwrap();

        match DnCNN::new(&small().pretrained(&path)) {
            Err(Error::Checkpoint(diff)) => {
                assert!(diff.missing_keys.is_empty());
                // the single-channel output bias keeps its shape
                assert_eq!(diff.shape_mismatches.len(), 7);
            }
            other => panic!("expected a checkpoint error, got {:?}", other.map(|_| ())),
        }
        let _ = std::fs::remove_file(&path);

        let missing = std::env::temp_dir().join("proxinv_dncnn_missing.bin");
        assert!(matches!(
            DnCNN::new(&small().pretrained(&missing)),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn malformed_checkpoint_leaves_network_untouched() {
        let mut net = DnCNN::new(&small().depth(3)).unwrap();
        let before = net.state_dict();
        let mut state = DnCNN::new(&small().depth(3)).unwrap().state_dict();
        state.get_mut("out_conv.weight").unwrap().data.pop();

        match net.load_state_dict(&state) {
            Err(Error::Checkpoint(diff)) => {
                assert_eq!(diff.malformed_keys, vec!["out_conv.weight".to_string()]);
            }
            other => panic!("expected a checkpoint error, got {:?}", other),
        }
        assert_eq!(net.state_dict(), before);
    }

    #[cfg(feature = "opencl")]
    #[test]
    fn opencl_matches_cpu() {
        let cpu = DnCNN::new(&small()).unwrap();
        let mut gpu = cpu.clone();
        gpu.to(Device::from(crate::ops::gpu::OpenCLKernelCtx::new().unwrap()));
        let x = Array4::<f32>::random((1, 1, 9, 9), Uniform::new(0., 1.));
        let (a, b) = (cpu.denoise(&x).unwrap(), gpu.denoise(&x).unwrap());
        ndarray::Zip::from(&a).and(&b).for_each(|&a, &b| assert!((a - b).abs() < 1e-4));
    }
}
