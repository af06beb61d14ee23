//! Image denoisers, usable as implicit priors by the solvers in [`crate::optim`].
use ndarray::Array4;
use std::path::PathBuf;

use crate::tensor::Device;
use crate::Result;

pub mod dncnn;
pub mod registry;

pub use dncnn::DnCNN;
pub use registry::{registry, DenoiserCtor, DenoiserRegistry};

/// Maps a noisy `(N, C, H, W)` batch to a denoised batch of the same shape.
pub trait Denoiser {
    fn denoise(&self, x: &Array4<f32>) -> Result<Array4<f32>>;
}

impl<F> Denoiser for F
where
    F: Fn(&Array4<f32>) -> Result<Array4<f32>>,
{
    fn denoise(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        self(x)
    }
}

/// Construction parameters shared by the registered denoisers.
///
/// Defaults describe a grayscale 20-layer DnCNN with 64 features, randomly
/// initialized and frozen.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DenoiserConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Total number of convolutions, at least 2.
    pub depth: usize,
    /// Activation mode, `"R"` for ReLU.
    pub act_mode: String,
    pub bias: bool,
    /// Width of the hidden feature maps.
    pub nf: usize,
    /// Load parameters from `ckpt_path`.
    pub pretrain: bool,
    pub ckpt_path: Option<PathBuf>,
    /// Keep gradients enabled and stay in training mode.
    pub train: bool,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub device: Option<Device>,
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_channels: 1,
            depth: 20,
            act_mode: "R".to_string(),
            bias: true,
            nf: 64,
            pretrain: false,
            ckpt_path: None,
            train: false,
            device: None,
        }
    }
}

impl DenoiserConfig {
    pub fn channels(mut self, in_channels: usize, out_channels: usize) -> Self {
        self.in_channels = in_channels;
        self.out_channels = out_channels;
        self
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn act_mode(mut self, act_mode: impl Into<String>) -> Self {
        self.act_mode = act_mode.into();
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn nf(mut self, nf: usize) -> Self {
        self.nf = nf;
        self
    }

    /// Load the parameters from the checkpoint at `path`.
    pub fn pretrained(mut self, path: impl Into<PathBuf>) -> Self {
        self.pretrain = true;
        self.ckpt_path = Some(path.into());
        self
    }

    pub fn train(mut self, train: bool) -> Self {
        self.train = train;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }
}
