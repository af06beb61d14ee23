use ndarray::Array4;

use crate::checkpoint::StateDict;
use crate::tensor::Device;
use crate::Result;

pub mod activation;
pub mod conv;

pub use activation::{Activation, ReLU};
pub use conv::Conv2d;

/// A layer operating on `(N, C, H, W)` image batches.
pub trait Module {
    fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>>;

    /// All parameters keyed by their name relative to this module.
    fn state_dict(&self) -> StateDict;

    /// Replaces the parameters with the entries of `state`.
    ///
    /// Loading is strict: missing or unexpected keys and shape mismatches are
    /// errors and leave the module untouched.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;

    /// Enables or disables gradient tracking on every parameter.
    fn set_requires_grad(&mut self, _requires_grad: bool) {}

    /// Move the module to `device`.
    fn to(&mut self, _device: Device) {}

    /// Switch between training and evaluation modes.
    fn train(&mut self, _mode: bool) {}

    fn eval(&mut self) {
        self.train(false);
    }
}
