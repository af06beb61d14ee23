//! Tensor operations used by the network layers.
//!
//! Convolutions always run on the CPU. The elementwise stages dispatch on the
//! [`Device`] the calling layer lives on.
use ndarray::{Array, Dimension};

use crate::tensor::Device;
use crate::Result;

pub mod cpu;
#[cfg(feature = "opencl")]
pub mod gpu;

pub use cpu::conv2d;

/// `max(x, 0)` on `device`
pub fn relu<D: Dimension>(x: &Array<f32, D>, device: &Device) -> Result<Array<f32, D>> {
    match device {
        Device::Cpu => Ok(cpu::relu(x)),
        #[cfg(feature = "opencl")]
        Device::OpenCL(ctx) => {
            let x = x.as_standard_layout().into_owned();
            Ok(ctx.unary_op(&x, gpu::UnaryOps::ReLu)?)
        }
    }
}

/// `a + b` on `device`
pub fn add<D: Dimension>(
    a: &Array<f32, D>,
    b: &Array<f32, D>,
    device: &Device,
) -> Result<Array<f32, D>> {
    match device {
        Device::Cpu => cpu::add(a, b),
        #[cfg(feature = "opencl")]
        Device::OpenCL(ctx) => {
            if a.shape() != b.shape() {
                return Err(crate::Error::shape_mismatch(a.shape(), b.shape()));
            }
            let a = a.as_standard_layout().into_owned();
            let b = b.as_standard_layout().into_owned();
            Ok(ctx.binary_op(&a, &b, gpu::BinaryOps::Add)?)
        }
    }
}
