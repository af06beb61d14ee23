#[cfg(feature = "opencl")]
use crate::ops::gpu::OpenCLKernelCtx;

use ndarray::{Array, Dimension};

pub type TensorData<D> = Array<f32, D>;

/// A learnable array owned by a layer.
#[derive(Debug, Clone)]
pub struct Parameter<D: Dimension> {
    /// Data of the parameter
    data: TensorData<D>,
    /// Whether gradients should be tracked for this parameter.
    requires_grad: bool,
}

impl<D: Dimension> Parameter<D> {
    pub fn new(data: TensorData<D>) -> Self {
        Self {
            data,
            requires_grad: true,
        }
    }

    pub fn data(&self) -> &TensorData<D> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
    }

    /// Replaces the inner data, keeping the shape.
    pub fn assign(&mut self, data: TensorData<D>) -> crate::Result<()> {
        if data.shape() != self.data.shape() {
            return Err(crate::Error::shape_mismatch(self.data.shape(), data.shape()));
        }
        self.data = data;
        Ok(())
    }
}

/// Represents a device which can execute the elementwise stages of a forward pass
#[derive(Debug, Clone)]
pub enum Device {
    Cpu,
    #[cfg(feature = "opencl")]
    OpenCL(OpenCLKernelCtx),
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu
    }
}

#[cfg(feature = "opencl")]
impl From<OpenCLKernelCtx> for Device {
    fn from(ctx: OpenCLKernelCtx) -> Self {
        Device::OpenCL(ctx)
    }
}
