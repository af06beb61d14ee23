use ndarray::{Array1, Array4, Ix1, Ix4};
use ndarray_rand::{rand_distr::Uniform, RandomExt};

use crate::checkpoint::{self, StateDict, TensorData};
use crate::nn::Module;
use crate::tensor::Parameter;
use crate::{ops, Result};

/// Square-kernel, stride-1 2-D convolution. Always evaluated on the CPU.
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Parameter<Ix4>, // [out_channels, in_channels, kernel, kernel]
    bias: Option<Parameter<Ix1>>, // [out_channels]
    padding: usize,
}

impl Conv2d {
    /// Weights and biases are drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    pub fn new(in_ch: usize, out_ch: usize, kernel: usize, padding: usize, use_bias: bool) -> Self {
        let fan_in = (in_ch * kernel * kernel).max(1) as f32;
        let bound = 1. / fan_in.sqrt();
        let weight = Parameter::new(Array4::random(
            (out_ch, in_ch, kernel, kernel),
            Uniform::new(-bound, bound),
        ));
        let bias = if use_bias {
            Some(Parameter::new(Array1::random(
                out_ch,
                Uniform::new(-bound, bound),
            )))
        } else {
            None
        };
        Conv2d {
            weight,
            bias,
            padding,
        }
    }

    pub fn weight(&self) -> &Parameter<Ix4> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Parameter<Ix1>> {
        self.bias.as_ref()
    }

    pub fn in_channels(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl Module for Conv2d {
    fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        ops::conv2d(
            x,
            self.weight.data(),
            self.bias.as_ref().map(Parameter::data),
            self.padding,
        )
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert(
            "weight".to_string(),
            TensorData::from_array(self.weight.data()),
        );
        if let Some(b) = &self.bias {
            state.insert("bias".to_string(), TensorData::from_array(b.data()));
        }
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        checkpoint::expect_matching(&self.state_dict(), state)?;
        let weight = state["weight"].to_array::<Ix4>()?;
        let bias = match &self.bias {
            Some(_) => Some(state["bias"].to_array::<Ix1>()?),
            None => None,
        };
        self.weight.assign(weight)?;
        if let (Some(param), Some(b)) = (self.bias.as_mut(), bias) {
            param.assign(b)?;
        }
        Ok(())
    }

    fn set_requires_grad(&mut self, requires_grad: bool) {
        self.weight.set_requires_grad(requires_grad);
        if let Some(b) = &mut self.bias {
            b.set_requires_grad(requires_grad);
        }
    }
}
