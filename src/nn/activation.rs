use ndarray::Array4;
use std::fmt;
use std::str::FromStr;

use crate::checkpoint::StateDict;
use crate::nn::Module;
use crate::tensor::Device;
use crate::{ops, Error, Result};

/// Nonlinearity placed between convolutions, in the one-letter nomenclature of
/// the DnCNN/DRUNet model zoo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Activation {
    /// `"R"`
    ReLU,
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "R" => Ok(Activation::ReLU),
            other => Err(Error::UnsupportedActivation(other.to_string())),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::ReLU => f.write_str("R"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReLU {
    device: Device,
}

impl Module for ReLU {
    fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        ops::relu(x, &self.device)
    }

    fn state_dict(&self) -> StateDict {
        StateDict::new()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        crate::checkpoint::expect_matching(&self.state_dict(), state)
    }

    fn to(&mut self, device: Device) {
        self.device = device;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relu_only() {
        assert_eq!("R".parse::<Activation>().unwrap(), Activation::ReLU);
        assert!(matches!(
            "L".parse::<Activation>(),
            Err(Error::UnsupportedActivation(mode)) if mode == "L"
        ));
    }
}
