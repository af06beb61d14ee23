//! Building blocks for imaging inverse problems: learned denoisers and the
//! data fidelity terms consumed by proximal splitting solvers.
pub mod checkpoint;
pub mod error;
pub mod models;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod physics;
pub mod tensor;

pub use error::{Error, Result};
