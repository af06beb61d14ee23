//! Iterative reconstruction: fidelity terms and the solvers that consume them.
pub mod data_fidelity;
pub mod pgd;

pub use data_fidelity::{CustomFidelity, DataFidelity, PoissonLikelihood, L1, L2};
pub use pgd::Pgd;

use crate::Result;

pub trait Optimizer {
    /// Performs a single iteration, updating the current estimate in place.
    ///
    /// Returns the relative change of the estimate.
    fn step(&mut self) -> Result<f32>;
}
