//! Forward measurement operators.
use ndarray::{Array, Dimension, Zip};

use crate::{Error, Result};

/// A forward operator `A` mapping a signal to the measurement space.
pub trait Physics<D: Dimension> {
    /// Computes `A(x)`.
    fn a(&self, x: &Array<f32, D>) -> Result<Array<f32, D>>;

    /// Computes `A^T(y)`.
    fn a_adjoint(&self, y: &Array<f32, D>) -> Result<Array<f32, D>> {
        Ok(y.clone())
    }

    /// Proximal map of `x -> gamma / 2 * ||A(x) - y||^2` evaluated at `z`.
    fn prox_l2(
        &self,
        _z: &Array<f32, D>,
        _y: &Array<f32, D>,
        _gamma: f32,
    ) -> Result<Array<f32, D>> {
        Err(Error::NoProx)
    }

    /// Whether `A` is the identity, in which case a fidelity term may use its
    /// own closed-form proximal operator.
    fn is_denoising(&self) -> bool {
        false
    }
}

/// The identity operator of pure denoising problems.
#[derive(Debug, Clone, Copy, Default)]
pub struct Denoising;

impl<D: Dimension> Physics<D> for Denoising {
    fn a(&self, x: &Array<f32, D>) -> Result<Array<f32, D>> {
        Ok(x.clone())
    }

    fn prox_l2(&self, z: &Array<f32, D>, y: &Array<f32, D>, gamma: f32) -> Result<Array<f32, D>> {
        check_shape(z, y)?;
        Ok((z + &(y * gamma)) / (1. + gamma))
    }

    fn is_denoising(&self) -> bool {
        true
    }
}

/// Masks out pixels: `A(x) = m * x` with `m` in `{0, 1}`.
#[derive(Debug, Clone)]
pub struct Inpainting<D: Dimension> {
    mask: Array<f32, D>,
}

impl<D: Dimension> Inpainting<D> {
    /// Any nonzero entry of `mask` marks an observed pixel.
    pub fn new(mask: Array<f32, D>) -> Self {
        Self {
            mask: mask.mapv(|m| if m != 0. { 1. } else { 0. }),
        }
    }

    pub fn mask(&self) -> &Array<f32, D> {
        &self.mask
    }
}

impl<D: Dimension> Physics<D> for Inpainting<D> {
    fn a(&self, x: &Array<f32, D>) -> Result<Array<f32, D>> {
        check_shape(&self.mask, x)?;
        Ok(&self.mask * x)
    }

    fn a_adjoint(&self, y: &Array<f32, D>) -> Result<Array<f32, D>> {
        self.a(y)
    }

    fn prox_l2(&self, z: &Array<f32, D>, y: &Array<f32, D>, gamma: f32) -> Result<Array<f32, D>> {
        check_shape(&self.mask, z)?;
        check_shape(&self.mask, y)?;
        let mut out = z.clone();
        Zip::from(&mut out)
            .and(&self.mask)
            .and(y)
            .for_each(|out, &m, &y| *out = (*out + gamma * m * y) / (1. + gamma * m));
        Ok(out)
    }
}

pub(crate) fn check_shape<D: Dimension>(a: &Array<f32, D>, b: &Array<f32, D>) -> Result<()> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(Error::shape_mismatch(a.shape(), b.shape()))
    }
}
