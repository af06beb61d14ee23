//! Data fidelity terms `f(A(x), y)` for iterative reconstruction.
//!
//! A term defines `f`, `grad_f` and `prox_f` on the measurement space. The
//! provided methods compose them with a [`Physics`] operator. Missing
//! capabilities surface as [`Error::NoValue`], [`Error::NoGradient`] and
//! [`Error::NoProx`].
use ndarray::{Array, Dimension, Zip};

use crate::physics::{check_shape, Physics};
use crate::{Error, Result};

pub trait DataFidelity<D: Dimension> {
    /// Fidelity of `u` against the measurement `y`.
    fn f(&self, _u: &Array<f32, D>, _y: &Array<f32, D>) -> Result<f32> {
        Err(Error::NoValue)
    }

    /// Gradient of [`DataFidelity::f`] w.r.t. `u`.
    fn grad_f(&self, _u: &Array<f32, D>, _y: &Array<f32, D>) -> Result<Array<f32, D>> {
        Err(Error::NoGradient)
    }

    /// Closed-form proximal operator of [`DataFidelity::f`] with step `gamma`.
    fn prox_f(&self, _x: &Array<f32, D>, _y: &Array<f32, D>, _gamma: f32) -> Result<Array<f32, D>> {
        Err(Error::NoProx)
    }

    /// `f(A(x), y)`
    fn value(&self, x: &Array<f32, D>, y: &Array<f32, D>, physics: &dyn Physics<D>) -> Result<f32> {
        self.f(&physics.a(x)?, y)
    }

    /// `grad_f(A(x), y)`, the gradient w.r.t. the output of the forward operator.
    fn grad(
        &self,
        x: &Array<f32, D>,
        y: &Array<f32, D>,
        physics: &dyn Physics<D>,
    ) -> Result<Array<f32, D>> {
        self.grad_f(&physics.a(x)?, y)
    }

    /// Proximal operator of `x -> f(A(x), y)` with step `gamma`.
    ///
    /// Only available in closed form when `physics` is the identity.
    fn prox(
        &self,
        x: &Array<f32, D>,
        y: &Array<f32, D>,
        physics: &dyn Physics<D>,
        gamma: f32,
    ) -> Result<Array<f32, D>> {
        if physics.is_denoising() {
            self.prox_f(x, y, gamma)
        } else {
            Err(Error::NoProx)
        }
    }
}

type ValueFn<D> = Box<dyn Fn(&Array<f32, D>, &Array<f32, D>) -> Result<f32> + Send + Sync>;
type GradFn<D> = Box<dyn Fn(&Array<f32, D>, &Array<f32, D>) -> Result<Array<f32, D>> + Send + Sync>;
type ProxFn<D> =
    Box<dyn Fn(&Array<f32, D>, &Array<f32, D>, f32) -> Result<Array<f32, D>> + Send + Sync>;

/// A fidelity term assembled from user supplied functions, any of which may be absent.
pub struct CustomFidelity<D> {
    f: Option<ValueFn<D>>,
    grad_f: Option<GradFn<D>>,
    prox_f: Option<ProxFn<D>>,
}

impl<D> Default for CustomFidelity<D> {
    fn default() -> Self {
        Self {
            f: None,
            grad_f: None,
            prox_f: None,
        }
    }
}

impl<D: Dimension> CustomFidelity<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_f<F>(mut self, f: F) -> Self
    where
        F: Fn(&Array<f32, D>, &Array<f32, D>) -> Result<f32> + Send + Sync + 'static,
    {
        self.f = Some(Box::new(f));
        self
    }

    pub fn with_grad_f<F>(mut self, grad_f: F) -> Self
    where
        F: Fn(&Array<f32, D>, &Array<f32, D>) -> Result<Array<f32, D>> + Send + Sync + 'static,
    {
        self.grad_f = Some(Box::new(grad_f));
        self
    }

    pub fn with_prox_f<F>(mut self, prox_f: F) -> Self
    where
        F: Fn(&Array<f32, D>, &Array<f32, D>, f32) -> Result<Array<f32, D>>
            + Send
            + Sync
            + 'static,
    {
        self.prox_f = Some(Box::new(prox_f));
        self
    }
}

impl<D: Dimension> DataFidelity<D> for CustomFidelity<D> {
    fn f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<f32> {
        self.f.as_ref().ok_or(Error::NoValue)?(u, y)
    }

    fn grad_f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<Array<f32, D>> {
        self.grad_f.as_ref().ok_or(Error::NoGradient)?(u, y)
    }

    fn prox_f(&self, x: &Array<f32, D>, y: &Array<f32, D>, gamma: f32) -> Result<Array<f32, D>> {
        self.prox_f.as_ref().ok_or(Error::NoProx)?(x, y, gamma)
    }
}

/// `sum((u - y)^2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct L2;

impl<D: Dimension> DataFidelity<D> for L2 {
    fn f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<f32> {
        check_shape(u, y)?;
        Ok(Zip::from(u).and(y).fold(0., |acc, &u, &y| acc + (u - y).powi(2)))
    }

    fn grad_f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<Array<f32, D>> {
        check_shape(u, y)?;
        Ok(u - y)
    }

    /// Delegates to the quadratic proximal map of the forward operator.
    fn prox(
        &self,
        x: &Array<f32, D>,
        y: &Array<f32, D>,
        physics: &dyn Physics<D>,
        gamma: f32,
    ) -> Result<Array<f32, D>> {
        physics.prox_l2(x, y, gamma)
    }
}

/// `sum(|u - y|)`
#[derive(Debug, Clone, Copy, Default)]
pub struct L1;

impl<D: Dimension> DataFidelity<D> for L1 {
    fn f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<f32> {
        check_shape(u, y)?;
        Ok(Zip::from(u).and(y).fold(0., |acc, &u, &y| acc + (u - y).abs()))
    }

    /// `sign(u - y)` with `sign(0) = 0`
    fn grad_f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<Array<f32, D>> {
        check_shape(u, y)?;
        Ok(Zip::from(u).and(y).map_collect(|&u, &y| sign(u - y)))
    }

    /// Soft thresholding of `x - y` by `gamma`, shifted back by `y`.
    fn prox_f(&self, x: &Array<f32, D>, y: &Array<f32, D>, gamma: f32) -> Result<Array<f32, D>> {
        check_shape(x, y)?;
        Ok(Zip::from(x).and(y).map_collect(|&x, &y| {
            let d = x - y;
            sign(d) * (d.abs() - gamma).max(0.) + y
        }))
    }
}

/// Poisson negative log-likelihood `sum(u - y * ln(u + bkg))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoissonLikelihood {
    /// Background level added to the intensity.
    pub bkg: f32,
}

impl PoissonLikelihood {
    pub fn new(bkg: f32) -> Self {
        Self { bkg }
    }
}

impl<D: Dimension> DataFidelity<D> for PoissonLikelihood {
    fn f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<f32> {
        check_shape(u, y)?;
        let bkg = self.bkg;
        Ok(Zip::from(u)
            .and(y)
            .fold(0., |acc, &u, &y| acc + u - y * (u + bkg).ln()))
    }

    /// `-y / (u + bkg) + numel(u)`
    fn grad_f(&self, u: &Array<f32, D>, y: &Array<f32, D>) -> Result<Array<f32, D>> {
        check_shape(u, y)?;
        let bkg = self.bkg;
        // the constant is the element count of `u`, not 1
        let numel = u.len() as f32;
        Ok(Zip::from(u).and(y).map_collect(|&u, &y| -y / (u + bkg) + numel))
    }

    /// Positive root of `out^2 - (x - 1/gamma) * out - y/gamma = 0`.
    ///
    /// Unlike the other terms, `gamma` acts as an inverse step here: this is the
    /// proximal map of `f` (with `bkg = 0`) for step `1/gamma`, so a larger
    /// `gamma` stays closer to `x`.
    fn prox_f(&self, x: &Array<f32, D>, y: &Array<f32, D>, gamma: f32) -> Result<Array<f32, D>> {
        check_shape(x, y)?;
        Ok(Zip::from(x).and(y).map_collect(|&x, &y| {
            let b = x - 1. / gamma;
            (b + (b * b + 4. * y / gamma).sqrt()) / 2.
        }))
    }
}

fn sign(v: f32) -> f32 {
    if v > 0. {
        1.
    } else if v < 0. {
        -1.
    } else {
        0.
    }
}
