use ndarray::{Array4, Ix4};
use tracing::{debug, trace, warn};

use crate::models::Denoiser;
use crate::optim::{DataFidelity, Optimizer};
use crate::physics::Physics;
use crate::Result;

/// Plug-and-play proximal gradient descent.
///
/// Alternates a gradient step on the fidelity term with a denoising step that
/// stands in for the proximal operator of the prior:
/// `x <- D(x - stepsize * A^T grad_f(A(x), y))`.
pub struct Pgd<'a> {
    fidelity: &'a dyn DataFidelity<Ix4>,
    physics: &'a dyn Physics<Ix4>,
    denoiser: &'a dyn Denoiser,
    y: &'a Array4<f32>,
    x: Array4<f32>,
    stepsize: f32,
    max_iter: usize,
    tol: f32,
}

impl<'a> Pgd<'a> {
    /// Starts from the back-projection `A^T(y)`.
    pub fn new(
        fidelity: &'a dyn DataFidelity<Ix4>,
        physics: &'a dyn Physics<Ix4>,
        denoiser: &'a dyn Denoiser,
        y: &'a Array4<f32>,
    ) -> Result<Self> {
        Ok(Self {
            fidelity,
            physics,
            denoiser,
            y,
            x: physics.a_adjoint(y)?,
            stepsize: 1.,
            max_iter: 100,
            tol: 1e-5,
        })
    }

    pub fn stepsize(mut self, stepsize: f32) -> Self {
        self.stepsize = stepsize;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tol(mut self, tol: f32) -> Self {
        self.tol = tol;
        self
    }

    /// Replaces the current estimate.
    pub fn with_init(mut self, x0: Array4<f32>) -> Result<Self> {
        crate::physics::check_shape(&self.x, &x0)?;
        self.x = x0;
        Ok(self)
    }

    pub fn estimate(&self) -> &Array4<f32> {
        &self.x
    }

    pub fn into_estimate(self) -> Array4<f32> {
        self.x
    }

    /// Iterates until the relative change drops below `tol` or `max_iter`
    /// iterations ran. Returns the number of iterations performed.
    pub fn run(&mut self) -> Result<usize> {
        for it in 1..=self.max_iter {
            let rel = self.step()?;
            trace!(it, rel, "pgd iteration");
            if rel < self.tol {
                debug!(it, rel, "pgd converged");
                return Ok(it);
            }
        }
        warn!(max_iter = self.max_iter, "pgd stopped before converging");
        Ok(self.max_iter)
    }
}

impl<'a> Optimizer for Pgd<'a> {
    fn step(&mut self) -> Result<f32> {
        let grad = self.fidelity.grad(&self.x, self.y, self.physics)?;
        let z = &self.x - &(self.physics.a_adjoint(&grad)? * self.stepsize);
        let x = self.denoiser.denoise(&z)?;
        crate::physics::check_shape(&self.x, &x)?;

        let norm = self.x.mapv(|v| v * v).sum().sqrt();
        let diff = (&x - &self.x).mapv(|v| v * v).sum().sqrt();
        self.x = x;
        Ok(diff / norm.max(f32::EPSILON))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{CustomFidelity, L2};
    use crate::physics::{Denoising, Inpainting};
    use crate::Error;
    use ndarray::Zip;
    use ndarray_rand::{rand_distr::Uniform, RandomExt};

    fn identity(x: &Array4<f32>) -> Result<Array4<f32>> {
        Ok(x.clone())
    }

    fn assert_close(a: &Array4<f32>, b: &Array4<f32>, eps: f32) {
        Zip::from(a).and(b).for_each(|&a, &b| {
            assert!((a - b).abs() <= eps, "{} != {}", a, b);
        });
    }

    #[test]
    fn gradient_descent_converges_to_measurement() {
        let y = Array4::<f32>::random((1, 1, 8, 8), Uniform::new(0., 1.));
        let denoiser = identity;
        let mut pgd = Pgd::new(&L2, &Denoising, &denoiser, &y)
            .unwrap()
            .stepsize(0.5)
            .max_iter(500)
            .tol(1e-7)
            .with_init(Array4::ones((1, 1, 8, 8)))
            .unwrap();
        let iters = pgd.run().unwrap();
        assert!(iters < 500);
        assert_close(pgd.estimate(), &y, 1e-4);
    }

    #[test]
    fn inpainting_only_updates_observed_pixels() {
        let mask = Array4::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| ((i + j) % 2) as f32);
        let physics = Inpainting::new(mask.clone());
        let y = physics
            .a(&Array4::<f32>::random((1, 1, 4, 4), Uniform::new(0., 1.)))
            .unwrap();
        let x0 = Array4::<f32>::from_elem((1, 1, 4, 4), 0.5);
        let denoiser = identity;
        let mut pgd = Pgd::new(&L2, &physics, &denoiser, &y)
            .unwrap()
            .stepsize(1.)
            .with_init(x0)
            .unwrap();
        pgd.run().unwrap();

        Zip::from(pgd.estimate())
            .and(&mask)
            .and(&y)
            .for_each(|&x, &m, &y| {
                if m == 1. {
                    assert!((x - y).abs() < 1e-5);
                } else {
                    assert_eq!(x, 0.5);
                }
            });
    }

    #[test]
    fn contractive_denoiser_reaches_fixed_point() {
        // x = 0.5 * (x - (x - y)) has the fixed point y / 2 for stepsize 1
        let y = Array4::<f32>::random((2, 1, 3, 3), Uniform::new(1., 2.));
        let halve = |x: &Array4<f32>| -> Result<Array4<f32>> { Ok(x * 0.5) };
        let mut pgd = Pgd::new(&L2, &Denoising, &halve, &y).unwrap().tol(1e-7);
        pgd.run().unwrap();
        assert_close(&pgd.into_estimate(), &(&y * 0.5), 1e-5);
    }

    #[test]
    fn starts_from_back_projection_unless_initialized() {
        let mask = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, i, _)| (i % 2) as f32);
        let physics = Inpainting::new(mask);
        let y = Array4::<f32>::from_elem((1, 1, 3, 3), 2.);
        let denoiser = identity;
        let pgd = Pgd::new(&L2, &physics, &denoiser, &y).unwrap();
        assert_eq!(pgd.estimate(), &physics.a_adjoint(&y).unwrap());

        let mut pgd = pgd.max_iter(3).tol(0.);
        assert_eq!(pgd.run().unwrap(), 3);

        let pgd = Pgd::new(&L2, &physics, &denoiser, &y).unwrap();
        assert!(matches!(
            pgd.with_init(Array4::zeros((1, 1, 2, 2))),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn missing_gradient_propagates() {
        let y = Array4::<f32>::ones((1, 1, 2, 2));
        let fidelity = CustomFidelity::<Ix4>::new();
        let denoiser = identity;
        let mut pgd = Pgd::new(&fidelity, &Denoising, &denoiser, &y).unwrap();
        assert!(matches!(pgd.run(), Err(Error::NoGradient)));
    }
}
