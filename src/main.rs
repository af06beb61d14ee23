use ndarray::{Array4, Zip};
use ndarray_rand::{rand_distr::Normal, RandomExt};
use proxinv::models::{registry, registry::DNCNN, DenoiserConfig};
use proxinv::optim::{DataFidelity, Pgd, L2};
use proxinv::physics::{Denoising, Inpainting, Physics};
use std::error::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

// smooth synthetic test image in [0, 1]
fn phantom(h: usize, w: usize) -> Array4<f32> {
    Array4::from_shape_fn((1, 1, h, w), |(_, _, i, j)| {
        let (u, v) = (i as f32 / h as f32, j as f32 / w as f32);
        0.5 + 0.25 * (6. * u).sin() * (4. * v).cos()
    })
}

fn psnr(a: &Array4<f32>, b: &Array4<f32>) -> f32 {
    let mse = Zip::from(a)
        .and(b)
        .fold(0., |acc, &a, &b| acc + (a - b).powi(2))
        / a.len() as f32;
    -10. * mse.max(f32::EPSILON).log10()
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = DenoiserConfig::default().depth(8).nf(16);
    if let Some(path) = std::env::args().nth(1) {
        config = config.pretrained(path);
    }
    let denoiser = registry().create(DNCNN, &config)?;

    let clean = phantom(32, 32);
    let noisy = &clean + &Array4::random(clean.raw_dim(), Normal::new(0., 0.1)?);
    let denoised = denoiser.denoise(&noisy)?;
    info!(
        noisy = psnr(&noisy, &clean),
        denoised = psnr(&denoised, &clean),
        "dncnn denoising"
    );

    let data_fit = L2.value(&denoised, &noisy, &Denoising)?;
    info!(data_fit, "l2 fidelity of the denoised image");

    let mask = Array4::from_shape_fn(clean.raw_dim(), |(_, _, i, j)| {
        ((i * 7 + j * 3) % 4 != 0) as u8 as f32
    });
    let physics = Inpainting::new(mask);
    let y = physics.a(&noisy)?;
    let mut pgd = Pgd::new(&L2, &physics, denoiser.as_ref(), &y)?
        .stepsize(1.)
        .max_iter(50);
    let iters = pgd.run()?;
    info!(iters, psnr = psnr(pgd.estimate(), &clean), "pnp-pgd inpainting");
    Ok(())
}
