use rayon::prelude::*;
use ndarray::{s, Array, Array1, Array2, Array4, Array5, ArrayView3, Axis, Dimension, ShapeError};

use crate::{Error, Result};

/// Stride-1 2-D convolution of an `(N, C, H, W)` batch with an `(O, C, K, K)` kernel.
///
/// Zero padding of `padding` pixels is applied on every side, so `padding = K / 2`
/// with an odd `K` keeps the spatial size. The batch is processed in parallel.
pub fn conv2d(
    x: &Array4<f32>,
    weight: &Array4<f32>,
    bias: Option<&Array1<f32>>,
    padding: usize,
) -> Result<Array4<f32>> {
    let (n, c, h, w) = x.dim();
    let (o, wc, kh, kw) = weight.dim();
    if wc != c {
        return Err(Error::shape_mismatch(&[o, c, kh, kw], weight.shape()));
    }
    if let Some(b) = bias {
        if b.len() != o {
            return Err(Error::shape_mismatch(&[o], b.shape()));
        }
    }
    let (h_out, w_out) = match (
        (h + 2 * padding + 1).checked_sub(kh),
        (w + 2 * padding + 1).checked_sub(kw),
    ) {
        (Some(h_out), Some(w_out)) if h_out > 0 && w_out > 0 => (h_out, w_out),
        _ => {
            return Err(Error::InvalidConfig(format!(
                "kernel {}x{} does not fit a {}x{} input with padding {}",
                kh, kw, h, w, padding
            )))
        }
    };

    let kernel = weight.as_standard_layout();
    let kernel = kernel.view().into_shape((o, c * kh * kw))?;

    let mut out = Array4::<f32>::zeros((n, o, h_out, w_out));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(x.axis_iter(Axis(0)).into_par_iter())
        .try_for_each(|(mut dst, src)| -> std::result::Result<(), ShapeError> {
            let cols = im2col(src, (kh, kw), padding, (h_out, w_out))?;
            let mut res = kernel.dot(&cols);
            if let Some(b) = bias {
                res += &b.view().insert_axis(Axis(1));
            }
            dst.assign(&res.into_shape((o, h_out, w_out))?);
            Ok(())
        })?;
    Ok(out)
}

/// Unrolls every receptive field of a `(C, H, W)` image into a column of a
/// `(C * KH * KW, H_out * W_out)` matrix. Out-of-bounds taps stay zero.
fn im2col(
    x: ArrayView3<f32>,
    (kh, kw): (usize, usize),
    padding: usize,
    (h_out, w_out): (usize, usize),
) -> std::result::Result<Array2<f32>, ShapeError> {
    let (c, h, w) = x.dim();
    let mut cols = Array5::<f32>::zeros((c, kh, kw, h_out, w_out));
    for ki in 0..kh {
        let (r0, r1) = valid_range(ki, padding, h, h_out);
        if r0 >= r1 {
            continue;
        }
        for kj in 0..kw {
            let (c0, c1) = valid_range(kj, padding, w, w_out);
            if c0 >= c1 {
                continue;
            }
            cols.slice_mut(s![.., ki, kj, r0..r1, c0..c1]).assign(&x.slice(s![
                ..,
                r0 + ki - padding..r1 + ki - padding,
                c0 + kj - padding..c1 + kj - padding
            ]));
        }
    }
    cols.into_shape((c * kh * kw, h_out * w_out))
}

/// Output positions `p` in `0..out` whose input tap `p + k - padding` lies in `0..len`.
fn valid_range(k: usize, padding: usize, len: usize, out: usize) -> (usize, usize) {
    let lo = padding.saturating_sub(k);
    let hi = (len + padding).saturating_sub(k).min(out);
    (lo, hi)
}

/// `max(x, 0)` for every element
pub fn relu<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| v.max(0.))
}

/// Elementwise `a + b` for arrays of identical shape
pub fn add<D: Dimension>(a: &Array<f32, D>, b: &Array<f32, D>) -> Result<Array<f32, D>> {
    if a.shape() != b.shape() {
        return Err(Error::shape_mismatch(a.shape(), b.shape()));
    }
    Ok(a + b)
}
