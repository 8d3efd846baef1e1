//! Host definition of the convolution kernel.
//!
//! Mirrors `kernels/convolution.cl` work item for work item: each of the
//! four byte lanes of a pixel is accumulated as `f32`, truncated toward
//! zero and saturated to `0..=255`. Pixels whose mask window would leave the
//! image are copied through.

use rayon::prelude::*;
use tracing::trace;

use crate::mask::ConvolutionMask;
use crate::raster::Raster;

/// Convolves `src` with `mask` on the host.
///
/// # Example
///
/// ```rust
/// use vfx_clconv::{reference, ConvolutionMask, Raster};
///
/// let src = Raster::new(8, 8);
/// let out = reference::convolve(&src, &ConvolutionMask::box_blur(3));
/// assert_eq!(out.dimensions(), (8, 8));
/// ```
pub fn convolve(src: &Raster, mask: &ConvolutionMask) -> Raster {
    let (width, height) = src.dimensions();
    trace!(width, height, mask_w = mask.width(), mask_h = mask.height(), "reference::convolve");

    let mut out = Raster::with_layout(width, height, src.layout());
    if src.is_empty() {
        return out;
    }

    let image_size = [width as i32, height as i32];
    let mask_size = [mask.width() as i32, mask.height() as i32];
    let (ox, oy) = mask.origin();
    let origin = [ox as i32, oy as i32];
    let pixels = src.data();
    let weights = mask.weights();

    out.data_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(gy, row)| {
            for (gx, px) in row.iter_mut().enumerate() {
                *px = convolve_pixel(pixels, image_size, weights, mask_size, origin, gx as i32, gy as i32);
            }
        });

    out
}

/// Output value of the work item at `(gx, gy)`.
///
/// `(gx, gy)` must lie inside the image.
pub(crate) fn convolve_pixel(
    pixels: &[u32],
    image_size: [i32; 2],
    weights: &[f32],
    mask_size: [i32; 2],
    origin: [i32; 2],
    gx: i32,
    gy: i32,
) -> u32 {
    let [w, h] = image_size;
    let index = (gy as usize) * (w as usize) + gx as usize;

    let inside = gx >= origin[0]
        && gy >= origin[1]
        && gx < w - (mask_size[0] - origin[0] - 1)
        && gy < h - (mask_size[1] - origin[1] - 1);
    if !inside {
        return pixels[index];
    }

    let mut sum = [0.0f32; 4];
    for my in 0..mask_size[1] {
        let row = ((gy - origin[1] + my) as usize) * (w as usize);
        for mx in 0..mask_size[0] {
            let p = pixels[row + (gx - origin[0] + mx) as usize];
            let weight = weights[(my * mask_size[0] + mx) as usize];
            for (lane, s) in sum.iter_mut().enumerate() {
                *s += ((p >> (8 * lane)) & 0xFF) as f32 * weight;
            }
        }
    }
    pack_lanes(sum)
}

// Float-to-int `as` casts truncate and saturate, matching convert_uchar4_sat.
#[inline]
fn pack_lanes(sum: [f32; 4]) -> u32 {
    sum.iter()
        .enumerate()
        .fold(0u32, |acc, (lane, &v)| acc | ((v as u8 as u32) << (8 * lane)))
}
