//! Convolution masks.
//!
//! A mask is a small grid of weights plus an anchor (origin) cell. The
//! origin selects which mask cell sits over the output pixel.
//!
//! # Factories
//!
//! - [`ConvolutionMask::identity`] - 1x1 pass-through
//! - [`ConvolutionMask::box_blur`] - Simple average blur
//! - [`ConvolutionMask::gaussian`] - Gaussian blur (smooth)
//! - [`ConvolutionMask::sharpen`] - Unsharp masking
//! - [`ConvolutionMask::edge_detect`] - Laplacian edges
//!
//! # Example
//!
//! ```rust
//! use vfx_clconv::ConvolutionMask;
//!
//! let mask = ConvolutionMask::gaussian(5, 1.5);
//! assert_eq!(mask.origin(), (2, 2));
//! ```

use crate::{ConvolveError, ConvolveResult};

/// Immutable convolution mask with row-major `f32` weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionMask {
    weights: Vec<f32>,
    width: u32,
    height: u32,
    origin_x: u32,
    origin_y: u32,
}

impl ConvolutionMask {
    /// Creates a mask from weights and an explicit origin.
    pub fn new(weights: Vec<f32>, width: u32, height: u32, origin_x: u32, origin_y: u32) -> ConvolveResult<Self> {
        if width == 0 || height == 0 {
            return Err(ConvolveError::InvalidMask(format!(
                "mask dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = (width as usize) * (height as usize);
        if weights.len() != expected {
            return Err(ConvolveError::InvalidMask(format!(
                "mask data size {} doesn't match {}x{}",
                weights.len(),
                width,
                height
            )));
        }
        if origin_x >= width || origin_y >= height {
            return Err(ConvolveError::InvalidMask(format!(
                "origin ({}, {}) lies outside {}x{} mask",
                origin_x, origin_y, width, height
            )));
        }
        Ok(Self { weights, width, height, origin_x, origin_y })
    }

    /// Creates a mask anchored at its center cell.
    pub fn centered(weights: Vec<f32>, width: u32, height: u32) -> ConvolveResult<Self> {
        Self::new(weights, width, height, width / 2, height / 2)
    }

    /// 1x1 mask with weight 1, origin (0, 0).
    pub fn identity() -> Self {
        Self::square(vec![1.0], 1)
    }

    /// Box blur (simple average). Even sizes are bumped to the next odd.
    pub fn box_blur(size: u32) -> Self {
        let size = odd(size);
        let count = (size * size) as usize;
        Self::square(vec![1.0 / count as f32; count], size)
    }

    /// Normalized Gaussian blur, built as the outer product of a sampled
    /// 1-D Gaussian with itself.
    ///
    /// # Arguments
    ///
    /// * `size` - Mask size (will be made odd)
    /// * `sigma` - Standard deviation (blur amount)
    pub fn gaussian(size: u32, sigma: f32) -> Self {
        let size = odd(size);
        let half = (size / 2) as i32;
        let denom = 2.0 * sigma * sigma;

        let mut taps: Vec<f32> = (-half..=half).map(|i| (-((i * i) as f32) / denom).exp()).collect();
        let total: f32 = taps.iter().sum();
        taps.iter_mut().for_each(|t| *t /= total);

        let data = taps.iter().flat_map(|&row| taps.iter().map(move |&col| row * col)).collect();
        Self::square(data, size)
    }

    /// 3x3 sharpening mask. `amount` of 0.5-2.0 is typical.
    pub fn sharpen(amount: f32) -> Self {
        Self::cross(1.0 + 4.0 * amount, -amount)
    }

    /// 3x3 Laplacian edge detector.
    pub fn edge_detect() -> Self {
        Self::cross(4.0, -1.0)
    }

    /// 3x3 emboss, lit from the top left.
    pub fn emboss() -> Self {
        #[rustfmt::skip]
        let weights = vec![
            -2.0, -1.0, 0.0,
            -1.0,  1.0, 1.0,
             0.0,  1.0, 2.0,
        ];
        Self::square(weights, 3)
    }

    // 3x3 with `center` in the middle, `arm` on the four direct neighbours
    // and zero corners.
    fn cross(center: f32, arm: f32) -> Self {
        let mut weights = vec![0.0; 9];
        weights[4] = center;
        for i in [1, 3, 5, 7] {
            weights[i] = arm;
        }
        Self::square(weights, 3)
    }

    // Odd square anchored at its center; callers guarantee the weight count.
    fn square(weights: Vec<f32>, size: u32) -> Self {
        debug_assert_eq!(weights.len(), (size * size) as usize);
        Self {
            weights,
            width: size,
            height: size,
            origin_x: size / 2,
            origin_y: size / 2,
        }
    }

    /// Mask width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mask height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Anchor cell `(x, y)`.
    pub fn origin(&self) -> (u32, u32) {
        (self.origin_x, self.origin_y)
    }

    /// Row-major weights.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Weight at mask cell `(x, y)`.
    pub fn weight(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.weights[(y * self.width + x) as usize])
    }

    /// Sum of all weights (1.0 for normalized blurs).
    pub fn sum(&self) -> f32 {
        self.weights.iter().sum()
    }
}

#[inline]
fn odd(size: u32) -> u32 {
    if size % 2 == 0 { size + 1 } else { size }
}
