//! Packed-integer raster images.

use crate::{ConvolveError, ConvolveResult};

/// How channels are packed into each `u32` pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelLayout {
    /// `0x00RRGGBB`, no alpha. The only layout the engine filters.
    #[default]
    IntRgb,
    /// `0xAARRGGBB`.
    IntArgb,
    /// `0x00BBGGRR`.
    IntBgr,
}

impl PixelLayout {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IntRgb => "INT_RGB",
            Self::IntArgb => "INT_ARGB",
            Self::IntBgr => "INT_BGR",
        }
    }
}

/// Packs 8-bit channels into an `IntRgb` pixel.
#[inline]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}

/// Unpacks an `IntRgb` pixel into `(r, g, b)`.
#[inline]
pub fn unpack_rgb(pixel: u32) -> (u8, u8, u8) {
    ((pixel >> 16) as u8, (pixel >> 8) as u8, pixel as u8)
}

/// Row-major raster with one packed `u32` per pixel.
///
/// Invariant: `data.len() == width * height`.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    data: Vec<u32>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl Raster {
    /// Creates a zero-filled `IntRgb` raster.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_layout(width, height, PixelLayout::IntRgb)
    }

    /// Creates a zero-filled raster with the given layout.
    pub fn with_layout(width: u32, height: u32, layout: PixelLayout) -> Self {
        let size = (width as usize) * (height as usize);
        Self { data: vec![0; size], width, height, layout }
    }

    /// Wraps existing pixel data.
    pub fn from_pixels(data: Vec<u32>, width: u32, height: u32, layout: PixelLayout) -> ConvolveResult<Self> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(ConvolveError::InvalidImage(format!(
                "pixel buffer holds {} pixels, {}x{} needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self { data, width, height, layout })
    }

    /// Builds an `IntRgb` raster from interleaved 8-bit RGB bytes.
    pub fn from_rgb8(bytes: &[u8], width: u32, height: u32) -> ConvolveResult<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if bytes.len() != expected {
            return Err(ConvolveError::InvalidImage(format!(
                "expected {} RGB bytes, got {}",
                expected,
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(3)
            .map(|px| pack_rgb(px[0], px[1], px[2]))
            .collect();
        Ok(Self { data, width, height, layout: PixelLayout::IntRgb })
    }

    /// Interleaved 8-bit RGB bytes of an `IntRgb` raster.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 3);
        for &px in &self.data {
            let (r, g, b) = unpack_rgb(px);
            out.extend_from_slice(&[r, g, b]);
        }
        out
    }

    /// A zeroed `IntRgb` raster with the same dimensions.
    pub fn compatible_dest(&self) -> Self {
        Self::new(self.width, self.height)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel packing.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Whether the raster has no pixels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pixel data.
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    /// Mutable pixel data.
    pub fn data_mut(&mut self) -> &mut [u32] {
        &mut self.data
    }

    /// Consumes the raster and returns its pixels.
    pub fn into_pixels(self) -> Vec<u32> {
        self.data
    }

    /// Pixel at `(x, y)`, or `None` outside the raster.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[(y as usize) * (self.width as usize) + x as usize])
    }

    /// Sets the pixel at `(x, y)`. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: u32) {
        if x < self.width && y < self.height {
            let idx = (y as usize) * (self.width as usize) + x as usize;
            self.data[idx] = value;
        }
    }

    /// Size of the pixel data in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * 4
    }
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
