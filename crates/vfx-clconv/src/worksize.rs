//! NDRange work-size computation.
//!
//! The local (work-group) size is the mask size, and the global size is
//! each image extent rounded up to a multiple of it. Work items that land in
//! the padding beyond the image must no-op; the shipped kernel guards
//! `gx < width && gy < height`.

/// Smallest multiple of `tile` that is not smaller than `extent`.
///
/// Returns `extent` unchanged when it is already a multiple of `tile`,
/// otherwise the unique multiple in `(extent, extent + tile)`.
///
/// # Panics
///
/// Panics if `tile` is zero.
///
/// # Example
///
/// ```rust
/// use vfx_clconv::worksize::round_up;
///
/// assert_eq!(round_up(16, 100), 112);
/// assert_eq!(round_up(16, 128), 128);
/// assert_eq!(round_up(3, 7), 9);
/// ```
#[inline]
pub fn round_up(tile: usize, extent: usize) -> usize {
    assert!(tile > 0, "work-group size must be non-zero");
    let r = extent % tile;
    if r == 0 { extent } else { extent + tile - r }
}

/// Global and local sizes for a 2-D dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    /// Total grid size `[x, y]`.
    pub global: [usize; 2],
    /// Work-group size `[x, y]`.
    pub local: [usize; 2],
}

impl WorkSize {
    /// Work sizes for convolving a `image` sized raster with a `mask` sized mask.
    ///
    /// Both arguments are `(width, height)`. Mask dimensions must be non-zero.
    pub fn for_dispatch(mask: (u32, u32), image: (u32, u32)) -> Self {
        let local = [mask.0 as usize, mask.1 as usize];
        let global = [
            round_up(local[0], image.0 as usize),
            round_up(local[1], image.1 as usize),
        ];
        Self { global, local }
    }

    /// Number of work items in the grid.
    pub fn global_items(&self) -> usize {
        self.global[0] * self.global[1]
    }

    /// Number of work items per group.
    pub fn group_items(&self) -> usize {
        self.local[0] * self.local[1]
    }

    /// Work groups along each axis.
    pub fn groups(&self) -> [usize; 2] {
        [self.global[0] / self.local[0], self.global[1] / self.local[1]]
    }

    /// Whether the grid fully covers a `width` x `height` image.
    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.global[0] >= width as usize && self.global[1] >= height as usize
    }
}
