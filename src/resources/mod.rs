//! GPU resources with single ownership.
//!
//! Every type here wraps one or more backend handles and releases them exactly
//! once when dropped. None of them are `Clone`.

mod buffer;
mod geometry;
mod image;
mod mipmap;
mod view;

pub use buffer::Buffer;
pub use geometry::{DynamicGeometryBuffer, GeometryStore};
pub use image::{GpuImage, TransitionInfo, transition_info};
pub use mipmap::MipChainGenerator;
pub use view::{ImageView, Sampler};

/// Alignment applied to geometry store capacities.
pub const GEOMETRY_ALIGNMENT: u64 = 256;

/// Number of mip levels in a full chain for a `width` x `height` image.
///
/// `floor(log2(min(width, height))) + 1`, and 1 for degenerate sizes.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let min = width.min(height);
    if min == 0 {
        return 1;
    }
    32 - min.leading_zeros()
}

/// Align a value up to the given power-of-two alignment.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1024, 1024), 11);
        assert_eq!(mip_level_count(100, 50), 6);
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(7, 4096), 3);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(50000, 256), 50176);
    }
}
