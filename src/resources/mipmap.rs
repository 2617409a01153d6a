//! Mip chain generation by iterative 2x downsampling.

use crate::backend::{CommandBufferHandle, GpuBackend, MipBlit};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{FilterMode, ImageLayout, ImageUsage};

use super::GpuImage;

/// Records the blits and barriers that fill mip levels `1..N` from level 0.
///
/// Expects every level of the image in `TransferDst` with level 0 holding
/// data. Leaves every level in `ShaderReadOnly`:
///
/// 1. For each level `i` in `1..N`, level `i - 1` goes `TransferDst -> TransferSrc`
///    and is blitted into level `i` at half size (at least one pixel).
/// 2. Level `N - 1` goes `TransferDst -> TransferSrc`.
/// 3. One barrier moves all levels `TransferSrc -> ShaderReadOnly`.
///
/// Level `i` already is `TransferDst` when it is written, so no barrier is
/// recorded for the destination side of a blit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipChainGenerator {
    filter: FilterMode,
}

impl Default for MipChainGenerator {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
        }
    }
}

impl MipChainGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different downsampling filter.
    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    /// Record the mip chain for `image` into `command_buffer`.
    pub fn generate(
        &self,
        backend: &dyn GpuBackend,
        command_buffer: CommandBufferHandle,
        image: &mut GpuImage,
    ) -> GraphicsResult<()> {
        let level_count = image.mip_level_count();
        if image.layout() != Some(ImageLayout::TransferDst) {
            return Err(GraphicsError::ResourceMisuse(format!(
                "mip generation needs image {:?} in TransferDst, levels are {:?}",
                image.label(),
                (0..level_count)
                    .filter_map(|l| image.mip_layout(l))
                    .collect::<Vec<_>>()
            )));
        }
        if level_count > 1 && !image.usage().contains(ImageUsage::COPY_SRC) {
            return Err(GraphicsError::ResourceMisuse(format!(
                "image {:?} needs COPY_SRC usage to generate mips",
                image.label()
            )));
        }

        let extent = image.extent();
        for level in 1..level_count {
            image.transition(
                command_buffer,
                ImageLayout::TransferDst,
                ImageLayout::TransferSrc,
                image.mip_range(level - 1, 1),
            )?;
            backend.cmd_blit_image(
                command_buffer,
                image.handle(),
                &MipBlit {
                    src_level: level - 1,
                    src_extent: extent.mip_level_size(level - 1),
                    dst_level: level,
                    dst_extent: extent.mip_level_size(level),
                    filter: self.filter,
                },
            );
        }

        image.transition(
            command_buffer,
            ImageLayout::TransferDst,
            ImageLayout::TransferSrc,
            image.mip_range(level_count - 1, 1),
        )?;
        image.transition(
            command_buffer,
            ImageLayout::TransferSrc,
            ImageLayout::ShaderReadOnly,
            image.full_range(),
        )?;

        log::trace!(
            "Recorded {} mip blits for image {:?}",
            level_count - 1,
            image.label()
        );
        Ok(())
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::resources::mip_level_count;
    use crate::types::{Extent2d, ImageDescriptor, ImageFormat};

    fn record_chain(width: u32, height: u32) -> (Vec<RecordedCommand>, GpuImage) {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let cmd = backend.allocate_command_buffer().unwrap();
        backend.begin_command_buffer(cmd).unwrap();

        let levels = mip_level_count(width, height);
        let desc = ImageDescriptor::new_2d(
            width,
            height,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST | ImageUsage::COPY_SRC,
        )
        .with_mip_level_count(levels);
        let mut image = GpuImage::new(&backend, &desc).unwrap();
        image.transition_to(cmd, ImageLayout::TransferDst).unwrap();

        MipChainGenerator::new()
            .generate(backend.as_ref(), cmd, &mut image)
            .unwrap();
        (dummy.recorded_commands(cmd), image)
    }

    #[test]
    fn test_single_level_is_pass_through() {
        let (commands, image) = record_chain(1, 1);

        assert!(
            !commands
                .iter()
                .any(|c| matches!(c, RecordedCommand::BlitImage { .. }))
        );
        assert_eq!(image.layout(), Some(ImageLayout::ShaderReadOnly));
    }

    #[test]
    fn test_blit_sizes_halve_down_to_one() {
        let (commands, image) = record_chain(100, 50);
        let blits: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BlitImage { blit, .. } => Some(*blit),
                _ => None,
            })
            .collect();

        assert_eq!(image.mip_level_count(), 6);
        assert_eq!(blits.len(), 5);
        assert_eq!(blits[0].src_extent, Extent2d::new(100, 50));
        assert_eq!(blits[0].dst_extent, Extent2d::new(50, 25));
        assert_eq!(blits[4].dst_extent, Extent2d::new(3, 1));
        assert!(blits.iter().all(|b| b.filter == FilterMode::Linear));
    }

    #[test]
    fn test_source_level_readable_before_each_blit() {
        let (commands, _image) = record_chain(64, 64);
        for (i, command) in commands.iter().enumerate() {
            if let RecordedCommand::BlitImage { blit, .. } = command {
                let RecordedCommand::ImageBarrier(barrier) = &commands[i - 1] else {
                    panic!("blit not preceded by a barrier");
                };
                assert_eq!(barrier.new_layout, ImageLayout::TransferSrc);
                assert!(barrier.range.contains_mip(blit.src_level));
            }
        }
    }

    #[test]
    fn test_requires_transfer_dst() {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let cmd = backend.allocate_command_buffer().unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        let desc = ImageDescriptor::new_2d(
            8,
            8,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST | ImageUsage::COPY_SRC,
        )
        .with_mip_level_count(4);
        let mut image = GpuImage::new(&backend, &desc).unwrap();

        let result = MipChainGenerator::new().generate(backend.as_ref(), cmd, &mut image);
        assert!(matches!(result, Err(GraphicsError::ResourceMisuse(_))));
    }
}
