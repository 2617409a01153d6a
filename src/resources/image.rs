//! GPU image ownership and layout tracking.
//!
//! A [`GpuImage`] remembers the layout each mip level was left in by the last
//! *recorded* transition. This is CPU-side intent: the GPU applies the
//! transition later, when the command buffer executes.
//!
//! Transitions are looked up in a fixed table ([`transition_info`]) that
//! yields the access masks and pipeline stages of the barrier. Pairs missing
//! from the table are programmer errors.

use std::sync::Arc;

use crate::backend::{CommandBufferHandle, GpuBackend, ImageBarrier, ImageHandle};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    AccessFlags, Extent2d, ImageDescriptor, ImageFormat, ImageLayout, ImageUsage, PipelineStages,
    SubresourceRange,
};

/// Synchronization scopes of a layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionInfo {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub src_stage: PipelineStages,
    pub dst_stage: PipelineStages,
}

impl TransitionInfo {
    const fn new(
        src_access: AccessFlags,
        dst_access: AccessFlags,
        src_stage: PipelineStages,
        dst_stage: PipelineStages,
    ) -> Self {
        Self {
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        }
    }
}

/// Look up the barrier for a layout transition. `None` for unmodeled pairs.
pub fn transition_info(old: ImageLayout, new: ImageLayout) -> Option<TransitionInfo> {
    use ImageLayout::*;

    let info = match (old, new) {
        (Undefined, TransferDst) => TransitionInfo::new(
            AccessFlags::empty(),
            AccessFlags::TRANSFER_WRITE,
            PipelineStages::TOP_OF_PIPE,
            PipelineStages::TRANSFER,
        ),
        (TransferDst, ShaderReadOnly) => TransitionInfo::new(
            AccessFlags::TRANSFER_WRITE,
            AccessFlags::SHADER_READ,
            PipelineStages::TRANSFER,
            PipelineStages::FRAGMENT_SHADER,
        ),
        (TransferDst, TransferSrc) => TransitionInfo::new(
            AccessFlags::TRANSFER_WRITE,
            AccessFlags::TRANSFER_READ,
            PipelineStages::TRANSFER,
            PipelineStages::TRANSFER,
        ),
        (TransferSrc, ShaderReadOnly) => TransitionInfo::new(
            AccessFlags::TRANSFER_READ,
            AccessFlags::SHADER_READ,
            PipelineStages::TRANSFER,
            PipelineStages::FRAGMENT_SHADER,
        ),
        (ShaderReadOnly, TransferDst) => TransitionInfo::new(
            AccessFlags::SHADER_READ,
            AccessFlags::TRANSFER_WRITE,
            PipelineStages::FRAGMENT_SHADER,
            PipelineStages::TRANSFER,
        ),
        (Undefined, ColorAttachment) => TransitionInfo::new(
            AccessFlags::empty(),
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            PipelineStages::TOP_OF_PIPE,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        ),
        (ColorAttachment, ShaderReadOnly) => TransitionInfo::new(
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            AccessFlags::SHADER_READ,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            PipelineStages::FRAGMENT_SHADER,
        ),
        (ColorAttachment, PresentSrc) => TransitionInfo::new(
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            AccessFlags::empty(),
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            PipelineStages::BOTTOM_OF_PIPE,
        ),
        // The acquire semaphore is waited on at color attachment output.
        (PresentSrc, ColorAttachment) => TransitionInfo::new(
            AccessFlags::empty(),
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        ),
        _ => return None,
    };
    Some(info)
}

/// A device-memory-backed 2D image.
///
/// Images created with [`GpuImage::new`] own their memory and destroy it on
/// drop. Swapchain images are wrapped with [`GpuImage::from_swapchain`] and
/// are released together with their swapchain instead.
pub struct GpuImage {
    backend: Arc<dyn GpuBackend>,
    handle: ImageHandle,
    label: Option<String>,
    extent: Extent2d,
    format: ImageFormat,
    usage: ImageUsage,
    array_layer_count: u32,
    /// Layout of each mip level as of the last recorded transition.
    levels: Vec<ImageLayout>,
    owned: bool,
}

impl GpuImage {
    /// Create an image in `Undefined` layout.
    pub fn new(backend: &Arc<dyn GpuBackend>, descriptor: &ImageDescriptor) -> GraphicsResult<Self> {
        descriptor.validate()?;
        let handle = backend.create_image(descriptor)?;
        log::trace!(
            "Created image {:?} ({}x{}, {} mips)",
            descriptor.label,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.mip_level_count
        );
        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            label: descriptor.label.clone(),
            extent: descriptor.extent,
            format: descriptor.format,
            usage: descriptor.usage,
            array_layer_count: descriptor.array_layer_count,
            levels: vec![ImageLayout::Undefined; descriptor.mip_level_count as usize],
            owned: true,
        })
    }

    /// Wrap an image owned by a swapchain.
    pub fn from_swapchain(
        backend: &Arc<dyn GpuBackend>,
        handle: ImageHandle,
        extent: Extent2d,
        format: ImageFormat,
    ) -> Self {
        Self {
            backend: Arc::clone(backend),
            handle,
            label: Some("swapchain".to_string()),
            extent,
            format,
            usage: ImageUsage::COLOR_ATTACHMENT,
            array_layer_count: 1,
            levels: vec![ImageLayout::Undefined],
            owned: false,
        }
    }

    /// Record a layout transition of `range` from `old` to `new`.
    ///
    /// `old` must match the tracked layout of every level in the range, or be
    /// `Undefined` to discard the contents. Transition pairs missing from
    /// [`transition_info`] panic in debug builds; release builds record
    /// nothing and return [`GraphicsError::ResourceMisuse`].
    pub fn transition(
        &mut self,
        command_buffer: CommandBufferHandle,
        old: ImageLayout,
        new: ImageLayout,
        range: SubresourceRange,
    ) -> GraphicsResult<()> {
        let Some(info) = transition_info(old, new) else {
            let message = format!(
                "unmodeled layout transition {old:?} -> {new:?} on image {:?}",
                self.label
            );
            if cfg!(debug_assertions) {
                panic!("{message}");
            }
            log::error!("{message}");
            return Err(GraphicsError::ResourceMisuse(message));
        };

        let end = range.base_mip_level as usize + range.level_count as usize;
        if range.level_count == 0 || end > self.levels.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "mip range {}..{end} outside image with {} levels",
                range.base_mip_level,
                self.levels.len()
            )));
        }
        if old != ImageLayout::Undefined {
            let mismatch = self.levels[range.base_mip_level as usize..end]
                .iter()
                .position(|layout| *layout != old);
            if let Some(level) = mismatch {
                let level = range.base_mip_level as usize + level;
                return Err(GraphicsError::ResourceMisuse(format!(
                    "transition from {old:?} but mip {level} of image {:?} is {:?}",
                    self.label, self.levels[level]
                )));
            }
        }

        self.backend.cmd_image_barrier(
            command_buffer,
            &ImageBarrier {
                image: self.handle,
                range,
                old_layout: old,
                new_layout: new,
                src_access: info.src_access,
                dst_access: info.dst_access,
                src_stage: info.src_stage,
                dst_stage: info.dst_stage,
            },
        );
        for level in &mut self.levels[range.base_mip_level as usize..end] {
            *level = new;
        }
        Ok(())
    }

    /// Record a whole-image transition from the current layout to `new`.
    pub fn transition_to(
        &mut self,
        command_buffer: CommandBufferHandle,
        new: ImageLayout,
    ) -> GraphicsResult<()> {
        let old = self.layout().ok_or_else(|| {
            GraphicsError::ResourceMisuse(format!(
                "image {:?} has mip levels in different layouts",
                self.label
            ))
        })?;
        self.transition(command_buffer, old, new, self.full_range())
    }

    /// Note a transition performed implicitly by a render pass.
    pub(crate) fn assume_layout(&mut self, layout: ImageLayout) {
        self.levels.fill(layout);
    }

    /// Layout of the whole image, or `None` if mip levels differ.
    pub fn layout(&self) -> Option<ImageLayout> {
        let first = self.levels[0];
        self.levels.iter().all(|l| *l == first).then_some(first)
    }

    /// Layout of one mip level.
    pub fn mip_layout(&self, level: u32) -> Option<ImageLayout> {
        self.levels.get(level as usize).copied()
    }

    /// Range covering every level and layer.
    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange::whole(self.mip_level_count(), self.array_layer_count)
    }

    /// Range covering a run of mip levels on every layer.
    pub fn mip_range(&self, base: u32, count: u32) -> SubresourceRange {
        SubresourceRange {
            base_mip_level: base,
            level_count: count,
            base_array_layer: 0,
            layer_count: self.array_layer_count,
        }
    }

    pub fn handle(&self) -> ImageHandle {
        self.handle
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    pub fn mip_level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn array_layer_count(&self) -> u32 {
        self.array_layer_count
    }
}

impl std::fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuImage")
            .field("handle", &self.handle)
            .field("label", &self.label)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("levels", &self.levels)
            .field("owned", &self.owned)
            .finish()
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        if self.owned {
            self.backend.destroy_image(self.handle);
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};

    fn setup() -> (Arc<DummyBackend>, Arc<dyn GpuBackend>, CommandBufferHandle) {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let cmd = backend.allocate_command_buffer().unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        (dummy, backend, cmd)
    }

    fn sampled_image(backend: &Arc<dyn GpuBackend>, mips: u32) -> GpuImage {
        let desc = ImageDescriptor::new_2d(
            64,
            64,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST | ImageUsage::COPY_SRC,
        )
        .with_mip_level_count(mips);
        GpuImage::new(backend, &desc).unwrap()
    }

    #[test]
    fn test_every_modeled_pair_has_info() {
        use ImageLayout::*;
        let pairs = [
            (Undefined, TransferDst),
            (TransferDst, ShaderReadOnly),
            (TransferDst, TransferSrc),
            (TransferSrc, ShaderReadOnly),
            (ShaderReadOnly, TransferDst),
            (Undefined, ColorAttachment),
            (ColorAttachment, ShaderReadOnly),
            (ColorAttachment, PresentSrc),
            (PresentSrc, ColorAttachment),
        ];
        for (old, new) in pairs {
            assert!(transition_info(old, new).is_some(), "{old:?} -> {new:?}");
        }
        assert!(transition_info(ShaderReadOnly, PresentSrc).is_none());
        assert!(transition_info(TransferSrc, TransferDst).is_none());
    }

    #[test]
    fn test_transition_records_one_barrier() {
        let (dummy, backend, cmd) = setup();
        let mut image = sampled_image(&backend, 1);

        image
            .transition(
                cmd,
                ImageLayout::Undefined,
                ImageLayout::TransferDst,
                image.full_range(),
            )
            .unwrap();

        let commands = dummy.recorded_commands(cmd);
        assert_eq!(commands.len(), 1);
        let RecordedCommand::ImageBarrier(barrier) = &commands[0] else {
            panic!("expected a barrier, got {:?}", commands[0]);
        };
        assert_eq!(barrier.src_access, AccessFlags::empty());
        assert_eq!(barrier.dst_access, AccessFlags::TRANSFER_WRITE);
        assert_eq!(image.layout(), Some(ImageLayout::TransferDst));
    }

    #[test]
    fn test_partial_transition_splits_layout() {
        let (_dummy, backend, cmd) = setup();
        let mut image = sampled_image(&backend, 3);
        image.transition_to(cmd, ImageLayout::TransferDst).unwrap();

        image
            .transition(
                cmd,
                ImageLayout::TransferDst,
                ImageLayout::TransferSrc,
                image.mip_range(0, 1),
            )
            .unwrap();

        assert_eq!(image.layout(), None);
        assert_eq!(image.mip_layout(0), Some(ImageLayout::TransferSrc));
        assert_eq!(image.mip_layout(1), Some(ImageLayout::TransferDst));
    }

    #[test]
    fn test_mismatched_old_layout_is_rejected() {
        let (dummy, backend, cmd) = setup();
        let mut image = sampled_image(&backend, 1);

        let result = image.transition(
            cmd,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
            image.full_range(),
        );

        assert!(matches!(result, Err(GraphicsError::ResourceMisuse(_))));
        assert!(dummy.recorded_commands(cmd).is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unmodeled layout transition")]
    fn test_unmodeled_transition_panics_in_debug() {
        let (_dummy, backend, cmd) = setup();
        let mut image = sampled_image(&backend, 1);
        let _ = image.transition(
            cmd,
            ImageLayout::Undefined,
            ImageLayout::PresentSrc,
            image.full_range(),
        );
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_unmodeled_transition_errors_in_release() {
        let (dummy, backend, cmd) = setup();
        let mut image = sampled_image(&backend, 1);
        let result = image.transition(
            cmd,
            ImageLayout::Undefined,
            ImageLayout::PresentSrc,
            image.full_range(),
        );
        assert!(matches!(result, Err(GraphicsError::ResourceMisuse(_))));
        assert!(dummy.recorded_commands(cmd).is_empty());
        assert_eq!(image.layout(), Some(ImageLayout::Undefined));
    }

    #[test]
    fn test_drop_releases_owned_image_only() {
        let (dummy, backend, _cmd) = setup();
        let image = sampled_image(&backend, 1);
        assert_eq!(dummy.live_handles().images, 1);
        drop(image);
        assert_eq!(dummy.live_handles().images, 0);

        let wrapped = GpuImage::from_swapchain(
            &backend,
            ImageHandle::from_raw(9999),
            Extent2d::new(8, 8),
            ImageFormat::Bgra8Unorm,
        );
        drop(wrapped);
        assert!(dummy.violations().is_empty());
    }
}
