//! Texture registry and upload recording.
//!
//! Uploads are queued with [`TextureManager::set_texture`] and recorded into
//! the next frame's command buffer, before its render pass:
//!
//! ```text
//! full upload:   Undefined ──▶ TransferDst ──copy──▶ (mip chain) ──▶ ShaderReadOnly
//! patch upload:  ShaderReadOnly ──▶ TransferDst ──copy──▶ (mip chain) ──▶ ShaderReadOnly
//! ```
//!
//! Recorded uploads stay queued until the frame carrying them is submitted.
//! [`TextureManager::commit_uploads`] then installs the new images, while
//! [`TextureManager::abort_uploads`] drops them and leaves the queue to be
//! recorded again with the next frame.
//!
//! Replaced or freed textures may still be sampled by frames in flight. They
//! are kept together with the fences that were pending when they were
//! retired, and destroyed once each of those fences has been waited on or
//! observed signaled, or at the next idle point.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{
    BufferImageCopy, CommandBufferHandle, FenceHandle, GpuBackend, ImageViewHandle, SamplerHandle,
};
use crate::descriptor::DescriptorCache;
use crate::draw::DrawData;
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::FrameSlot;
use crate::resources::{Buffer, GpuImage, ImageView, MipChainGenerator, Sampler, mip_level_count};
use crate::types::{
    Extent2d, FilterMode, ImageDescriptor, ImageFormat, ImageLayout, ImageUsage, Offset2d,
    SamplerDescriptor,
};

/// First id handed out for user-registered textures.
const USER_TEXTURE_ID_BASE: u64 = 1 << 32;

/// Identifies a texture in draw commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// RGBA8 pixels to upload into a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureUpload {
    /// Width of the uploaded region.
    pub width: u32,
    /// Height of the uploaded region.
    pub height: u32,
    /// Tightly packed, row-major RGBA8 pixels.
    pub pixels: Vec<u8>,
    /// `None` creates or replaces the texture; `Some` patches a region of it.
    pub offset: Option<Offset2d>,
    /// Build a full mip chain (full uploads only; patches follow the texture).
    pub generate_mips: bool,
    /// Sampler filtering (full uploads only).
    pub filter: FilterMode,
}

impl TextureUpload {
    /// A full upload creating or replacing a texture.
    pub fn full(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
            offset: None,
            generate_mips: false,
            filter: FilterMode::Linear,
        }
    }

    /// A patch of an existing texture at `(x, y)`.
    pub fn patch(x: u32, y: u32, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            offset: Some(Offset2d::new(x, y)),
            ..Self::full(width, height, pixels)
        }
    }

    pub fn with_mips(mut self, generate: bool) -> Self {
        self.generate_mips = generate;
        self
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    fn validate(&self) -> GraphicsResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture upload must be at least 1x1, got {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.pixels.len() != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "{}x{} RGBA8 upload needs {expected} bytes, got {}",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

struct ManagedTexture {
    // Declared before `image` so the view is destroyed first.
    view: ImageView,
    image: GpuImage,
    filter: FilterMode,
}

enum TextureEntry {
    Managed(ManagedTexture),
    User {
        view: ImageViewHandle,
        sampler: SamplerHandle,
    },
}

enum RetiredEntry {
    Managed(ManagedTexture),
    User(ImageViewHandle),
}

impl RetiredEntry {
    fn view(&self) -> ImageViewHandle {
        match self {
            Self::Managed(texture) => texture.view.handle(),
            Self::User(view) => *view,
        }
    }
}

struct RetiredTexture {
    entry: RetiredEntry,
    /// Fences that were pending at retirement and have not completed since.
    fences: Vec<FenceHandle>,
}

/// Owns UI textures and the samplers they are drawn with.
pub struct TextureManager {
    backend: Arc<dyn GpuBackend>,
    format: ImageFormat,
    textures: HashMap<TextureId, TextureEntry>,
    pending: Vec<(TextureId, TextureUpload)>,
    /// Images created by the frame being recorded, installed on submit.
    recorded: Vec<(TextureId, ManagedTexture)>,
    retired: Vec<RetiredTexture>,
    mips: MipChainGenerator,
    linear: Sampler,
    nearest: Sampler,
    next_user_id: u64,
}

impl TextureManager {
    /// Create a manager with shared linear and nearest samplers.
    pub fn new(backend: &Arc<dyn GpuBackend>) -> GraphicsResult<Self> {
        Ok(Self {
            backend: Arc::clone(backend),
            format: ImageFormat::Rgba8Unorm,
            textures: HashMap::new(),
            pending: Vec::new(),
            recorded: Vec::new(),
            retired: Vec::new(),
            mips: MipChainGenerator::new(),
            linear: Sampler::new(backend, SamplerDescriptor::linear())?,
            nearest: Sampler::new(backend, SamplerDescriptor::nearest())?,
            next_user_id: USER_TEXTURE_ID_BASE,
        })
    }

    /// Queue an upload for `id`, recorded with the next frame.
    ///
    /// Patches are bounds-checked against the texture as it will be after
    /// every upload queued before this one.
    pub fn set_texture(&mut self, id: TextureId, upload: TextureUpload) -> GraphicsResult<()> {
        upload.validate()?;
        if let Some(offset) = upload.offset {
            let extent = self.planned_extent(id).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("patch of unknown texture {id:?}"))
            })?;
            let fits = offset.x as u64 + upload.width as u64 <= extent.width as u64
                && offset.y as u64 + upload.height as u64 <= extent.height as u64;
            if !fits {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{}x{} patch at ({}, {}) exceeds {}x{} texture {id:?}",
                    upload.width, upload.height, offset.x, offset.y, extent.width, extent.height
                )));
            }
        }
        self.pending.push((id, upload));
        Ok(())
    }

    /// Extent `id` will have once every queued upload is recorded.
    fn planned_extent(&self, id: TextureId) -> Option<Extent2d> {
        let queued = self
            .pending
            .iter()
            .rev()
            .find(|(pending_id, upload)| *pending_id == id && upload.offset.is_none())
            .map(|(_, upload)| Extent2d::new(upload.width, upload.height));
        queued.or_else(|| match self.textures.get(&id)? {
            TextureEntry::Managed(texture) => Some(texture.image.extent()),
            TextureEntry::User { .. } => None,
        })
    }

    /// Retire a texture. It is destroyed once frames in flight are done with it.
    pub fn free_texture(&mut self, id: TextureId, in_flight: &[FenceHandle]) {
        self.pending.retain(|(pending_id, _)| *pending_id != id);
        if let Some(entry) = self.textures.remove(&id) {
            self.retire(entry, in_flight);
        }
    }

    /// Register a view and sampler owned by the caller. Returns its new id.
    pub fn register_user_texture(
        &mut self,
        view: ImageViewHandle,
        sampler: SamplerHandle,
    ) -> TextureId {
        let id = TextureId(self.next_user_id);
        self.next_user_id += 1;
        self.textures.insert(id, TextureEntry::User { view, sampler });
        id
    }

    /// Whether `id` names a texture, or one queued for upload.
    pub fn contains(&self, id: TextureId) -> bool {
        self.textures.contains_key(&id) || self.pending.iter().any(|(p, _)| *p == id)
    }

    /// Sampler and view to draw `id` with.
    ///
    /// Images recorded into the current frame take precedence.
    pub fn resolve(&self, id: TextureId) -> Option<(SamplerHandle, ImageViewHandle)> {
        if let Some((_, texture)) = self.recorded.iter().rev().find(|(r, _)| *r == id) {
            return Some(self.managed_binding(texture));
        }
        match self.textures.get(&id)? {
            TextureEntry::Managed(texture) => Some(self.managed_binding(texture)),
            TextureEntry::User { view, sampler } => Some((*sampler, *view)),
        }
    }

    fn managed_binding(&self, texture: &ManagedTexture) -> (SamplerHandle, ImageViewHandle) {
        let sampler = match texture.filter {
            FilterMode::Linear => &self.linear,
            FilterMode::Nearest => &self.nearest,
        };
        (sampler.handle(), texture.view.handle())
    }

    /// Layout of a managed texture's image, if all its levels agree.
    pub fn layout(&self, id: TextureId) -> Option<ImageLayout> {
        match self.textures.get(&id)? {
            TextureEntry::Managed(texture) => texture.image.layout(),
            TextureEntry::User { .. } => None,
        }
    }

    /// Mip level count of a managed texture.
    pub fn mip_level_count(&self, id: TextureId) -> Option<u32> {
        match self.textures.get(&id)? {
            TextureEntry::Managed(texture) => Some(texture.image.mip_level_count()),
            TextureEntry::User { .. } => None,
        }
    }

    /// Check that every texture referenced by `data` exists or is queued.
    pub fn validate_draw_data(&self, data: &DrawData) -> GraphicsResult<()> {
        let missing = data
            .lists
            .iter()
            .flat_map(|list| &list.commands)
            .filter(|cmd| cmd.callback.is_none())
            .find(|cmd| !self.contains(cmd.texture_id));
        match missing {
            Some(cmd) => Err(GraphicsError::InvalidParameter(format!(
                "draw command references unknown texture {:?}",
                cmd.texture_id
            ))),
            None => Ok(()),
        }
    }

    pub fn has_pending_uploads(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Number of queued uploads not yet submitted with a frame.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Record every queued upload into `slot`'s command buffer.
    ///
    /// Staging buffers are retired to the slot. The uploads stay queued
    /// until [`commit_uploads`](Self::commit_uploads) runs for the submitted
    /// frame, or are recorded again after [`abort_uploads`](Self::abort_uploads).
    pub fn record_uploads(&mut self, slot: &mut FrameSlot) -> GraphicsResult<()> {
        let pending = std::mem::take(&mut self.pending);
        let result = pending
            .iter()
            .try_for_each(|(id, upload)| self.record_upload(slot, *id, upload));
        self.pending = pending;
        result
    }

    fn record_upload(
        &mut self,
        slot: &mut FrameSlot,
        id: TextureId,
        upload: &TextureUpload,
    ) -> GraphicsResult<()> {
        let command_buffer = slot.command_buffer();
        let staging = Buffer::staging(&self.backend, &upload.pixels)?;
        match upload.offset {
            None => {
                let texture = self.record_full_upload(command_buffer, &staging, id, upload)?;
                self.recorded.push((id, texture));
            }
            Some(offset) => {
                let recorded = self
                    .recorded
                    .iter_mut()
                    .rev()
                    .find(|(r, _)| *r == id)
                    .map(|(_, texture)| texture);
                let texture = match recorded {
                    Some(texture) => texture,
                    None => match self.textures.get_mut(&id) {
                        Some(TextureEntry::Managed(texture)) => texture,
                        _ => {
                            return Err(GraphicsError::InvalidParameter(format!(
                                "patch of texture {id:?} which is not managed"
                            )));
                        }
                    },
                };
                Self::record_patch(
                    &self.mips,
                    self.backend.as_ref(),
                    command_buffer,
                    &staging,
                    texture,
                    offset,
                    upload,
                )?;
            }
        }
        slot.retire(staging);
        Ok(())
    }

    /// Install the images recorded into a frame that was submitted.
    ///
    /// Textures they replace are retired against `in_flight`.
    pub fn commit_uploads(&mut self, in_flight: &[FenceHandle]) {
        if self.recorded.is_empty() && self.pending.is_empty() {
            return;
        }
        self.pending.clear();
        for (id, texture) in std::mem::take(&mut self.recorded) {
            if let Some(old) = self.textures.insert(id, TextureEntry::Managed(texture)) {
                self.retire(old, in_flight);
            }
        }
    }

    /// Drop the images recorded into a frame that was never submitted.
    ///
    /// Their uploads stay queued for the next frame.
    pub fn abort_uploads(&mut self, descriptors: &mut DescriptorCache) {
        if self.recorded.is_empty() {
            return;
        }
        log::warn!(
            "Dropping {} textures recorded into an abandoned frame, {} uploads stay queued",
            self.recorded.len(),
            self.pending.len()
        );
        for (_, texture) in std::mem::take(&mut self.recorded) {
            descriptors.forget_view(texture.view.handle());
        }
    }

    fn record_full_upload(
        &self,
        command_buffer: CommandBufferHandle,
        staging: &Buffer,
        id: TextureId,
        upload: &TextureUpload,
    ) -> GraphicsResult<ManagedTexture> {
        let levels = if upload.generate_mips {
            mip_level_count(upload.width, upload.height)
        } else {
            1
        };
        let mut usage = ImageUsage::SAMPLED | ImageUsage::COPY_DST;
        if levels > 1 {
            usage |= ImageUsage::COPY_SRC;
        }
        let descriptor = ImageDescriptor::new_2d(upload.width, upload.height, self.format, usage)
            .with_mip_level_count(levels)
            .with_label(format!("ui texture {}", id.raw()));
        let mut image = GpuImage::new(&self.backend, &descriptor)?;

        image.transition(
            command_buffer,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            image.full_range(),
        )?;
        self.backend.cmd_copy_buffer_to_image(
            command_buffer,
            staging.handle(),
            image.handle(),
            &BufferImageCopy {
                buffer_offset: 0,
                mip_level: 0,
                image_offset: Offset2d::default(),
                image_extent: Extent2d::new(upload.width, upload.height),
            },
        );
        Self::finish_upload(&self.mips, self.backend.as_ref(), command_buffer, &mut image)?;

        let view = ImageView::whole(&self.backend, &image)?;
        log::debug!(
            "Uploaded texture {:?} ({}x{}, {} mips)",
            id,
            upload.width,
            upload.height,
            levels
        );
        Ok(ManagedTexture {
            view,
            image,
            filter: upload.filter,
        })
    }

    fn record_patch(
        mips: &MipChainGenerator,
        backend: &dyn GpuBackend,
        command_buffer: CommandBufferHandle,
        staging: &Buffer,
        texture: &mut ManagedTexture,
        offset: Offset2d,
        upload: &TextureUpload,
    ) -> GraphicsResult<()> {
        texture
            .image
            .transition_to(command_buffer, ImageLayout::TransferDst)?;
        backend.cmd_copy_buffer_to_image(
            command_buffer,
            staging.handle(),
            texture.image.handle(),
            &BufferImageCopy {
                buffer_offset: 0,
                mip_level: 0,
                image_offset: offset,
                image_extent: Extent2d::new(upload.width, upload.height),
            },
        );
        Self::finish_upload(mips, backend, command_buffer, &mut texture.image)
    }

    /// Move a freshly written image from `TransferDst` to `ShaderReadOnly`,
    /// regenerating its mips on the way.
    fn finish_upload(
        mips: &MipChainGenerator,
        backend: &dyn GpuBackend,
        command_buffer: CommandBufferHandle,
        image: &mut GpuImage,
    ) -> GraphicsResult<()> {
        if image.mip_level_count() > 1 {
            mips.generate(backend, command_buffer, image)
        } else {
            image.transition(
                command_buffer,
                ImageLayout::TransferDst,
                ImageLayout::ShaderReadOnly,
                image.full_range(),
            )
        }
    }

    fn retire(&mut self, entry: TextureEntry, in_flight: &[FenceHandle]) {
        let entry = match entry {
            TextureEntry::Managed(texture) => RetiredEntry::Managed(texture),
            TextureEntry::User { view, .. } => RetiredEntry::User(view),
        };
        self.retired.push(RetiredTexture {
            entry,
            fences: in_flight.to_vec(),
        });
    }

    /// Note that the GPU finished the submission guarded by `fence`.
    ///
    /// Call after a successful wait on a frame fence.
    pub fn fence_completed(&mut self, fence: FenceHandle, descriptors: &mut DescriptorCache) {
        for retired in &mut self.retired {
            retired.fences.retain(|f| *f != fence);
        }
        self.release_completed(descriptors);
    }

    /// Destroy retired textures whose fences have all signaled, without blocking.
    pub fn collect_garbage(&mut self, descriptors: &mut DescriptorCache) {
        let backend = &self.backend;
        for retired in &mut self.retired {
            retired
                .fences
                .retain(|f| !matches!(backend.is_fence_signaled(*f), Ok(true)));
        }
        self.release_completed(descriptors);
    }

    /// Destroy every retired texture. Only valid while the device is idle.
    pub fn flush_retired(&mut self, descriptors: &mut DescriptorCache) {
        for retired in &mut self.retired {
            retired.fences.clear();
        }
        self.release_completed(descriptors);
    }

    fn release_completed(&mut self, descriptors: &mut DescriptorCache) {
        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition(|r| r.fences.is_empty());
        self.retired = waiting;
        for retired in done {
            descriptors.forget_view(retired.entry.view());
            if let RetiredEntry::Managed(texture) = &retired.entry {
                log::trace!("Destroying retired texture {:?}", texture.image.label());
            }
        }
    }

    /// Destroy every texture and forget their descriptors. Only valid while the device is idle.
    pub fn clear(&mut self, descriptors: &mut DescriptorCache) {
        self.pending.clear();
        for (_, texture) in std::mem::take(&mut self.recorded) {
            descriptors.forget_view(texture.view.handle());
        }
        for (_, entry) in self.textures.drain() {
            if let TextureEntry::Managed(texture) = entry {
                descriptors.forget_view(texture.view.handle());
            }
        }
        self.flush_retired(descriptors);
    }
}

impl std::fmt::Debug for TextureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureManager")
            .field("textures", &self.textures.len())
            .field("pending", &self.pending.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_validation() {
        assert!(TextureUpload::full(2, 2, vec![0; 16]).validate().is_ok());
        assert!(TextureUpload::full(2, 2, vec![0; 15]).validate().is_err());
        assert!(TextureUpload::full(0, 2, Vec::new()).validate().is_err());
    }

    #[test]
    fn test_patch_constructor_keeps_region() {
        let patch = TextureUpload::patch(3, 4, 1, 1, vec![0; 4]);
        assert_eq!(patch.offset, Some(Offset2d::new(3, 4)));
        assert_eq!((patch.width, patch.height), (1, 1));
    }
}
