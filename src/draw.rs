//! UI draw data consumed by the renderer.
//!
//! A frame is a list of [`DrawList`]s, each with its own vertices, indices
//! and [`DrawCommand`]s. Command offsets are local to their list; the
//! renderer packs all lists into one vertex and one index store and adds the
//! running totals.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::backend::{CommandBufferHandle, GpuBackend};
use crate::texture::TextureId;
use crate::types::{DrawIndex, Extent2d, ScissorRect};
use crate::viewport::ViewportId;

/// A UI vertex: position, texture coordinate and packed RGBA8 color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct DrawVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub color: u32,
}

impl DrawVertex {
    pub const fn new(pos: [f32; 2], uv: [f32; 2], color: u32) -> Self {
        Self { pos, uv, color }
    }
}

/// Pack an RGBA color into the vertex color layout (R in the low byte).
pub const fn pack_color(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

/// State handed to a custom draw callback.
pub struct CallbackContext<'a> {
    pub backend: &'a dyn GpuBackend,
    pub command_buffer: CommandBufferHandle,
    pub viewport: ViewportId,
    /// Clip rectangle of the command, already converted to framebuffer pixels.
    pub scissor: Option<ScissorRect>,
    pub framebuffer_extent: Extent2d,
}

/// Custom callback run in place of a draw. Pipeline state is rebound after it returns.
pub type DrawCallback = Arc<dyn Fn(&mut CallbackContext<'_>) + Send + Sync>;

/// Clip rectangle in UI coordinates: `[min_x, min_y, max_x, max_y]`.
pub type ClipRect = [f32; 4];

/// One draw call, or a callback.
#[derive(Clone)]
pub struct DrawCommand {
    pub clip_rect: ClipRect,
    pub texture_id: TextureId,
    pub index_count: u32,
    /// First index, relative to the owning list.
    pub index_offset: u32,
    /// Added to each index, relative to the owning list.
    pub vertex_offset: u32,
    pub callback: Option<DrawCallback>,
}

impl DrawCommand {
    /// A textured draw of `index_count` indices.
    pub fn new(texture_id: TextureId, clip_rect: ClipRect, index_count: u32) -> Self {
        Self {
            clip_rect,
            texture_id,
            index_count,
            index_offset: 0,
            vertex_offset: 0,
            callback: None,
        }
    }

    /// A callback that replaces drawing for this command.
    pub fn callback(clip_rect: ClipRect, callback: DrawCallback) -> Self {
        Self {
            clip_rect,
            texture_id: TextureId::default(),
            index_count: 0,
            index_offset: 0,
            vertex_offset: 0,
            callback: Some(callback),
        }
    }

    pub fn with_offsets(mut self, index_offset: u32, vertex_offset: u32) -> Self {
        self.index_offset = index_offset;
        self.vertex_offset = vertex_offset;
        self
    }
}

impl std::fmt::Debug for DrawCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawCommand")
            .field("clip_rect", &self.clip_rect)
            .field("texture_id", &self.texture_id)
            .field("index_count", &self.index_count)
            .field("index_offset", &self.index_offset)
            .field("vertex_offset", &self.vertex_offset)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Geometry and commands of one UI layer.
#[derive(Debug, Clone, Default)]
pub struct DrawList {
    pub vertices: Vec<DrawVertex>,
    pub indices: Vec<DrawIndex>,
    pub commands: Vec<DrawCommand>,
}

/// Everything needed to render one frame of a viewport.
#[derive(Debug, Clone)]
pub struct DrawData {
    /// Top-left of the displayed area in UI coordinates.
    pub display_pos: [f32; 2],
    /// Size of the displayed area in UI coordinates.
    pub display_size: [f32; 2],
    /// Framebuffer pixels per UI unit.
    pub framebuffer_scale: [f32; 2],
    pub lists: Vec<DrawList>,
}

impl Default for DrawData {
    fn default() -> Self {
        Self {
            display_pos: [0.0, 0.0],
            display_size: [0.0, 0.0],
            framebuffer_scale: [1.0, 1.0],
            lists: Vec::new(),
        }
    }
}

impl DrawData {
    /// Draw data covering `width` x `height` UI units at scale 1.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            display_size: [width, height],
            ..Default::default()
        }
    }

    pub fn with_list(mut self, list: DrawList) -> Self {
        self.lists.push(list);
        self
    }

    pub fn total_vertex_count(&self) -> usize {
        self.lists.iter().map(|l| l.vertices.len()).sum()
    }

    pub fn total_index_count(&self) -> usize {
        self.lists.iter().map(|l| l.indices.len()).sum()
    }

    /// Size of the target framebuffer in pixels.
    pub fn framebuffer_extent(&self) -> Extent2d {
        Extent2d::new(
            (self.display_size[0] * self.framebuffer_scale[0]).max(0.0) as u32,
            (self.display_size[1] * self.framebuffer_scale[1]).max(0.0) as u32,
        )
    }

    /// Orthographic projection as `[scale_x, scale_y, translate_x, translate_y]`.
    ///
    /// Maps `display_pos` to clip space -1 and `display_pos + display_size` to +1.
    pub fn projection(&self) -> [f32; 4] {
        let scale = [2.0 / self.display_size[0], 2.0 / self.display_size[1]];
        [
            scale[0],
            scale[1],
            -1.0 - self.display_pos[0] * scale[0],
            -1.0 - self.display_pos[1] * scale[1],
        ]
    }

    /// Vertex bytes of every list, concatenated.
    pub fn vertex_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_vertex_count() * size_of::<DrawVertex>());
        for list in &self.lists {
            bytes.extend_from_slice(bytemuck::cast_slice(&list.vertices));
        }
        bytes
    }

    /// Index bytes of every list, concatenated.
    pub fn index_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_index_count() * size_of::<DrawIndex>());
        for list in &self.lists {
            bytes.extend_from_slice(bytemuck::cast_slice(&list.indices));
        }
        bytes
    }

    /// Convert a clip rectangle to a framebuffer scissor.
    ///
    /// The rectangle is clamped to `framebuffer`; `None` when nothing is left.
    pub fn scissor(&self, clip: ClipRect, framebuffer: Extent2d) -> Option<ScissorRect> {
        let min_x = ((clip[0] - self.display_pos[0]) * self.framebuffer_scale[0]).max(0.0);
        let min_y = ((clip[1] - self.display_pos[1]) * self.framebuffer_scale[1]).max(0.0);
        let max_x = ((clip[2] - self.display_pos[0]) * self.framebuffer_scale[0])
            .min(framebuffer.width as f32);
        let max_y = ((clip[3] - self.display_pos[1]) * self.framebuffer_scale[1])
            .min(framebuffer.height as f32);
        if max_x <= min_x || max_y <= min_y {
            return None;
        }
        Some(ScissorRect {
            x: min_x as i32,
            y: min_y as i32,
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        })
    }
}
