//! Common utilities for renderer integration tests.
//!
//! Every test drives a [`Renderer`] on top of the dummy backend, which
//! records commands, tracks live handles and flags usage violations.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_ui_renderer::backend::GpuBackend;
use redlilium_ui_renderer::backend::dummy::{DummyBackend, GpuCompletion, RecordedCommand};
use redlilium_ui_renderer::draw::pack_color;
use redlilium_ui_renderer::{
    DrawCommand, DrawData, DrawList, DrawVertex, Extent2d, Renderer, RendererConfig, TextureId,
    TextureUpload, WindowHandle,
};

/// Size of the main window in most tests.
pub const MAIN_SIZE: Extent2d = Extent2d::new(320, 240);

/// Window handle used for the main viewport.
pub const MAIN_WINDOW: WindowHandle = WindowHandle::new(1);

/// Texture id most tests draw with.
pub const FONT_TEXTURE: TextureId = TextureId::new(1);

/// Route log output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

// ============================================================================
// Renderer Fixture
// ============================================================================

/// A renderer plus the dummy backend it runs on.
pub struct TestRenderer {
    pub dummy: Arc<DummyBackend>,
    pub renderer: Renderer,
}

impl TestRenderer {
    pub fn new(completion: GpuCompletion) -> Self {
        Self::with_config(completion, test_config())
    }

    pub fn with_config(completion: GpuCompletion, config: RendererConfig) -> Self {
        init_logging();
        let dummy = Arc::new(DummyBackend::with_completion(completion));
        let renderer = create_renderer(&dummy, config, MAIN_SIZE);
        Self { dummy, renderer }
    }

    /// Commands of the most recent submission.
    pub fn last_commands(&self) -> Vec<RecordedCommand> {
        self.dummy
            .submissions()
            .last()
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    /// Panic if the dummy backend saw any usage violation.
    pub fn assert_no_violations(&self) {
        let violations = self.dummy.violations();
        assert!(violations.is_empty(), "usage violations: {violations:#?}");
    }
}

pub fn test_config() -> RendererConfig {
    RendererConfig::default()
        .with_validation(false)
        .with_geometry_capacity(1024, 512)
}

/// Build a renderer whose windows get dummy surfaces.
pub fn create_renderer(dummy: &Arc<DummyBackend>, config: RendererConfig, size: Extent2d) -> Renderer {
    let backend: Arc<dyn GpuBackend> = dummy.clone();
    let surfaces = Arc::clone(dummy);
    let programs = Arc::clone(dummy);
    Renderer::new(
        backend,
        config,
        Box::new(move |_| Ok(surfaces.create_surface())),
        MAIN_WINDOW,
        size,
        move |_, _| Ok(programs.create_program()),
    )
    .expect("renderer creation")
}

// ============================================================================
// Draw Data Helpers
// ============================================================================

/// Tightly packed RGBA8 pixels of one color.
pub fn solid_pixels(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat((width * height) as usize)
}

/// A full upload of a single-color texture.
pub fn solid_texture(width: u32, height: u32) -> TextureUpload {
    TextureUpload::full(width, height, solid_pixels(width, height, [255, 255, 255, 255]))
}

/// A list holding one quad per texture, each drawn by its own command.
pub fn quad_list(textures: &[TextureId], clip: [f32; 4]) -> DrawList {
    let mut list = DrawList::default();
    for (i, &texture) in textures.iter().enumerate() {
        let x = i as f32 * 10.0;
        let base = list.vertices.len() as u32;
        let first_index = list.indices.len() as u32;
        let color = pack_color(255, 255, 255, 255);
        list.vertices.extend([
            DrawVertex::new([x, 0.0], [0.0, 0.0], color),
            DrawVertex::new([x + 8.0, 0.0], [1.0, 0.0], color),
            DrawVertex::new([x + 8.0, 8.0], [1.0, 1.0], color),
            DrawVertex::new([x, 8.0], [0.0, 1.0], color),
        ]);
        list.indices.extend([0, 1, 2, 0, 2, 3]);
        list.commands
            .push(DrawCommand::new(texture, clip, 6).with_offsets(first_index, base));
    }
    list
}

/// Draw data covering the main window with one quad per texture.
pub fn frame_with(textures: &[TextureId]) -> DrawData {
    DrawData::new(MAIN_SIZE.width as f32, MAIN_SIZE.height as f32).with_list(quad_list(
        textures,
        [0.0, 0.0, MAIN_SIZE.width as f32, MAIN_SIZE.height as f32],
    ))
}

/// Draw data for `size` with nothing in it.
pub fn empty_frame(size: Extent2d) -> DrawData {
    DrawData::new(size.width as f32, size.height as f32)
}

/// Draw calls in recorded order as `(index_count, first_index, vertex_offset)`.
pub fn draw_calls(commands: &[RecordedCommand]) -> Vec<(u32, u32, i32)> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::DrawIndexed {
                index_count,
                first_index,
                vertex_offset,
            } => Some((*index_count, *first_index, *vertex_offset)),
            _ => None,
        })
        .collect()
}
