//! Draw recording tests: geometry packing, scissors, callbacks and
//! descriptor reuse.

#![cfg(feature = "dummy")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use redlilium_ui_renderer::backend::dummy::{BackendEvent, GpuCompletion, RecordedCommand};
use redlilium_ui_renderer::draw::CallbackContext;
use redlilium_ui_renderer::types::ScissorRect;
use redlilium_ui_renderer::{
    DrawCommand, DrawData, FrameOutcome, GraphicsError, TextureId, ViewportId,
};
use rstest::{fixture, rstest};

const SECOND_TEXTURE: TextureId = TextureId::new(2);

/// A renderer with two uploaded 4x4 textures.
#[fixture]
fn textured() -> TestRenderer {
    let mut test = TestRenderer::new(GpuCompletion::Immediate);
    test.renderer
        .set_texture(FONT_TEXTURE, solid_texture(4, 4))
        .unwrap();
    test.renderer
        .set_texture(SECOND_TEXTURE, solid_texture(4, 4))
        .unwrap();
    test
}

fn scissors(commands: &[RecordedCommand]) -> Vec<ScissorRect> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::SetScissor(rect) => Some(*rect),
            _ => None,
        })
        .collect()
}

fn bound_geometry(commands: &[RecordedCommand]) -> Option<(u64, u64)> {
    commands.iter().find_map(|c| match c {
        RecordedCommand::BindGeometry {
            vertex_buffer,
            index_buffer,
        } => Some((vertex_buffer.raw(), index_buffer.raw())),
        _ => None,
    })
}

// ============================================================================
// Geometry
// ============================================================================

#[rstest]
fn test_offsets_accumulate_across_lists(mut textured: TestRenderer) {
    let full = [0.0, 0.0, 320.0, 240.0];
    let data = DrawData::new(320.0, 240.0)
        .with_list(quad_list(&[FONT_TEXTURE, FONT_TEXTURE], full))
        .with_list(quad_list(&[SECOND_TEXTURE, FONT_TEXTURE], full));

    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    let commands = textured.last_commands();
    assert_eq!(
        draw_calls(&commands),
        vec![(6, 0, 0), (6, 6, 4), (6, 12, 8), (6, 18, 12)]
    );
    textured.assert_no_violations();
}

#[rstest]
fn test_geometry_is_staged_into_slot_buffers(mut textured: TestRenderer) {
    let data = frame_with(&[FONT_TEXTURE, SECOND_TEXTURE]);
    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    let commands = textured.last_commands();
    let (vertex_raw, _) = bound_geometry(&commands).expect("geometry bound");
    let staged = commands
        .iter()
        .find_map(|c| match c {
            RecordedCommand::CopyBuffer { src, dst, size } if dst.raw() == vertex_raw => {
                Some((*src, *size))
            }
            _ => None,
        })
        .expect("vertex copy recorded");

    let expected = data.vertex_bytes();
    assert_eq!(staged.1, expected.len() as u64);
    // The staging buffer lives until the slot's fence is waited on again.
    let contents = textured.dummy.buffer_contents(staged.0).unwrap();
    assert_eq!(&contents[..expected.len()], expected.as_slice());

    // Geometry copies are recorded before the render pass.
    let copy = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::CopyBuffer { .. }))
        .unwrap();
    let begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRenderPass(_)))
        .unwrap();
    assert!(copy < begin);
}

#[rstest]
fn test_geometry_grows_past_initial_capacity(mut textured: TestRenderer) {
    // 60 quads are 240 vertices, far past the 1 KiB initial vertex store.
    let textures = vec![FONT_TEXTURE; 60];
    let data = frame_with(&textures);
    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    let commands = textured.last_commands();
    let (vertex_raw, index_raw) = bound_geometry(&commands).unwrap();
    let vertex_size = textured
        .dummy
        .buffer_size(redlilium_ui_renderer::backend::BufferHandle::from_raw(vertex_raw))
        .unwrap();
    let index_size = textured
        .dummy
        .buffer_size(redlilium_ui_renderer::backend::BufferHandle::from_raw(index_raw))
        .unwrap();
    assert!(vertex_size >= data.vertex_bytes().len() as u64);
    assert!(index_size >= data.index_bytes().len() as u64);
    assert_eq!(draw_calls(&commands).len(), 60);
    textured.assert_no_violations();
}

#[rstest]
fn test_slots_do_not_share_geometry(mut textured: TestRenderer) {
    let data = frame_with(&[FONT_TEXTURE]);
    textured.renderer.render(ViewportId::MAIN, &data).unwrap();
    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    let submissions = textured.dummy.submissions();
    let first = bound_geometry(&submissions[0].commands).unwrap();
    let second = bound_geometry(&submissions[1].commands).unwrap();
    assert_ne!(first.0, second.0);
    assert_ne!(first.1, second.1);
}

#[rstest]
fn test_projection_and_viewport_state(mut textured: TestRenderer) {
    let mut data = frame_with(&[FONT_TEXTURE]);
    data.display_pos = [10.0, 20.0];
    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    let commands = textured.last_commands();
    let projection = data.projection();
    let expected: &[u8] = bytemuck::cast_slice(&projection);
    assert!(commands.contains(&RecordedCommand::PushConstants(expected.to_vec())));
    assert!(commands.contains(&RecordedCommand::SetViewport(MAIN_SIZE)));
}

// ============================================================================
// Clipping
// ============================================================================

#[rstest]
fn test_clip_rects_become_clamped_scissors(mut textured: TestRenderer) {
    let mut list = quad_list(&[FONT_TEXTURE, FONT_TEXTURE, FONT_TEXTURE], [0.0; 4]);
    list.commands[0].clip_rect = [-10.0, 10.0, 400.0, 20.0];
    // Entirely outside the framebuffer.
    list.commands[1].clip_rect = [500.0, 0.0, 600.0, 10.0];
    list.commands[2].clip_rect = [5.0, 6.0, 25.0, 46.0];
    let data = DrawData::new(320.0, 240.0).with_list(list);

    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    let commands = textured.last_commands();
    assert_eq!(
        scissors(&commands),
        vec![
            ScissorRect {
                x: 0,
                y: 10,
                width: 320,
                height: 10
            },
            ScissorRect {
                x: 5,
                y: 6,
                width: 20,
                height: 40
            },
        ]
    );
    assert_eq!(draw_calls(&commands), vec![(6, 0, 0), (6, 12, 8)]);
}

#[rstest]
fn test_scissors_follow_framebuffer_scale(mut textured: TestRenderer) {
    let mut list = quad_list(&[FONT_TEXTURE], [0.0; 4]);
    list.commands[0].clip_rect = [10.0, 10.0, 50.0, 30.0];
    let mut data = DrawData::new(160.0, 120.0).with_list(list);
    data.framebuffer_scale = [2.0, 2.0];

    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    assert_eq!(
        scissors(&textured.last_commands()),
        vec![ScissorRect {
            x: 20,
            y: 20,
            width: 80,
            height: 40
        }]
    );
}

#[rstest]
fn test_empty_commands_are_skipped(mut textured: TestRenderer) {
    let mut list = quad_list(&[FONT_TEXTURE, FONT_TEXTURE], [0.0, 0.0, 320.0, 240.0]);
    list.commands[0].index_count = 0;
    let data = DrawData::new(320.0, 240.0).with_list(list);

    textured.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert_eq!(draw_calls(&textured.last_commands()), vec![(6, 6, 4)]);
}

// ============================================================================
// Callbacks
// ============================================================================

#[rstest]
fn test_callback_runs_and_state_is_rebound(mut textured: TestRenderer) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let callback = Arc::new(move |ctx: &mut CallbackContext<'_>| {
        assert_eq!(ctx.viewport, ViewportId::MAIN);
        assert_eq!(ctx.framebuffer_extent, MAIN_SIZE);
        assert_eq!(
            ctx.scissor,
            Some(ScissorRect {
                x: 0,
                y: 0,
                width: 100,
                height: 50
            })
        );
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let mut list = quad_list(&[FONT_TEXTURE, FONT_TEXTURE], [0.0, 0.0, 320.0, 240.0]);
    list.commands
        .insert(1, DrawCommand::callback([0.0, 0.0, 100.0, 50.0], callback));
    let data = DrawData::new(320.0, 240.0).with_list(list);

    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let commands = textured.last_commands();
    let binds = commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::BindProgram(_)))
        .count();
    assert_eq!(binds, 2);
    assert_eq!(draw_calls(&commands), vec![(6, 0, 0), (6, 6, 4)]);
}

// ============================================================================
// Descriptors
// ============================================================================

#[rstest]
fn test_descriptor_sets_are_cached_per_texture(mut textured: TestRenderer) {
    let data = frame_with(&[FONT_TEXTURE, FONT_TEXTURE, SECOND_TEXTURE]);
    textured.renderer.render(ViewportId::MAIN, &data).unwrap();

    let commands = textured.last_commands();
    let sets: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BindDescriptorSet(set) => Some(*set),
            _ => None,
        })
        .collect();
    assert_eq!(sets.len(), 3);
    assert_eq!(sets[0], sets[1]);
    assert_ne!(sets[0], sets[2]);
    assert_eq!(textured.renderer.descriptors().len(), 2);

    let font = textured.renderer.textures().resolve(FONT_TEXTURE).unwrap();
    assert_eq!(textured.dummy.descriptor_binding(sets[0]), Some(font));

    // The next frame reuses the cached sets.
    textured.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert_eq!(textured.renderer.descriptors().len(), 2);
    assert_eq!(textured.dummy.live_handles().descriptor_sets, 2);
}

#[rstest]
fn test_descriptor_pool_exhaustion_is_fatal(mut textured: TestRenderer) {
    textured.dummy.set_descriptor_set_limit(Some(1));
    let data = frame_with(&[FONT_TEXTURE, SECOND_TEXTURE]);

    let error = textured.renderer.render(ViewportId::MAIN, &data).unwrap_err();
    assert!(matches!(error, GraphicsError::AllocationFailure(_)));
    assert!(error.is_fatal());
}

#[rstest]
fn test_failed_frame_keeps_uploads_and_recovers(mut textured: TestRenderer) {
    textured.dummy.set_descriptor_set_limit(Some(1));
    let data = frame_with(&[FONT_TEXTURE, SECOND_TEXTURE]);

    let error = textured.renderer.render(ViewportId::MAIN, &data).unwrap_err();
    assert!(matches!(error, GraphicsError::AllocationFailure(_)));
    assert_eq!(textured.dummy.submission_count(), 0);

    // Nothing recorded into the abandoned frame was installed.
    let textures = textured.renderer.textures();
    assert_eq!(textures.texture_count(), 0);
    assert_eq!(textures.pending_count(), 2);
    assert_eq!(textures.layout(FONT_TEXTURE), None);
    assert!(textured.renderer.descriptors().is_empty());

    // The swapchain was rebuilt around the acquired image.
    let created = textured
        .dummy
        .events()
        .iter()
        .filter(|e| matches!(e, BackendEvent::SwapchainCreated(_)))
        .count();
    assert_eq!(created, 2);

    textured.dummy.set_descriptor_set_limit(None);
    let outcome = textured.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { image_index: 0, .. }));

    let image_copies = textured
        .last_commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::CopyBufferToImage { .. }))
        .count();
    assert_eq!(image_copies, 2);
    let textures = textured.renderer.textures();
    assert_eq!(textures.texture_count(), 2);
    assert_eq!(textures.pending_count(), 0);
    assert_eq!(textured.renderer.descriptors().len(), 2);
    textured.assert_no_violations();
}

// ============================================================================
// Validation
// ============================================================================

#[rstest]
fn test_unknown_texture_fails_before_acquire(mut textured: TestRenderer) {
    let data = frame_with(&[TextureId::new(99)]);

    let result = textured.renderer.render(ViewportId::MAIN, &data);
    assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    assert_eq!(textured.dummy.submission_count(), 0);
    assert!(
        !textured
            .dummy
            .events()
            .iter()
            .any(|e| matches!(e, BackendEvent::Acquired { .. }))
    );

    // Nothing was consumed, the next frame is unaffected.
    let outcome = textured
        .renderer
        .render(ViewportId::MAIN, &frame_with(&[FONT_TEXTURE]))
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { image_index: 0, .. }));
    textured.assert_no_violations();
}
