//! Frame pacing, swapchain recovery and viewport lifecycle tests.
//!
//! These run on the dummy backend, which simulates fences, semaphores and
//! swapchain staleness and records every command.

#![cfg(feature = "dummy")]

mod common;

use common::*;
use redlilium_ui_renderer::backend::dummy::{
    BackendEvent, GpuCompletion, LiveHandleCounts, ScriptedOutcome,
};
use redlilium_ui_renderer::{
    Extent2d, FrameOutcome, GraphicsError, SkipReason, ViewportId, WindowHandle,
};
use rstest::{fixture, rstest};

#[fixture]
fn immediate() -> TestRenderer {
    TestRenderer::new(GpuCompletion::Immediate)
}

#[fixture]
fn manual() -> TestRenderer {
    TestRenderer::new(GpuCompletion::Manual)
}

// ============================================================================
// Steady State
// ============================================================================

#[rstest]
#[case::one_frame(1)]
#[case::full_ring(3)]
#[case::wraps_twice(7)]
fn test_frames_are_presented_in_order(mut immediate: TestRenderer, #[case] frames: u32) {
    let data = empty_frame(MAIN_SIZE);
    for frame in 0..frames {
        let outcome = immediate.renderer.render(ViewportId::MAIN, &data).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: frame % 3,
                suboptimal: false
            }
        );
    }

    assert_eq!(immediate.dummy.present_count(), frames as usize);
    assert_eq!(immediate.dummy.submission_count(), frames as usize);
    assert_eq!(immediate.dummy.swapchains_created(), 1);
    immediate.assert_no_violations();
}

#[rstest]
fn test_ring_matches_swapchain(immediate: TestRenderer) {
    let context = immediate.renderer.viewports().get(ViewportId::MAIN).unwrap();
    let ring = context.frame_ring().unwrap();

    assert_eq!(context.image_count(), 3);
    assert_eq!(ring.slot_count(), 3);
    assert_eq!(ring.semaphore_count(), 4);
    assert_eq!(context.extent(), Some(MAIN_SIZE));
}

#[rstest]
fn test_slot_reused_only_after_its_fence(mut manual: TestRenderer) {
    let data = empty_frame(MAIN_SIZE);
    for _ in 0..3 {
        manual.renderer.render(ViewportId::MAIN, &data).unwrap();
    }
    assert_eq!(manual.dummy.pending_submissions(), 3);

    // The fourth frame lands on slot 0, which needs frame 0 to be done.
    let first = manual.dummy.submissions()[0].clone();
    assert!(manual.dummy.complete_next_submission());
    manual.dummy.clear_history();
    manual.renderer.render(ViewportId::MAIN, &data).unwrap();

    let submissions = manual.dummy.submissions();
    let fourth = submissions.last().unwrap();
    assert_eq!(fourth.command_buffer, first.command_buffer);
    assert_eq!(fourth.fence, first.fence);
    assert_ne!(fourth.wait_semaphore, first.wait_semaphore);

    let fence = fourth.fence.unwrap();
    let events = manual.dummy.events();
    let waited = events
        .iter()
        .position(|e| *e == BackendEvent::FenceWaitFinished(fence))
        .unwrap();
    let begun = events
        .iter()
        .position(|e| *e == BackendEvent::CommandBufferBegun(fourth.command_buffer))
        .unwrap();
    let reset = events
        .iter()
        .position(|e| *e == BackendEvent::FenceReset(fence))
        .unwrap();
    assert!(waited < begun);
    assert!(begun < reset);

    manual.dummy.complete_all_submissions();
    manual.assert_no_violations();
}

#[rstest]
fn test_frame_records_single_render_pass(mut immediate: TestRenderer) {
    use redlilium_ui_renderer::backend::dummy::RecordedCommand;

    immediate
        .renderer
        .render(ViewportId::MAIN, &empty_frame(MAIN_SIZE))
        .unwrap();

    let commands = immediate.last_commands();
    let begins = commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::BeginRenderPass(_)))
        .count();
    assert_eq!(begins, 1);
    assert_eq!(commands.last(), Some(&RecordedCommand::EndRenderPass));
    assert!(draw_calls(&commands).is_empty());

    let context = immediate.renderer.viewports().get(ViewportId::MAIN).unwrap();
    assert_eq!(
        context.image_layout(0),
        Some(redlilium_ui_renderer::ImageLayout::PresentSrc)
    );
}

// ============================================================================
// Swapchain Recovery
// ============================================================================

#[rstest]
fn test_stale_acquire_skips_and_rebuilds(mut immediate: TestRenderer) {
    let data = empty_frame(MAIN_SIZE);
    immediate.dummy.script_acquire(ScriptedOutcome::Stale);

    let outcome = immediate.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::SurfaceStale));
    assert_eq!(immediate.dummy.submission_count(), 0);
    assert_eq!(immediate.dummy.present_count(), 0);
    assert_eq!(immediate.dummy.swapchains_created(), 2);

    let events = immediate.dummy.events();
    let created = events
        .iter()
        .rposition(|e| matches!(e, BackendEvent::SwapchainCreated(_)))
        .unwrap();
    let destroyed = events
        .iter()
        .position(|e| matches!(e, BackendEvent::SwapchainDestroyed(_)))
        .unwrap();
    // The old swapchain is handed to its replacement before it goes away.
    assert!(created < destroyed);

    let outcome = immediate.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            image_index: 0,
            suboptimal: false
        }
    );
    immediate.assert_no_violations();
}

#[rstest]
fn test_stale_present_is_reported_skipped(mut immediate: TestRenderer) {
    let data = empty_frame(MAIN_SIZE);
    immediate.dummy.script_present(ScriptedOutcome::Stale);

    let outcome = immediate.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::SurfaceStale));
    assert_eq!(immediate.dummy.submission_count(), 1);
    assert_eq!(immediate.dummy.present_count(), 0);
    assert_eq!(immediate.dummy.swapchains_created(), 2);

    assert!(matches!(
        immediate.renderer.render(ViewportId::MAIN, &data).unwrap(),
        FrameOutcome::Presented { .. }
    ));
    immediate.assert_no_violations();
}

#[rstest]
#[case::at_acquire(true)]
#[case::at_present(false)]
fn test_suboptimal_presents_then_rebuilds(mut immediate: TestRenderer, #[case] at_acquire: bool) {
    if at_acquire {
        immediate.dummy.script_acquire(ScriptedOutcome::Suboptimal);
    } else {
        immediate.dummy.script_present(ScriptedOutcome::Suboptimal);
    }

    let outcome = immediate
        .renderer
        .render(ViewportId::MAIN, &empty_frame(MAIN_SIZE))
        .unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            image_index: 0,
            suboptimal: true
        }
    );
    assert_eq!(immediate.dummy.present_count(), 1);
    assert_eq!(immediate.dummy.swapchains_created(), 2);
    immediate.assert_no_violations();
}

#[rstest]
fn test_device_errors_propagate(mut immediate: TestRenderer) {
    immediate
        .dummy
        .script_acquire(ScriptedOutcome::Fail(GraphicsError::DeviceLost));

    let result = immediate
        .renderer
        .render(ViewportId::MAIN, &empty_frame(MAIN_SIZE));
    assert_eq!(result, Err(GraphicsError::DeviceLost));
    assert_eq!(immediate.dummy.submission_count(), 0);
}

// ============================================================================
// Resize and Minimize
// ============================================================================

#[rstest]
#[case::grow(Extent2d::new(640, 480))]
#[case::shrink(Extent2d::new(16, 16))]
#[case::same(MAIN_SIZE)]
fn test_resize_returns_to_baseline(mut immediate: TestRenderer, #[case] size: Extent2d) {
    let baseline = immediate.dummy.live_handles();

    immediate.renderer.resize(ViewportId::MAIN, size).unwrap();
    let context = immediate.renderer.viewports().get(ViewportId::MAIN).unwrap();
    assert_eq!(context.extent(), Some(size));
    assert_eq!(immediate.dummy.live_handles(), baseline);

    immediate
        .renderer
        .resize(ViewportId::MAIN, MAIN_SIZE)
        .unwrap();
    assert_eq!(immediate.dummy.live_handles(), baseline);
    assert_eq!(immediate.dummy.live_handles().swapchains, 1);
    immediate.assert_no_violations();
}

#[rstest]
fn test_resize_waits_for_frames_in_flight(mut manual: TestRenderer) {
    let data = empty_frame(MAIN_SIZE);
    manual.renderer.render(ViewportId::MAIN, &data).unwrap();
    manual.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert_eq!(manual.dummy.pending_submissions(), 2);

    manual
        .renderer
        .resize(ViewportId::MAIN, Extent2d::new(100, 100))
        .unwrap();

    assert_eq!(manual.dummy.pending_submissions(), 0);
    assert!(manual.dummy.events().contains(&BackendEvent::WaitIdle));
    manual.assert_no_violations();
}

#[rstest]
fn test_minimized_viewport_skips_frames(mut immediate: TestRenderer) {
    let data = empty_frame(MAIN_SIZE);
    immediate
        .renderer
        .resize(ViewportId::MAIN, Extent2d::new(0, 0))
        .unwrap();

    let context = immediate.renderer.viewports().get(ViewportId::MAIN).unwrap();
    assert!(context.is_minimized());
    assert_eq!(context.swapchain(), None);
    assert_eq!(immediate.dummy.live_handles().swapchains, 0);
    assert_eq!(immediate.dummy.live_handles().surfaces, 1);

    let outcome = immediate.renderer.render(ViewportId::MAIN, &data).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Minimized));
    assert_eq!(immediate.dummy.submission_count(), 0);

    immediate
        .renderer
        .resize(ViewportId::MAIN, MAIN_SIZE)
        .unwrap();
    assert!(matches!(
        immediate.renderer.render(ViewportId::MAIN, &data).unwrap(),
        FrameOutcome::Presented { .. }
    ));
    immediate.assert_no_violations();
}

#[rstest]
fn test_empty_display_is_skipped(mut immediate: TestRenderer) {
    let outcome = immediate
        .renderer
        .render(ViewportId::MAIN, &empty_frame(Extent2d::new(0, 0)))
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Empty));
    assert_eq!(immediate.dummy.submission_count(), 0);
    assert!(
        !immediate
            .dummy
            .events()
            .iter()
            .any(|e| matches!(e, BackendEvent::Acquired { .. }))
    );
}

// ============================================================================
// Multiple Viewports
// ============================================================================

#[rstest]
fn test_secondary_windows_render_independently(mut immediate: TestRenderer) {
    let size = Extent2d::new(200, 100);
    let second = immediate
        .renderer
        .create_window(WindowHandle::new(2), size)
        .unwrap();
    assert_ne!(second, ViewportId::MAIN);
    assert_eq!(immediate.renderer.viewports().len(), 2);
    assert_eq!(immediate.dummy.live_handles().surfaces, 2);
    assert_eq!(immediate.dummy.live_handles().swapchains, 2);

    let main = immediate
        .renderer
        .render(ViewportId::MAIN, &empty_frame(MAIN_SIZE))
        .unwrap();
    let other = immediate
        .renderer
        .render(second, &empty_frame(size))
        .unwrap();
    assert!(matches!(main, FrameOutcome::Presented { image_index: 0, .. }));
    assert!(matches!(other, FrameOutcome::Presented { image_index: 0, .. }));

    let submissions = immediate.dummy.submissions();
    assert_eq!(submissions.len(), 2);
    assert_ne!(submissions[0].command_buffer, submissions[1].command_buffer);

    immediate.renderer.destroy_window(second).unwrap();
    assert_eq!(immediate.renderer.viewports().len(), 1);
    assert_eq!(immediate.dummy.live_handles().surfaces, 1);
    assert_eq!(immediate.dummy.live_handles().swapchains, 1);
    immediate.assert_no_violations();
}

#[rstest]
fn test_main_viewport_cannot_be_destroyed(mut immediate: TestRenderer) {
    assert!(matches!(
        immediate.renderer.destroy_window(ViewportId::MAIN),
        Err(GraphicsError::InvalidParameter(_))
    ));
    assert_eq!(immediate.renderer.viewports().len(), 1);
}

#[rstest]
fn test_unknown_viewport_is_rejected(mut immediate: TestRenderer) {
    let second = immediate
        .renderer
        .create_window(WindowHandle::new(2), MAIN_SIZE)
        .unwrap();
    immediate.renderer.destroy_window(second).unwrap();

    let data = empty_frame(MAIN_SIZE);
    assert!(matches!(
        immediate.renderer.render(second, &data),
        Err(GraphicsError::InvalidParameter(_))
    ));
    assert!(matches!(
        immediate.renderer.resize(second, MAIN_SIZE),
        Err(GraphicsError::InvalidParameter(_))
    ));
    assert!(immediate.renderer.destroy_window(second).is_err());
}

// ============================================================================
// Shutdown
// ============================================================================

#[rstest]
#[case::immediate(GpuCompletion::Immediate)]
#[case::manual(GpuCompletion::Manual)]
fn test_shutdown_releases_everything(#[case] completion: GpuCompletion) {
    let TestRenderer {
        dummy,
        mut renderer,
    } = TestRenderer::new(completion);
    let second = renderer
        .create_window(WindowHandle::new(2), Extent2d::new(64, 64))
        .unwrap();
    renderer.set_texture(FONT_TEXTURE, solid_texture(8, 8)).unwrap();
    renderer
        .render(ViewportId::MAIN, &frame_with(&[FONT_TEXTURE]))
        .unwrap();
    renderer.render(second, &empty_frame(Extent2d::new(64, 64))).unwrap();

    renderer.shutdown().unwrap();
    assert_eq!(dummy.pending_submissions(), 0);
    assert!(renderer.viewports().is_empty());
    // A second shutdown is a no-op.
    renderer.shutdown().unwrap();

    drop(renderer);
    assert_eq!(dummy.live_handles(), LiveHandleCounts::default());
    assert_eq!(dummy.memory_used(), 0);
    let violations = dummy.violations();
    assert!(violations.is_empty(), "usage violations: {violations:#?}");
}
