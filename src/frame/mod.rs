//! Per-viewport frame pacing.

mod ring;

pub use ring::{FrameRing, FrameSlot, SemaphorePair, SlotState};
