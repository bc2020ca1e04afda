// THEORY:
// The frame buffer is the only memory the pipeline has. It holds exactly one
// preprocessed frame: the one from the immediately preceding cycle. It is never
// edited in place. Each cycle hands it a freshly built frame and the old one is
// dropped (or returned to the caller), so a reader can never observe a frame
// that is halfway through being overwritten.
//
// Two flavours exist:
// - `FrameBuffer` is owned by a single synchronous pipeline; no locking.
// - `SharedFrameBuffer` is the handoff point for the parallel pipeline. The
//   stored frame sits behind an `Arc`, and replacing it is a pointer swap under
//   a short write lock.

use crate::core_modules::frame::PreprocessedFrame;
use crate::error::PipelineError;
use std::sync::{Arc, PoisonError, RwLock};

/// Single-owner store for the previous preprocessed frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    previous: Option<Arc<PreprocessedFrame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { previous: None }
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    pub fn get(&self) -> Option<&PreprocessedFrame> {
        self.previous.as_deref()
    }

    pub fn set(&mut self, frame: PreprocessedFrame) {
        self.previous = Some(Arc::new(frame));
    }

    /// Stores `frame` and returns the frame it displaced.
    pub fn replace(&mut self, frame: PreprocessedFrame) -> Option<Arc<PreprocessedFrame>> {
        self.previous.replace(Arc::new(frame))
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Cloneable handle to a previous-frame slot shared between tasks.
#[derive(Debug, Clone, Default)]
pub struct SharedFrameBuffer {
    slot: Arc<RwLock<Option<Arc<PreprocessedFrame>>>>,
}

impl SharedFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_previous(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// A cheap snapshot of the stored frame; it stays valid after later swaps.
    pub fn get(&self) -> Option<Arc<PreprocessedFrame>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically installs `frame` and returns the frame it displaced.
    pub fn replace(&self, frame: Arc<PreprocessedFrame>) -> Option<Arc<PreprocessedFrame>> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame)
    }

    /// Like `replace`, but refuses a frame whose size differs from the stored one.
    ///
    /// The size check and the swap happen under one write lock, so concurrent
    /// callers cannot both slip a mismatching frame past the check.
    pub fn replace_matching(
        &self,
        frame: Arc<PreprocessedFrame>,
    ) -> Result<Option<Arc<PreprocessedFrame>>, PipelineError> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.as_ref() {
            let (expected_width, expected_height) = previous.dimensions();
            let (actual_width, actual_height) = frame.dimensions();
            if (expected_width, expected_height) != (actual_width, actual_height) {
                return Err(PipelineError::DimensionMismatch {
                    expected_width,
                    expected_height,
                    actual_width,
                    actual_height,
                });
            }
        }
        Ok(slot.replace(frame))
    }

    pub fn reset(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
