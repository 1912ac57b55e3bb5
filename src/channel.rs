//! Per-part stroke capture state machine.
//!
//! Each tracked part owns one [`StrokeChannel`]: it gates every stroke
//! operation on the channel's state before the engine sees it, so an
//! out-of-order call fails fast instead of corrupting the engine's
//! stroke accumulation.  Exclusivity needs no locks: an operation that
//! is invalid in the current state is rejected, never blocked.

use tracing::debug;

use crate::engine::{CompletedStroke, GestureEngine, GestureId};
use crate::sample::TransformSample;
use crate::status::{Result, Status};

/// Capture lifecycle of one part.
#[derive(Debug, Clone, Default)]
pub enum ChannelState {
    /// No stroke in progress.
    #[default]
    Idle,
    /// Capturing a training example bound to a gesture.
    Recording { gesture: GestureId },
    /// Capturing a stroke to be identified.
    Identifying,
    /// Last stroke finished; holds its result until the next start.
    Completed(CompletedStroke),
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording { .. } => "recording",
            Self::Identifying => "identifying",
            Self::Completed(_) => "completed",
        }
    }
}

/// State machine for one part's capture lifecycle.
#[derive(Debug, Default)]
pub struct StrokeChannel {
    part: usize,
    state: ChannelState,
}

impl StrokeChannel {
    pub fn new(part: usize) -> Self {
        Self { part, state: ChannelState::Idle }
    }

    pub fn part(&self) -> usize {
        self.part
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Whether a stroke is currently being captured.
    pub fn is_capturing(&self) -> bool {
        matches!(
            self.state,
            ChannelState::Recording { .. } | ChannelState::Identifying
        )
    }

    /// Result of the most recently completed stroke, if any.
    pub fn last_result(&self) -> Option<&CompletedStroke> {
        match &self.state {
            ChannelState::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// Begin a new stroke anchored at `head`.  `record_as` binds the
    /// stroke to a gesture as a training example; `None` requests
    /// identification.  Fails with `StrokeNotFinished` while a stroke is
    /// already in progress.
    pub fn start_stroke<E: GestureEngine>(
        &mut self,
        engine: &mut E,
        head: TransformSample,
        record_as: Option<GestureId>,
    ) -> Result<()> {
        if self.is_capturing() {
            return Err(Status::StrokeNotFinished);
        }
        engine.start_stroke(self.part, head, record_as)?;
        self.state = match record_as {
            Some(gesture) => ChannelState::Recording { gesture },
            None => ChannelState::Identifying,
        };
        debug!(part = self.part, state = self.state.as_str(), "stroke started");
        Ok(())
    }

    /// Forward a sample to the in-progress stroke.  No state change; may
    /// be called any number of times, including zero.
    pub fn continue_stroke<E: GestureEngine>(
        &mut self,
        engine: &mut E,
        sample: TransformSample,
    ) -> Result<()> {
        if !self.is_capturing() {
            return Err(Status::StrokeNotStarted);
        }
        engine.continue_stroke(self.part, sample)
    }

    /// Finish the in-progress stroke and transition to `Completed`.
    pub fn end_stroke<E: GestureEngine>(&mut self, engine: &mut E) -> Result<CompletedStroke> {
        if !self.is_capturing() {
            return Err(Status::StrokeNotStarted);
        }
        let completed = engine.end_stroke(self.part)?;
        debug!(
            part = self.part,
            gesture = ?completed.gesture,
            scale = completed.summary.scale,
            "stroke ended"
        );
        self.state = ChannelState::Completed(completed.clone());
        Ok(completed)
    }

    /// Discard the in-progress stroke (or the held result) and return to
    /// `Idle`.  Invalid while already `Idle`.
    pub fn cancel_stroke<E: GestureEngine>(&mut self, engine: &mut E) -> Result<()> {
        match self.state {
            ChannelState::Idle => Err(Status::StrokeNotStarted),
            ChannelState::Completed(_) => {
                self.state = ChannelState::Idle;
                Ok(())
            }
            _ => {
                engine.cancel_stroke(self.part)?;
                debug!(part = self.part, "stroke cancelled");
                self.state = ChannelState::Idle;
                Ok(())
            }
        }
    }
}
