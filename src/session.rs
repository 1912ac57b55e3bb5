//! Device-facing capture session.
//!
//! Maps hand sides onto part indices, converts every raw device sample
//! into the engine's coordinate convention before it reaches a channel,
//! runs the trigger-edge start/stop logic, and assembles completion
//! events when a gesture (or gesture combination) finishes.
//!
//! The session is one tagged object covering both shapes of the
//! protocol: [`SessionMode::SingleChannel`] identifies each stroke on
//! its own (one part, either hand claims it), while
//! [`SessionMode::MultiChannel`] routes each hand to its own part and
//! resolves a combination when the last hand finishes.

use tracing::{debug, warn};

use crate::convert::{
    convert_hand_sample, convert_head_sample, convert_output_sample, CoordinateSystem, XrPlugin,
};
use crate::engine::{CombinationId, GestureEngine, GestureId};
use crate::math::{Quat, Vec3};
use crate::recognizer::CombinationRecognizer;
use crate::sample::TransformSample;
use crate::status::Result;
use crate::supervisor::OperationEvent;

// ── Sides & modes ──────────────────────────────────────────

/// Which hand performed a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Shape of the capture protocol this session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// One part; each stroke is identified on its own.  Either hand may
    /// claim the stroke, one at a time.
    SingleChannel,
    /// One part per hand; a combination resolves when the last active
    /// hand finishes.
    MultiChannel,
}

/// Session wiring: coordinate conventions, hand-to-part mapping, and
/// trigger behavior.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Which XR runtime produces the raw transforms.
    pub plugin: XrPlugin,
    /// Which convention the engine (gesture database) uses internally.
    pub coordinate_system: CoordinateSystem,
    /// Part index the left hand drives (multi-channel mode).
    pub left_part: usize,
    /// Part index the right hand drives (multi-channel mode).
    pub right_part: usize,
    /// How strongly a trigger must be pressed (0–1) to start a stroke.
    /// The stroke ends when the trigger drops below 90% of this.
    pub trigger_threshold: f64,
    /// Continuously refresh the head reference while gesturing.
    pub compensate_head_motion: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            plugin: XrPlugin::default(),
            coordinate_system: CoordinateSystem::default(),
            left_part: 0,
            right_part: 1,
            trigger_threshold: 0.9,
            compensate_head_motion: false,
        }
    }
}

/// Raw device state for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput {
    pub head: TransformSample,
    pub left_hand: TransformSample,
    pub right_hand: TransformSample,
    /// Left trigger pressure, 0.0–1.0.
    pub left_trigger: f64,
    /// Right trigger pressure, 0.0–1.0.
    pub right_trigger: f64,
}

// ── Completion events ──────────────────────────────────────

/// Where and how one part's stroke was performed, in the runtime's
/// coordinate convention.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub side: Side,
    /// Centroid of the stroke path.
    pub position: Vec3,
    /// Scale at which the stroke was performed.
    pub scale: f64,
    /// Orientation of the stroke path.
    pub orientation: Quat,
    /// Primary axis of the performed gesture.
    pub primary_direction: Vec3,
    /// Secondary axis of the performed gesture.
    pub secondary_direction: Vec3,
}

/// Emitted when a gesture (single-channel) or combination
/// (multi-channel) finishes.
#[derive(Debug, Clone)]
pub struct GestureCompletion {
    /// Identified gesture/combination ID, or the engine's failure code
    /// verbatim.  [`crate::engine::NONE_ID`] means nothing matched.
    pub result: Result<i32>,
    /// Name of the identified gesture/combination, when one matched.
    pub name: Option<String>,
    /// Similarity of the performance to the identified entry (0.0–1.0).
    pub similarity: f64,
    /// Per-part stroke data, in the order the parts finished.
    pub parts: Vec<CompletedPart>,
}

// ── Session ────────────────────────────────────────────────

/// Per-frame capture driver over a [`CombinationRecognizer`].
pub struct MotionSession<E: GestureEngine> {
    recognizer: CombinationRecognizer<E>,
    mode: SessionMode,
    config: SessionConfig,
    /// Record samples for this combination instead of identifying
    /// (multi-channel mode).
    record_combination: Option<CombinationId>,
    /// Record samples for this gesture instead of identifying
    /// (single-channel mode).
    record_gesture: Option<GestureId>,
    left_active: bool,
    right_active: bool,
    pending_parts: Vec<CompletedPart>,
}

impl<E: GestureEngine> MotionSession<E> {
    pub fn new(recognizer: CombinationRecognizer<E>, mode: SessionMode, config: SessionConfig) -> Self {
        Self {
            recognizer,
            mode,
            config,
            record_combination: None,
            record_gesture: None,
            left_active: false,
            right_active: false,
            pending_parts: Vec::new(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn recognizer(&self) -> &CombinationRecognizer<E> {
        &self.recognizer
    }

    pub fn recognizer_mut(&mut self) -> &mut CombinationRecognizer<E> {
        &mut self.recognizer
    }

    /// Record upcoming multi-channel strokes as samples of this
    /// combination (each part records the gesture the combination
    /// expects of it).  `None` returns to identification.
    pub fn set_record_combination(&mut self, combination: Option<CombinationId>) {
        self.record_combination = combination;
    }

    /// Record upcoming single-channel strokes as samples of this
    /// gesture.  `None` returns to identification.
    pub fn set_record_gesture(&mut self, gesture: Option<GestureId>) {
        self.record_gesture = gesture;
    }

    /// Drain pending train/load/save notifications (delegates to the
    /// recognizer's per-frame pump).
    pub fn poll_operations(&mut self) -> Vec<OperationEvent> {
        self.recognizer.update()
    }

    /// Process one frame of device state.  Returns any completions that
    /// finished this frame.
    pub fn update(&mut self, input: &FrameInput) -> Vec<GestureCompletion> {
        match self.mode {
            SessionMode::SingleChannel => self.update_single(input),
            SessionMode::MultiChannel => self.update_multi(input),
        }
    }

    fn converted_head(&self, input: &FrameInput) -> TransformSample {
        convert_head_sample(self.config.coordinate_system, input.head)
    }

    fn converted_hand(&self, sample: TransformSample) -> TransformSample {
        convert_hand_sample(self.config.plugin, self.config.coordinate_system, sample)
    }

    fn release_threshold(&self) -> f64 {
        self.config.trigger_threshold * 0.9
    }

    // ── Single-channel mode ────────────────────────────────

    fn update_single(&mut self, input: &FrameInput) -> Vec<GestureCompletion> {
        let mut events = Vec::new();

        if !self.left_active && !self.right_active {
            if input.left_trigger >= self.config.trigger_threshold {
                self.left_active = true;
            } else if input.right_trigger >= self.config.trigger_threshold {
                self.right_active = true;
            } else {
                return events;
            }
            let head = self.converted_head(input);
            if let Err(status) = self.recognizer.start_stroke(0, head, self.record_gesture) {
                warn!(%status, "failed to start stroke");
                self.left_active = false;
                self.right_active = false;
                return events;
            }
        }

        let side = if self.left_active { Side::Left } else { Side::Right };
        let (trigger, hand) = match side {
            Side::Left => (input.left_trigger, input.left_hand),
            Side::Right => (input.right_trigger, input.right_hand),
        };

        if trigger > self.release_threshold() {
            self.compensate_head(input);
            let sample = self.converted_hand(hand);
            if let Err(status) = self.recognizer.continue_stroke(0, sample) {
                warn!(%status, "failed to continue stroke");
            }
            return events;
        }

        // Trigger released: the gesture ends here
        self.left_active = false;
        self.right_active = false;
        match self.recognizer.end_stroke(0) {
            Ok(outcome) => {
                let part = self.completed_part(side, &outcome.summary);
                let name = outcome
                    .gesture
                    .ok()
                    .and_then(|id| self.recognizer.gesture_name(0, id).ok());
                events.push(GestureCompletion {
                    result: outcome.gesture,
                    name,
                    similarity: outcome.similarity,
                    parts: vec![part],
                });
            }
            Err(status) => warn!(%status, "failed to end stroke"),
        }
        events
    }

    // ── Multi-channel mode ─────────────────────────────────

    fn update_multi(&mut self, input: &FrameInput) -> Vec<GestureCompletion> {
        let mut events = Vec::new();

        if !self.left_active && input.left_trigger >= self.config.trigger_threshold {
            self.start_side(Side::Left, input);
        }
        if !self.right_active && input.right_trigger >= self.config.trigger_threshold {
            self.start_side(Side::Right, input);
        }

        if self.left_active {
            self.drive_side(Side::Left, input.left_trigger, input.left_hand, input, &mut events);
        }
        if self.right_active {
            self.drive_side(Side::Right, input.right_trigger, input.right_hand, input, &mut events);
        }
        events
    }

    fn side_part(&self, side: Side) -> usize {
        match side {
            Side::Left => self.config.left_part,
            Side::Right => self.config.right_part,
        }
    }

    fn start_side(&mut self, side: Side, input: &FrameInput) {
        let part = self.side_part(side);
        // When recording a combination, each part records the gesture
        // that combination expects of it
        let record_as = self.record_combination.and_then(|combination| {
            self.recognizer
                .combination_part_gesture(combination, part)
                .ok()
                .flatten()
        });
        let head = self.converted_head(input);
        match self.recognizer.start_stroke(part, head, record_as) {
            Ok(()) => {
                debug!(side = side.as_str(), part, "hand stroke started");
                match side {
                    Side::Left => self.left_active = true,
                    Side::Right => self.right_active = true,
                }
            }
            Err(status) => warn!(side = side.as_str(), %status, "failed to start stroke"),
        }
    }

    fn drive_side(
        &mut self,
        side: Side,
        trigger: f64,
        hand: TransformSample,
        input: &FrameInput,
        events: &mut Vec<GestureCompletion>,
    ) {
        let part = self.side_part(side);
        if trigger > self.release_threshold() {
            self.compensate_head(input);
            let sample = self.converted_hand(hand);
            if let Err(status) = self.recognizer.continue_stroke(part, sample) {
                warn!(side = side.as_str(), %status, "failed to continue stroke");
            }
            return;
        }

        match side {
            Side::Left => self.left_active = false,
            Side::Right => self.right_active = false,
        }
        match self.recognizer.end_stroke(part) {
            Ok(outcome) => {
                let completed = self.completed_part(side, &outcome.summary);
                self.pending_parts.push(completed);
                if let Some(resolution) = outcome.combination {
                    let (result, similarity) = match resolution {
                        Ok((id, similarity)) => (Ok(id), similarity),
                        Err(status) => (Err(status), 0.0),
                    };
                    let name = result
                        .ok()
                        .and_then(|id| self.recognizer.combination_name(id).ok());
                    events.push(GestureCompletion {
                        result,
                        name,
                        similarity,
                        parts: std::mem::take(&mut self.pending_parts),
                    });
                }
            }
            Err(status) => warn!(side = side.as_str(), %status, "failed to end stroke"),
        }
    }

    // ── Shared helpers ─────────────────────────────────────

    fn compensate_head(&mut self, input: &FrameInput) {
        if self.config.compensate_head_motion {
            let head = self.converted_head(input);
            if let Err(status) = self.recognizer.update_head_position(head) {
                warn!(%status, "failed to update head position");
            }
        }
    }

    fn completed_part(
        &self,
        side: Side,
        summary: &crate::sample::StrokeSummary,
    ) -> CompletedPart {
        let converted = convert_output_sample(
            self.config.coordinate_system,
            TransformSample::new(summary.position, summary.orientation()),
        );
        CompletedPart {
            side,
            position: converted.position,
            scale: summary.scale,
            orientation: converted.orientation,
            primary_direction: converted.orientation.rotate(Vec3::X),
            secondary_direction: converted.orientation.rotate(Vec3::Y),
        }
    }
}
