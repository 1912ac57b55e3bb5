//! Gesture engine boundary.
//!
//! [`GestureEngine`] is the contract this crate consumes: stroke
//! accumulation, per-part identification, combination matching, training,
//! and persistence.  The capture protocol never looks inside the engine;
//! it only moves samples, paths, and status codes across this trait.
//!
//! [`builtin::BuiltinEngine`] is a self-contained in-memory
//! implementation so the protocol runs without a native recognition
//! library; a native adapter would implement the same trait.

pub mod builtin;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::math::RotationOrder;
use crate::sample::{StrokeSummary, TransformSample};
use crate::status::Result;

pub use builtin::BuiltinEngine;

// ── Identifiers ────────────────────────────────────────────

/// Engine-assigned gesture identifier.  Non-negative; `NONE_ID` is the
/// universal "none / unidentified" sentinel.
pub type GestureId = i32;

/// Engine-assigned combination identifier.
pub type CombinationId = i32;

/// The "none / unidentified" sentinel shared by gesture and combination
/// identifiers.
pub const NONE_ID: i32 = -1;

// ── Frame of reference ─────────────────────────────────────

/// Which point of view is used to interpret one rotational axis of a
/// sample: the user's head, or the fixed world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameOfReference {
    /// Relative to where the user is looking (default).
    #[default]
    Head,
    /// Relative to a room-fixed direction.
    World,
}

impl FrameOfReference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::World => "world",
        }
    }
}

/// Process-wide sample interpretation settings on the engine instance.
///
/// Must be set before samples are submitted to take effect for those
/// samples; changing them never retroactively affects already-submitted
/// strokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameOfReferenceSettings {
    /// Interpretation of "front/back" (looking left or right).
    pub yaw: FrameOfReference,
    /// Interpretation of "up/down" (looking up or down).
    pub pitch: FrameOfReference,
    /// Interpretation of head tilt.
    pub roll: FrameOfReference,
    /// Order in which Euler-angle rotations are applied.
    pub rotation_order: RotationOrder,
}

// ── Callbacks ──────────────────────────────────────────────

/// Training progress/finish callback: receives the recognition
/// performance (0.0–1.0).  May be invoked from the engine's own
/// background thread; it must do nothing but hand the value off.
pub type TrainingCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Async load/save completion callback: receives the operation's result
/// code (0 on success, a negative status code on failure).  Same
/// threading caveat as [`TrainingCallback`].
pub type CompletionCallback = Box<dyn Fn(i32) + Send + Sync>;

// ── Stroke results ─────────────────────────────────────────

/// What `end_stroke` reports for a completed stroke.
///
/// The summary is always populated, even when identification failed, so
/// the caller can visualize the captured path.
#[derive(Debug, Clone)]
pub struct CompletedStroke {
    /// In identification mode, the most similar gesture for this part
    /// alone (or the engine's failure code verbatim).  In recording
    /// mode, the gesture the sample was appended to.
    pub gesture: Result<GestureId>,
    /// Similarity of the performed stroke to the identified gesture
    /// (0.0–1.0); zero in recording mode and on failure.
    pub similarity: f64,
    /// Geometric summary of the captured path.
    pub summary: StrokeSummary,
}

// ── Engine contract ────────────────────────────────────────

/// Operations the capture/recognition protocol consumes.
///
/// All stroke-level methods are synchronous and must only be invoked
/// from the caller's single logical thread.  Training and the async
/// persistence variants may run on an engine-owned background thread and
/// report through the registered callbacks; those callbacks are the only
/// cross-thread boundary.
pub trait GestureEngine {
    /// Number of independently tracked parts (hands, segments, bones).
    fn number_of_parts(&self) -> usize;

    // ── Stroke capture ─────────────────────────────────────

    /// Begin a new stroke for `part`, anchored at the given head pose.
    /// `record_as_sample` binds the stroke to a gesture as a training
    /// example; `None` requests identification instead.
    fn start_stroke(
        &mut self,
        part: usize,
        head: TransformSample,
        record_as_sample: Option<GestureId>,
    ) -> Result<()>;

    /// Refresh the head reference for all in-progress strokes
    /// (head-motion compensation during gesturing).
    fn update_head_position(&mut self, head: TransformSample) -> Result<()>;

    /// Append a sample to the in-progress stroke of `part`.
    fn continue_stroke(&mut self, part: usize, sample: TransformSample) -> Result<()>;

    /// Finish the stroke of `part`: append (recording mode) or identify
    /// this part alone (identification mode), and report the path
    /// summary either way.
    fn end_stroke(&mut self, part: usize) -> Result<CompletedStroke>;

    /// Discard the in-progress stroke of `part` without identification
    /// or sample append.
    fn cancel_stroke(&mut self, part: usize) -> Result<()>;

    /// Whether a stroke is currently in progress for `part`.
    fn is_stroke_started(&self, part: usize) -> bool;

    /// Combine the per-part identification results accumulated since the
    /// last resolution into one combination identification.  Returns the
    /// combination ID (or [`NONE_ID`]) and a similarity in 0.0–1.0.
    fn identify_gesture_combination(&mut self) -> Result<(CombinationId, f64)>;

    // ── Registration & bookkeeping ─────────────────────────

    fn create_gesture(&mut self, part: usize, name: &str) -> Result<GestureId>;
    fn number_of_gestures(&self, part: usize) -> Result<usize>;
    fn gesture_name(&self, part: usize, gesture: GestureId) -> Result<String>;
    fn gesture_number_of_samples(&self, part: usize, gesture: GestureId) -> Result<usize>;
    fn delete_gesture_sample(
        &mut self,
        part: usize,
        gesture: GestureId,
        sample: usize,
    ) -> Result<()>;
    fn delete_all_gesture_samples(&mut self, part: usize, gesture: GestureId) -> Result<()>;
    fn delete_gesture(&mut self, part: usize, gesture: GestureId) -> Result<()>;
    fn delete_all_gestures(&mut self, part: usize) -> Result<()>;

    fn create_gesture_combination(&mut self, name: &str) -> Result<CombinationId>;
    fn number_of_gesture_combinations(&self) -> usize;
    fn combination_name(&self, combination: CombinationId) -> Result<String>;
    fn delete_gesture_combination(&mut self, combination: CombinationId) -> Result<()>;

    /// Declare which gesture `combination` expects for `part`.
    fn set_combination_part_gesture(
        &mut self,
        combination: CombinationId,
        part: usize,
        gesture: GestureId,
    ) -> Result<()>;

    /// Which gesture `combination` expects for `part` (`None` if unset).
    fn combination_part_gesture(
        &self,
        combination: CombinationId,
        part: usize,
    ) -> Result<Option<GestureId>>;

    // ── Training ───────────────────────────────────────────

    /// Start training on the engine's own thread.  Progress and the
    /// final result arrive through the registered callbacks.
    fn start_training(&mut self) -> Result<()>;
    fn is_training(&self) -> bool;
    /// Ask training to stop early (cooperative); still produces exactly
    /// one finish notification with the best result so far.
    fn stop_training(&mut self);
    /// Recognition performance of the current model (0.0–1.0).
    fn recognition_score(&self) -> f64;

    /// Maximum training duration in seconds, enforced by the engine.
    fn max_training_time(&self) -> u64;
    fn set_max_training_time(&mut self, seconds: u64);

    fn set_training_update_callback(&mut self, callback: Option<TrainingCallback>);
    fn set_training_finish_callback(&mut self, callback: Option<TrainingCallback>);

    // ── Persistence ────────────────────────────────────────

    fn save_to_file(&mut self, path: &Path) -> Result<()>;
    fn load_from_file(&mut self, path: &Path) -> Result<()>;
    fn save_to_buffer(&self) -> Result<Vec<u8>>;
    fn load_from_buffer(&mut self, buffer: &[u8]) -> Result<()>;

    /// Non-blocking save; completion arrives through the saving
    /// callback.
    fn save_to_file_async(&mut self, path: &Path) -> Result<()>;
    /// Non-blocking load; completion arrives through the loading
    /// callback.
    fn load_from_file_async(&mut self, path: &Path) -> Result<()>;

    fn set_loading_finish_callback(&mut self, callback: Option<CompletionCallback>);
    fn set_saving_finish_callback(&mut self, callback: Option<CompletionCallback>);

    // ── Configuration ──────────────────────────────────────

    fn frame_of_reference(&self) -> FrameOfReferenceSettings;
    fn set_frame_of_reference(&mut self, settings: FrameOfReferenceSettings);
}
