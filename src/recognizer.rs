//! Combination recognizer: the owning object of the capture protocol.
//!
//! Owns the engine, one [`StrokeChannel`] per part, the
//! [`CombinationCoordinator`], and the [`AsyncOperationSupervisor`].
//! Channels live exactly as long as this object; the coordinator only
//! holds part indices into the channel set.
//!
//! There is no ambient instance: callers hold and pass this value
//! explicitly.  One recognizer drives one engine; the engine is not
//! safe for concurrent use by two recognizers.

use std::path::Path;

use tracing::{debug, info};

use crate::channel::{ChannelState, StrokeChannel};
use crate::coordinator::{BatchDecision, CombinationCoordinator};
use crate::engine::{CombinationId, FrameOfReferenceSettings, GestureEngine, GestureId};
use crate::math::{Quat, Vec3};
use crate::sample::{StrokeSummary, TransformSample};
use crate::status::{Result, Status};
use crate::supervisor::{AsyncOperationSupervisor, OperationEvent, OperationKind};

/// Result of a combination resolution: the identified combination and
/// its similarity, or the engine's failure code verbatim.
pub type CombinationOutcome = Result<(CombinationId, f64)>;

/// What `end_stroke` hands back to the caller.
#[derive(Debug, Clone)]
pub struct StrokeOutcome {
    /// Which part finished.
    pub part: usize,
    /// Geometric summary of the captured path (always present).
    pub summary: StrokeSummary,
    /// Per-part result: appended-to gesture (recording) or identified
    /// gesture (identifying), or the engine's failure code.
    pub gesture: Result<GestureId>,
    /// Similarity of this part's stroke to the identified gesture
    /// (zero in recording mode and on failure).
    pub similarity: f64,
    /// Present when this end closed the batch: the combination
    /// identification, run exactly once per batch.
    pub combination: Option<CombinationOutcome>,
}

/// Drives stroke capture across all parts and resolves combinations.
pub struct CombinationRecognizer<E: GestureEngine> {
    engine: E,
    channels: Vec<StrokeChannel>,
    coordinator: CombinationCoordinator,
    supervisor: AsyncOperationSupervisor,
}

impl<E: GestureEngine> CombinationRecognizer<E> {
    /// Take ownership of an engine and wire its notification callbacks
    /// into the supervisor queue.  The callbacks do nothing but enqueue;
    /// they are safe to invoke from the engine's background thread.
    pub fn new(mut engine: E) -> Self {
        let supervisor = AsyncOperationSupervisor::new();

        let tx = supervisor.sender();
        engine.set_training_update_callback(Some(Box::new(move |performance| {
            tx.send(OperationEvent::TrainingProgress(performance)).ok();
        })));
        let tx = supervisor.sender();
        engine.set_training_finish_callback(Some(Box::new(move |performance| {
            tx.send(OperationEvent::TrainingFinished(performance)).ok();
        })));
        let tx = supervisor.sender();
        engine.set_loading_finish_callback(Some(Box::new(move |code| {
            tx.send(OperationEvent::LoadFinished(code)).ok();
        })));
        let tx = supervisor.sender();
        engine.set_saving_finish_callback(Some(Box::new(move |code| {
            tx.send(OperationEvent::SaveFinished(code)).ok();
        })));

        let parts = engine.number_of_parts();
        Self {
            engine,
            channels: (0..parts).map(StrokeChannel::new).collect(),
            coordinator: CombinationCoordinator::new(parts),
            supervisor,
        }
    }

    pub fn number_of_parts(&self) -> usize {
        self.channels.len()
    }

    /// Current state of one part's channel.
    pub fn channel_state(&self, part: usize) -> Option<&ChannelState> {
        self.channels.get(part).map(StrokeChannel::state)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    // ── Stroke protocol ────────────────────────────────────

    /// Begin a stroke for `part`, anchored at the given head pose.
    pub fn start_stroke(
        &mut self,
        part: usize,
        head: TransformSample,
        record_as: Option<GestureId>,
    ) -> Result<()> {
        let channel = self.channels.get_mut(part).ok_or(Status::InvalidIndex)?;
        channel.start_stroke(&mut self.engine, head, record_as)?;
        self.coordinator.note_started(part);
        Ok(())
    }

    /// Forward a sample (quaternion orientation) to `part`'s stroke.
    pub fn continue_stroke(&mut self, part: usize, sample: TransformSample) -> Result<()> {
        let channel = self.channels.get_mut(part).ok_or(Status::InvalidIndex)?;
        channel.continue_stroke(&mut self.engine, sample)
    }

    /// Forward a sample whose orientation is given as Euler angles
    /// (radians), applied in the configured rotation order.
    pub fn continue_stroke_euler(
        &mut self,
        part: usize,
        position: Vec3,
        angles: Vec3,
    ) -> Result<()> {
        let order = self.engine.frame_of_reference().rotation_order;
        let orientation = Quat::from_euler(order, angles.x, angles.y, angles.z);
        self.continue_stroke(part, TransformSample::new(position, orientation))
    }

    /// Forward a sample given as a 4x4 column-major transform matrix.
    pub fn continue_stroke_matrix(&mut self, part: usize, matrix: &[[f64; 4]; 4]) -> Result<()> {
        let (position, orientation) = crate::math::decompose_transform(matrix);
        self.continue_stroke(part, TransformSample::new(position, orientation))
    }

    /// Refresh the head reference for all in-progress strokes.
    pub fn update_head_position(&mut self, head: TransformSample) -> Result<()> {
        self.engine.update_head_position(head)
    }

    /// Finish `part`'s stroke.  If this was the last active part of the
    /// batch, the combination identification runs exactly once and its
    /// outcome (or error code, verbatim) rides along.
    pub fn end_stroke(&mut self, part: usize) -> Result<StrokeOutcome> {
        let channel = self.channels.get_mut(part).ok_or(Status::InvalidIndex)?;
        let completed = channel.end_stroke(&mut self.engine)?;
        let combination = match self.coordinator.note_ended(part) {
            BatchDecision::Resolve => Some(self.resolve()),
            BatchDecision::Discard => {
                self.coordinator.reset();
                None
            }
            BatchDecision::Pending => None,
        };
        Ok(StrokeOutcome {
            part,
            summary: completed.summary,
            gesture: completed.gesture,
            similarity: completed.similarity,
            combination,
        })
    }

    /// Cancel `part`'s stroke.  Local to that part; if the cancellation
    /// closed a batch in which other parts already finished, the
    /// combination still resolves from those results.
    pub fn cancel_stroke(&mut self, part: usize) -> Result<Option<CombinationOutcome>> {
        let channel = self.channels.get_mut(part).ok_or(Status::InvalidIndex)?;
        channel.cancel_stroke(&mut self.engine)?;
        match self.coordinator.note_cancelled(part) {
            BatchDecision::Resolve => Ok(Some(self.resolve())),
            BatchDecision::Discard => {
                self.coordinator.reset();
                Ok(None)
            }
            BatchDecision::Pending => Ok(None),
        }
    }

    fn resolve(&mut self) -> CombinationOutcome {
        let outcome = self.engine.identify_gesture_combination();
        self.coordinator.reset();
        match &outcome {
            Ok((combination, similarity)) => {
                info!(combination, similarity, "combination resolved");
            }
            Err(status) => {
                debug!(%status, "combination identification failed");
            }
        }
        outcome
    }

    // ── Registration ───────────────────────────────────────

    pub fn create_gesture(&mut self, part: usize, name: &str) -> Result<GestureId> {
        self.engine.create_gesture(part, name)
    }

    pub fn number_of_gestures(&self, part: usize) -> Result<usize> {
        self.engine.number_of_gestures(part)
    }

    pub fn gesture_name(&self, part: usize, gesture: GestureId) -> Result<String> {
        self.engine.gesture_name(part, gesture)
    }

    pub fn gesture_number_of_samples(&self, part: usize, gesture: GestureId) -> Result<usize> {
        self.engine.gesture_number_of_samples(part, gesture)
    }

    pub fn create_gesture_combination(&mut self, name: &str) -> Result<CombinationId> {
        self.engine.create_gesture_combination(name)
    }

    pub fn combination_name(&self, combination: CombinationId) -> Result<String> {
        self.engine.combination_name(combination)
    }

    pub fn set_combination_part_gesture(
        &mut self,
        combination: CombinationId,
        part: usize,
        gesture: GestureId,
    ) -> Result<()> {
        self.engine
            .set_combination_part_gesture(combination, part, gesture)
    }

    pub fn combination_part_gesture(
        &self,
        combination: CombinationId,
        part: usize,
    ) -> Result<Option<GestureId>> {
        self.engine.combination_part_gesture(combination, part)
    }

    // ── Training ───────────────────────────────────────────

    /// Start training.  Single-flight: fails with `BusyTraining` while a
    /// training run is in progress.  Progress and the finish arrive via
    /// [`CombinationRecognizer::update`].
    pub fn start_training(&mut self) -> Result<()> {
        self.supervisor.begin(OperationKind::Train)?;
        if let Err(status) = self.engine.start_training() {
            self.supervisor.abort(OperationKind::Train);
            return Err(status);
        }
        Ok(())
    }

    /// Ask training to stop early (cooperative).  Exactly one finish
    /// notification still arrives, carrying the best result so far.
    pub fn stop_training(&mut self) {
        self.engine.stop_training();
    }

    pub fn is_training(&self) -> bool {
        self.engine.is_training()
    }

    pub fn recognition_score(&self) -> f64 {
        self.engine.recognition_score()
    }

    // ── Persistence ────────────────────────────────────────

    pub fn save_file(&mut self, path: &Path) -> Result<()> {
        self.engine.save_to_file(path)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        self.engine.load_from_file(path)?;
        self.sync_parts();
        Ok(())
    }

    pub fn save_buffer(&self) -> Result<Vec<u8>> {
        self.engine.save_to_buffer()
    }

    pub fn load_buffer(&mut self, buffer: &[u8]) -> Result<()> {
        self.engine.load_from_buffer(buffer)?;
        self.sync_parts();
        Ok(())
    }

    /// Non-blocking save; the completion code arrives via
    /// [`CombinationRecognizer::update`] as a `SaveFinished` event.
    pub fn save_file_async(&mut self, path: &Path) -> Result<()> {
        self.supervisor.begin(OperationKind::Save)?;
        if let Err(status) = self.engine.save_to_file_async(path) {
            self.supervisor.abort(OperationKind::Save);
            return Err(status);
        }
        Ok(())
    }

    /// Non-blocking load; the completion code arrives via
    /// [`CombinationRecognizer::update`] as a `LoadFinished` event.
    pub fn load_file_async(&mut self, path: &Path) -> Result<()> {
        self.supervisor.begin(OperationKind::Load)?;
        if let Err(status) = self.engine.load_from_file_async(path) {
            self.supervisor.abort(OperationKind::Load);
            return Err(status);
        }
        Ok(())
    }

    // ── Per-frame pump ─────────────────────────────────────

    /// Drain pending operation notifications.  Call once per frame, on
    /// the caller's thread only; this is the single place background
    /// results become visible.
    pub fn update(&mut self) -> Vec<OperationEvent> {
        let events = self.supervisor.drain();
        if events
            .iter()
            .any(|e| matches!(e, OperationEvent::LoadFinished(0)))
        {
            // A completed load may have changed the part count
            self.sync_parts();
        }
        events
    }

    // ── Configuration ──────────────────────────────────────

    pub fn frame_of_reference(&self) -> FrameOfReferenceSettings {
        self.engine.frame_of_reference()
    }

    pub fn set_frame_of_reference(&mut self, settings: FrameOfReferenceSettings) {
        self.engine.set_frame_of_reference(settings);
    }

    pub fn max_training_time(&self) -> u64 {
        self.engine.max_training_time()
    }

    pub fn set_max_training_time(&mut self, seconds: u64) {
        self.engine.set_max_training_time(seconds);
    }

    fn sync_parts(&mut self) {
        let parts = self.engine.number_of_parts();
        if parts != self.channels.len() {
            info!(parts, "part count changed, rebuilding channels");
            self.channels = (0..parts).map(StrokeChannel::new).collect();
            self.coordinator.resize(parts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BuiltinEngine;
    use std::time::{Duration, Instant};

    fn head() -> TransformSample {
        TransformSample::new(Vec3::new(0.0, 1.6, 0.0), Quat::IDENTITY)
    }

    fn horizontal(i: usize) -> TransformSample {
        TransformSample::new(Vec3::new(i as f64 * 0.1, 1.0, 0.4), Quat::IDENTITY)
    }

    fn vertical(i: usize) -> TransformSample {
        TransformSample::new(Vec3::new(0.2, 1.0 + i as f64 * 0.1, 0.4), Quat::IDENTITY)
    }

    fn recognizer(parts: usize) -> CombinationRecognizer<BuiltinEngine> {
        CombinationRecognizer::new(BuiltinEngine::new(parts))
    }

    /// Pump `update` until a finish event for `kind` arrives.
    fn pump_until_finish(
        recognizer: &mut CombinationRecognizer<BuiltinEngine>,
        kind: OperationKind,
    ) -> Vec<OperationEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut all = Vec::new();
        while Instant::now() < deadline {
            all.extend(recognizer.update());
            if all.iter().any(|e| e.kind() == kind && e.is_finish()) {
                return all;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("no finish notification for {:?}", kind.as_str());
    }

    fn stroke(
        recognizer: &mut CombinationRecognizer<BuiltinEngine>,
        part: usize,
        record_as: Option<GestureId>,
        samples: &[TransformSample],
    ) -> StrokeOutcome {
        recognizer.start_stroke(part, head(), record_as).unwrap();
        for sample in samples {
            recognizer.continue_stroke(part, *sample).unwrap();
        }
        recognizer.end_stroke(part).unwrap()
    }

    #[test]
    fn test_invalid_part_index() {
        let mut r = recognizer(2);
        assert_eq!(
            r.start_stroke(7, head(), None),
            Err(Status::InvalidIndex)
        );
        assert_eq!(
            r.continue_stroke(7, horizontal(0)),
            Err(Status::InvalidIndex)
        );
    }

    #[test]
    fn test_record_train_identify_roundtrip() {
        let mut r = recognizer(2);
        let wave_left = r.create_gesture(0, "wave left").unwrap();
        let wave_right = r.create_gesture(1, "wave right").unwrap();
        let combo = r.create_gesture_combination("wave").unwrap();
        r.set_combination_part_gesture(combo, 0, wave_left).unwrap();
        r.set_combination_part_gesture(combo, 1, wave_right).unwrap();

        let left_path: Vec<_> = (0..12).map(horizontal).collect();
        let right_path: Vec<_> = (0..12).map(vertical).collect();
        for _ in 0..5 {
            stroke(&mut r, 0, Some(wave_left), &left_path);
            stroke(&mut r, 1, Some(wave_right), &right_path);
        }
        assert_eq!(r.gesture_number_of_samples(0, wave_left).unwrap(), 5);

        r.start_training().unwrap();
        let events = pump_until_finish(&mut r, OperationKind::Train);
        let performance = events
            .iter()
            .find_map(|e| match e {
                OperationEvent::TrainingFinished(p) => Some(*p),
                _ => None,
            })
            .unwrap();
        assert!(performance > 0.0);
        assert!(!r.is_training());

        // Identification on both parts: one resolution, after the last end
        r.start_stroke(0, head(), None).unwrap();
        r.start_stroke(1, head(), None).unwrap();
        for i in 0..12 {
            r.continue_stroke(0, horizontal(i)).unwrap();
            r.continue_stroke(1, vertical(i)).unwrap();
        }
        let first = r.end_stroke(0).unwrap();
        assert_eq!(first.gesture, Ok(wave_left));
        assert!(first.combination.is_none());

        let second = r.end_stroke(1).unwrap();
        assert_eq!(second.gesture, Ok(wave_right));
        let (id, similarity) = second.combination.unwrap().unwrap();
        assert_eq!(id, combo);
        assert!(similarity >= 0.0);
        assert_eq!(r.combination_name(id).unwrap(), "wave");
    }

    #[test]
    fn test_combination_error_surfaced_verbatim() {
        let mut r = recognizer(1);
        r.create_gesture(0, "only").unwrap();
        // Untrained identification: per-part failure, and the batch
        // resolution error code passes through unchanged
        let outcome = stroke(&mut r, 0, None, &[horizontal(0), horizontal(1)]);
        assert_eq!(outcome.gesture, Err(Status::InsufficientData));
        assert_eq!(outcome.combination, Some(Err(Status::NoGesturesRegistered)));
    }

    #[test]
    fn test_cancel_closing_batch_resolves_from_remaining() {
        let mut r = recognizer(2);
        r.create_gesture(0, "g0").unwrap();
        r.start_stroke(0, head(), None).unwrap();
        r.start_stroke(1, head(), None).unwrap();
        let first = r.end_stroke(0).unwrap();
        assert!(first.combination.is_none());
        // Cancelling the last active part closes the batch; part 0's
        // result still resolves
        let resolution = r.cancel_stroke(1).unwrap();
        assert!(resolution.is_some());
    }

    #[test]
    fn test_cancel_only_part_discards_batch() {
        let mut r = recognizer(2);
        r.start_stroke(0, head(), None).unwrap();
        let resolution = r.cancel_stroke(0).unwrap();
        assert!(resolution.is_none());
        // A fresh batch works afterwards
        r.start_stroke(0, head(), None).unwrap();
        r.end_stroke(0).unwrap();
    }

    #[test]
    fn test_training_busy() {
        let mut r = recognizer(1);
        let g = r.create_gesture(0, "g").unwrap();
        stroke(&mut r, 0, Some(g), &[horizontal(0), horizontal(1), horizontal(2)]);

        r.start_training().unwrap();
        assert_eq!(r.start_training(), Err(Status::BusyTraining));
        pump_until_finish(&mut r, OperationKind::Train);
        // After the finish was consumed, training may start again
        r.start_training().unwrap();
        pump_until_finish(&mut r, OperationKind::Train);
    }

    #[test]
    fn test_training_precondition_rolls_back_supervisor() {
        let mut r = recognizer(1);
        assert_eq!(r.start_training(), Err(Status::NoGesturesRegistered));
        // The failed start must not leave the slot Running
        assert_eq!(r.start_training(), Err(Status::NoGesturesRegistered));
    }

    #[test]
    fn test_load_missing_file_keeps_instance_usable() {
        let mut r = recognizer(2);
        r.start_stroke(0, head(), None).unwrap();
        assert_eq!(
            r.load_file(Path::new("missing.dat")),
            Err(Status::InvalidPath)
        );
        // Channel states unaffected: the stroke is still in progress
        r.continue_stroke(0, horizontal(1)).unwrap();
        r.end_stroke(0).unwrap();
    }

    #[test]
    fn test_async_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.dat");

        let mut r = recognizer(2);
        r.create_gesture(0, "g").unwrap();
        r.save_file_async(&path).unwrap();
        let events = pump_until_finish(&mut r, OperationKind::Save);
        assert!(events.contains(&OperationEvent::SaveFinished(0)));

        let mut fresh = recognizer(0);
        fresh.load_file_async(&path).unwrap();
        let events = pump_until_finish(&mut fresh, OperationKind::Load);
        assert!(events.contains(&OperationEvent::LoadFinished(0)));
        // Channels rebuilt to the loaded part count
        assert_eq!(fresh.number_of_parts(), 2);
    }

    #[test]
    fn test_async_load_missing_reports_code() {
        let mut r = recognizer(1);
        r.load_file_async(Path::new("missing.dat")).unwrap();
        let events = pump_until_finish(&mut r, OperationKind::Load);
        assert!(events.contains(&OperationEvent::LoadFinished(
            Status::InvalidPath.code()
        )));
    }

    #[test]
    fn test_euler_and_matrix_continuation() {
        let mut r = recognizer(1);
        let g = r.create_gesture(0, "g").unwrap();
        r.start_stroke(0, head(), Some(g)).unwrap();
        r.continue_stroke_euler(0, Vec3::new(0.1, 1.0, 0.4), Vec3::ZERO)
            .unwrap();
        let m = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.2, 1.0, 0.4, 1.0],
        ];
        r.continue_stroke_matrix(0, &m).unwrap();
        let outcome = r.end_stroke(0).unwrap();
        assert_eq!(outcome.gesture, Ok(g));
    }
}
