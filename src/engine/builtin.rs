//! Self-contained in-memory gesture engine.
//!
//! Implements [`GestureEngine`] without a native recognition library:
//! strokes are resampled into fixed-length, centered, scale-normalized
//! paths and matched against per-gesture centroids.  Training runs on a
//! background thread and reports through the registered callbacks, and
//! the model persists as an opaque JSON blob.  Useful for development,
//! tests, and platforms where the optimized native engine is absent.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::math::{Quat, Vec3};
use crate::sample::{StrokeSummary, TransformSample};
use crate::status::{Result, Status};

use super::{
    CombinationId, CompletedStroke, CompletionCallback, FrameOfReference,
    FrameOfReferenceSettings, GestureEngine, GestureId, TrainingCallback, NONE_ID,
};

/// Fixed number of points every stroke is resampled to.
const RESAMPLE_POINTS: usize = 16;

/// Number of training passes reported as progress.
const TRAINING_EPOCHS: usize = 5;

/// Pause between training passes, so stop requests are observable.
const EPOCH_PAUSE: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Persisted model ────────────────────────────────────────

/// A stroke reduced to a fixed-length normalized path.
type Feature = Vec<Vec3>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Gesture {
    name: String,
    samples: Vec<Feature>,
    /// Mean of `samples`, computed by training.
    centroid: Option<Feature>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PartModel {
    gestures: Vec<Gesture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Combination {
    name: String,
    /// Expected gesture per part; `None` where unset.
    expected: Vec<Option<GestureId>>,
}

/// Everything the engine persists: registered gestures and samples per
/// part, combination definitions, interpretation settings, and the
/// trained centroids.  The on-disk form is an opaque blob owned by this
/// engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Model {
    parts: Vec<PartModel>,
    combinations: Vec<Combination>,
    frame: FrameOfReferenceSettings,
    score: f64,
    trained: bool,
}

impl Model {
    fn total_samples(&self) -> usize {
        self.parts
            .iter()
            .flat_map(|p| p.gestures.iter())
            .map(|g| g.samples.len())
            .sum()
    }

    fn total_gestures(&self) -> usize {
        self.parts.iter().map(|p| p.gestures.len()).sum()
    }

    fn part(&self, part: usize) -> Result<&PartModel> {
        self.parts.get(part).ok_or(Status::InvalidIndex)
    }

    fn part_mut(&mut self, part: usize) -> Result<&mut PartModel> {
        self.parts.get_mut(part).ok_or(Status::InvalidIndex)
    }

    fn gesture(&self, part: usize, gesture: GestureId) -> Result<&Gesture> {
        usize::try_from(gesture)
            .ok()
            .and_then(|i| self.part(part).ok()?.gestures.get(i))
            .ok_or(Status::InvalidIndex)
    }

    fn gesture_mut(&mut self, part: usize, gesture: GestureId) -> Result<&mut Gesture> {
        usize::try_from(gesture)
            .ok()
            .and_then(|i| self.part_mut(part).ok()?.gestures.get_mut(i))
            .ok_or(Status::InvalidIndex)
    }

    /// Recompute all centroids and return the recognition performance:
    /// the fraction of training samples whose nearest centroid belongs
    /// to their own gesture.
    fn train_pass(&mut self) -> f64 {
        for part in &mut self.parts {
            for gesture in &mut part.gestures {
                gesture.centroid = mean_feature(&gesture.samples);
            }
        }
        let mut total = 0usize;
        let mut correct = 0usize;
        for part in &self.parts {
            for (id, gesture) in part.gestures.iter().enumerate() {
                for sample in &gesture.samples {
                    if let Some((nearest, _)) = nearest_centroid(part, sample) {
                        total += 1;
                        if nearest == id as GestureId {
                            correct += 1;
                        }
                    }
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        }
    }
}

/// Nearest trained gesture of a part, with similarity in 0.0–1.0.
fn nearest_centroid(part: &PartModel, feature: &Feature) -> Option<(GestureId, f64)> {
    let mut best: Option<(GestureId, f64)> = None;
    for (id, gesture) in part.gestures.iter().enumerate() {
        let centroid = match &gesture.centroid {
            Some(c) => c,
            None => continue,
        };
        let dist = feature_distance(feature, centroid);
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((id as GestureId, dist));
        }
    }
    best.map(|(id, dist)| (id, 1.0 / (1.0 + dist)))
}

/// Mean pointwise distance between two equal-length features.
fn feature_distance(a: &Feature, b: &Feature) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = (0..n).map(|i| a[i].distance(b[i])).sum();
    sum / n as f64
}

fn mean_feature(samples: &[Feature]) -> Option<Feature> {
    if samples.is_empty() {
        return None;
    }
    let mut mean = vec![Vec3::ZERO; RESAMPLE_POINTS];
    for sample in samples {
        for (m, p) in mean.iter_mut().zip(sample.iter()) {
            *m = m.add(*p);
        }
    }
    let inv = 1.0 / samples.len() as f64;
    Some(mean.into_iter().map(|p| p.scale(inv)).collect())
}

// ── Stroke geometry ────────────────────────────────────────

/// Center, scale-normalize, and arc-length-resample a path to
/// `RESAMPLE_POINTS` points.
fn resample_normalized(points: &[Vec3]) -> Feature {
    if points.is_empty() {
        return vec![Vec3::ZERO; RESAMPLE_POINTS];
    }
    let centroid = centroid_of(points);
    let mut centered: Vec<Vec3> = points.iter().map(|p| p.sub(centroid)).collect();
    let scale = centered
        .iter()
        .map(|p| p.length())
        .fold(0.0f64, f64::max);
    if scale > 1e-12 {
        let inv = 1.0 / scale;
        for p in &mut centered {
            *p = p.scale(inv);
        }
    }
    if centered.len() == 1 {
        return vec![centered[0]; RESAMPLE_POINTS];
    }

    let mut cumulative = Vec::with_capacity(centered.len());
    let mut total = 0.0;
    cumulative.push(0.0);
    for pair in centered.windows(2) {
        total += pair[0].distance(pair[1]);
        cumulative.push(total);
    }
    if total < 1e-12 {
        return vec![centered[0]; RESAMPLE_POINTS];
    }

    let mut resampled = Vec::with_capacity(RESAMPLE_POINTS);
    let mut segment = 0usize;
    for i in 0..RESAMPLE_POINTS {
        let target = total * i as f64 / (RESAMPLE_POINTS - 1) as f64;
        while segment + 1 < cumulative.len() - 1 && cumulative[segment + 1] < target {
            segment += 1;
        }
        let span = cumulative[segment + 1] - cumulative[segment];
        let t = if span > 1e-12 {
            (target - cumulative[segment]) / span
        } else {
            0.0
        };
        let a = centered[segment];
        let b = centered[segment + 1];
        resampled.push(a.add(b.sub(a).scale(t)));
    }
    resampled
}

fn centroid_of(points: &[Vec3]) -> Vec3 {
    let mut sum = Vec3::ZERO;
    for p in points {
        sum = sum.add(*p);
    }
    sum.scale(1.0 / points.len() as f64)
}

/// Principal axes of a point cloud via power iteration on the 3x3
/// covariance matrix.  Returns a right-handed orthonormal triple; falls
/// back to the world basis for degenerate clouds.
fn principal_axes(points: &[Vec3], centroid: Vec3) -> (Vec3, Vec3, Vec3) {
    if points.len() < 2 {
        return (Vec3::X, Vec3::Y, Vec3::Z);
    }
    let mut cov = [[0.0f64; 3]; 3];
    for p in points {
        let d = p.sub(centroid);
        let c = [d.x, d.y, d.z];
        for (i, ci) in c.iter().enumerate() {
            for (j, cj) in c.iter().enumerate() {
                cov[i][j] += ci * cj;
            }
        }
    }

    let dir0 = match power_iterate(&cov, None) {
        Some(v) => v,
        None => return (Vec3::X, Vec3::Y, Vec3::Z),
    };
    let dir1 = power_iterate(&cov, Some(dir0)).unwrap_or_else(|| orthogonal_to(dir0));
    let dir2 = dir0.cross(dir1);
    (dir0, dir1, dir2)
}

fn mat_vec(m: &[[f64; 3]; 3], v: Vec3) -> Vec3 {
    Vec3::new(
        m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
        m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
        m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
    )
}

/// Dominant eigenvector, optionally constrained orthogonal to `reject`.
fn power_iterate(m: &[[f64; 3]; 3], reject: Option<Vec3>) -> Option<Vec3> {
    let mut v = Vec3::new(1.0, 0.7, 0.4);
    for _ in 0..48 {
        if let Some(r) = reject {
            v = v.sub(r.scale(v.dot(r)));
        }
        let next = mat_vec(m, v);
        let len = next.length();
        if len < 1e-12 {
            break;
        }
        v = next.scale(1.0 / len);
    }
    if let Some(r) = reject {
        v = v.sub(r.scale(v.dot(r)));
    }
    let len = v.length();
    if len < 1e-9 {
        None
    } else {
        Some(v.scale(1.0 / len))
    }
}

fn orthogonal_to(v: Vec3) -> Vec3 {
    let candidate = if v.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    let ortho = candidate.sub(v.scale(candidate.dot(v)));
    let len = ortho.length();
    if len < 1e-9 {
        Vec3::Y
    } else {
        ortho.scale(1.0 / len)
    }
}

// ── Active strokes ─────────────────────────────────────────

/// Head anchor captured at stroke start: samples are interpreted
/// relative to it according to the frame-of-reference settings in effect
/// at that moment.
#[derive(Debug, Clone, Copy)]
struct HeadAnchor {
    origin: Vec3,
    unyaw: Quat,
}

impl HeadAnchor {
    fn new(head: TransformSample, frame: FrameOfReferenceSettings) -> Self {
        let unyaw = match frame.yaw {
            FrameOfReference::Head => Quat::from_y_rotation(-head.orientation.yaw()),
            FrameOfReference::World => Quat::IDENTITY,
        };
        Self { origin: head.position, unyaw }
    }

    fn relativize(&self, position: Vec3) -> Vec3 {
        self.unyaw.rotate(position.sub(self.origin))
    }
}

#[derive(Debug)]
struct ActiveStroke {
    record_as: Option<GestureId>,
    anchor: HeadAnchor,
    /// World-space positions, for the geometric summary.
    raw: Vec<Vec3>,
    /// Head-relative positions, for matching.
    relative: Vec<Vec3>,
}

// ── Engine ─────────────────────────────────────────────────

/// In-memory [`GestureEngine`] implementation.
pub struct BuiltinEngine {
    model: Arc<Mutex<Model>>,
    strokes: Vec<Option<ActiveStroke>>,
    /// Per-part identification results accumulated since the last
    /// combination resolution.
    part_results: Vec<Option<(GestureId, f64)>>,
    max_training_time: u64,
    training_active: Arc<AtomicBool>,
    training_stop: Arc<AtomicBool>,
    training_thread: Option<thread::JoinHandle<()>>,
    io_threads: Vec<thread::JoinHandle<()>>,
    update_cb: Arc<Mutex<Option<TrainingCallback>>>,
    finish_cb: Arc<Mutex<Option<TrainingCallback>>>,
    loading_cb: Arc<Mutex<Option<CompletionCallback>>>,
    saving_cb: Arc<Mutex<Option<CompletionCallback>>>,
}

impl BuiltinEngine {
    /// Create an engine tracking `parts` independent channels.
    pub fn new(parts: usize) -> Self {
        let model = Model {
            parts: (0..parts).map(|_| PartModel::default()).collect(),
            ..Model::default()
        };
        Self {
            model: Arc::new(Mutex::new(model)),
            strokes: (0..parts).map(|_| None).collect(),
            part_results: vec![None; parts],
            max_training_time: 0,
            training_active: Arc::new(AtomicBool::new(false)),
            training_stop: Arc::new(AtomicBool::new(false)),
            training_thread: None,
            io_threads: Vec::new(),
            update_cb: Arc::new(Mutex::new(None)),
            finish_cb: Arc::new(Mutex::new(None)),
            loading_cb: Arc::new(Mutex::new(None)),
            saving_cb: Arc::new(Mutex::new(None)),
        }
    }

    /// A load may have changed the part count; keep per-part slots in
    /// step with the model.
    fn sync_part_slots(&mut self, parts: usize) {
        if self.strokes.len() != parts {
            self.strokes = (0..parts).map(|_| None).collect();
            self.part_results = vec![None; parts];
        }
    }

    fn guard_training(&self) -> Result<()> {
        if self.training_active.load(Ordering::Acquire) {
            Err(Status::BusyTraining)
        } else {
            Ok(())
        }
    }

    /// Reap a finished training thread so a new one can start.
    fn reap_training_thread(&mut self) {
        if !self.training_active.load(Ordering::Acquire) {
            if let Some(handle) = self.training_thread.take() {
                let _ = handle.join();
            }
        }
    }

    fn load_model_bytes(bytes: &[u8]) -> Result<Model> {
        let model: Model =
            serde_json::from_slice(bytes).map_err(|_| Status::InvalidFile)?;
        // A blob whose combination tables disagree with its part count
        // was not written by this engine.
        for combination in &model.combinations {
            if combination.expected.len() != model.parts.len() {
                return Err(Status::InvalidFile);
            }
        }
        Ok(model)
    }

    fn install_model(&mut self, model: Model) {
        let parts = model.parts.len();
        *lock(&self.model) = model;
        self.sync_part_slots(parts);
        self.strokes.iter_mut().for_each(|s| *s = None);
        self.part_results.iter_mut().for_each(|r| *r = None);
    }
}

impl GestureEngine for BuiltinEngine {
    fn number_of_parts(&self) -> usize {
        lock(&self.model).parts.len()
    }

    fn start_stroke(
        &mut self,
        part: usize,
        head: TransformSample,
        record_as_sample: Option<GestureId>,
    ) -> Result<()> {
        self.guard_training()?;
        let frame = {
            let model = lock(&self.model);
            if part >= model.parts.len() {
                return Err(Status::InvalidIndex);
            }
            if let Some(gesture) = record_as_sample {
                model.gesture(part, gesture)?;
            }
            model.frame
        };
        self.sync_part_slots(self.number_of_parts());
        if self.strokes[part].is_some() {
            return Err(Status::StrokeNotFinished);
        }
        self.part_results[part] = None;
        self.strokes[part] = Some(ActiveStroke {
            record_as: record_as_sample,
            anchor: HeadAnchor::new(head, frame),
            raw: Vec::new(),
            relative: Vec::new(),
        });
        debug!(part, recording = record_as_sample.is_some(), "stroke started");
        Ok(())
    }

    fn update_head_position(&mut self, head: TransformSample) -> Result<()> {
        let frame = lock(&self.model).frame;
        for stroke in self.strokes.iter_mut().flatten() {
            stroke.anchor = HeadAnchor::new(head, frame);
        }
        Ok(())
    }

    fn continue_stroke(&mut self, part: usize, sample: TransformSample) -> Result<()> {
        if part >= self.strokes.len() {
            return Err(Status::InvalidIndex);
        }
        let stroke = self.strokes[part]
            .as_mut()
            .ok_or(Status::StrokeNotStarted)?;
        stroke.raw.push(sample.position);
        stroke.relative.push(stroke.anchor.relativize(sample.position));
        Ok(())
    }

    fn end_stroke(&mut self, part: usize) -> Result<CompletedStroke> {
        if part >= self.strokes.len() {
            return Err(Status::InvalidIndex);
        }
        let stroke = self.strokes[part]
            .take()
            .ok_or(Status::StrokeNotStarted)?;

        let summary = if stroke.raw.is_empty() {
            StrokeSummary::default()
        } else {
            let centroid = centroid_of(&stroke.raw);
            let scale = stroke
                .raw
                .iter()
                .map(|p| p.distance(centroid))
                .fold(0.0f64, f64::max);
            let (dir0, dir1, dir2) = principal_axes(&stroke.raw, centroid);
            StrokeSummary { position: centroid, scale, dir0, dir1, dir2 }
        };

        let feature = resample_normalized(&stroke.relative);
        let mut model = lock(&self.model);
        let mut similarity = 0.0;
        let gesture = match stroke.record_as {
            Some(id) => match model.gesture_mut(part, id) {
                Ok(entry) => {
                    entry.samples.push(feature);
                    debug!(part, gesture = id, samples = entry.samples.len(), "sample recorded");
                    Ok(id)
                }
                Err(status) => Err(status),
            },
            None => {
                let identified = if model.total_gestures() == 0 {
                    Err(Status::NoGesturesRegistered)
                } else if !model.trained {
                    Err(Status::InsufficientData)
                } else {
                    model
                        .part(part)
                        .ok()
                        .and_then(|p| nearest_centroid(p, &feature))
                        .ok_or(Status::InsufficientData)
                };
                match identified {
                    Ok((id, sim)) => {
                        self.part_results[part] = Some((id, sim));
                        similarity = sim;
                        Ok(id)
                    }
                    Err(status) => {
                        debug!(part, %status, "part identification failed");
                        Err(status)
                    }
                }
            }
        };
        Ok(CompletedStroke { gesture, similarity, summary })
    }

    fn cancel_stroke(&mut self, part: usize) -> Result<()> {
        if part >= self.strokes.len() {
            return Err(Status::InvalidIndex);
        }
        self.strokes[part]
            .take()
            .map(|_| ())
            .ok_or(Status::StrokeNotStarted)
    }

    fn is_stroke_started(&self, part: usize) -> bool {
        self.strokes.get(part).map_or(false, Option::is_some)
    }

    fn identify_gesture_combination(&mut self) -> Result<(CombinationId, f64)> {
        let model = lock(&self.model);
        if model.combinations.is_empty() {
            return Err(Status::NoGesturesRegistered);
        }
        if self.part_results.iter().all(Option::is_none) {
            return Err(Status::StrokeNotStarted);
        }

        let mut best: Option<(CombinationId, f64)> = None;
        for (id, combination) in model.combinations.iter().enumerate() {
            let mut similarity_sum = 0.0;
            let mut matched = 0usize;
            let mut mismatch = false;
            for (part, result) in self.part_results.iter().enumerate() {
                if let Some((gesture, similarity)) = result {
                    if combination.expected.get(part).copied().flatten() == Some(*gesture) {
                        similarity_sum += similarity;
                        matched += 1;
                    } else {
                        mismatch = true;
                        break;
                    }
                }
            }
            if mismatch || matched == 0 {
                continue;
            }
            let similarity = similarity_sum / matched as f64;
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((id as CombinationId, similarity));
            }
        }
        drop(model);

        // Tracking resets on resolution whether or not anything matched.
        self.part_results.iter_mut().for_each(|r| *r = None);
        Ok(best.unwrap_or((NONE_ID, 0.0)))
    }

    fn create_gesture(&mut self, part: usize, name: &str) -> Result<GestureId> {
        self.guard_training()?;
        let mut model = lock(&self.model);
        let gestures = &mut model.part_mut(part)?.gestures;
        gestures.push(Gesture { name: name.to_string(), ..Gesture::default() });
        Ok((gestures.len() - 1) as GestureId)
    }

    fn number_of_gestures(&self, part: usize) -> Result<usize> {
        Ok(lock(&self.model).part(part)?.gestures.len())
    }

    fn gesture_name(&self, part: usize, gesture: GestureId) -> Result<String> {
        Ok(lock(&self.model).gesture(part, gesture)?.name.clone())
    }

    fn gesture_number_of_samples(&self, part: usize, gesture: GestureId) -> Result<usize> {
        Ok(lock(&self.model).gesture(part, gesture)?.samples.len())
    }

    fn delete_gesture_sample(
        &mut self,
        part: usize,
        gesture: GestureId,
        sample: usize,
    ) -> Result<()> {
        self.guard_training()?;
        let mut model = lock(&self.model);
        let entry = model.gesture_mut(part, gesture)?;
        if sample >= entry.samples.len() {
            return Err(Status::InvalidIndex);
        }
        entry.samples.remove(sample);
        Ok(())
    }

    fn delete_all_gesture_samples(&mut self, part: usize, gesture: GestureId) -> Result<()> {
        self.guard_training()?;
        lock(&self.model).gesture_mut(part, gesture)?.samples.clear();
        Ok(())
    }

    fn delete_gesture(&mut self, part: usize, gesture: GestureId) -> Result<()> {
        self.guard_training()?;
        let mut model = lock(&self.model);
        let index = usize::try_from(gesture).map_err(|_| Status::InvalidIndex)?;
        let gestures = &mut model.part_mut(part)?.gestures;
        if index >= gestures.len() {
            return Err(Status::InvalidIndex);
        }
        gestures.remove(index);
        // Later gesture IDs shift down; combination expectations follow.
        for combination in &mut model.combinations {
            if let Some(slot) = combination.expected.get_mut(part) {
                match *slot {
                    Some(id) if id == gesture => *slot = None,
                    Some(id) if id > gesture => *slot = Some(id - 1),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn delete_all_gestures(&mut self, part: usize) -> Result<()> {
        self.guard_training()?;
        let mut model = lock(&self.model);
        model.part_mut(part)?.gestures.clear();
        for combination in &mut model.combinations {
            if let Some(slot) = combination.expected.get_mut(part) {
                *slot = None;
            }
        }
        Ok(())
    }

    fn create_gesture_combination(&mut self, name: &str) -> Result<CombinationId> {
        self.guard_training()?;
        let mut model = lock(&self.model);
        let parts = model.parts.len();
        model.combinations.push(Combination {
            name: name.to_string(),
            expected: vec![None; parts],
        });
        Ok((model.combinations.len() - 1) as CombinationId)
    }

    fn number_of_gesture_combinations(&self) -> usize {
        lock(&self.model).combinations.len()
    }

    fn combination_name(&self, combination: CombinationId) -> Result<String> {
        let model = lock(&self.model);
        usize::try_from(combination)
            .ok()
            .and_then(|i| model.combinations.get(i))
            .map(|c| c.name.clone())
            .ok_or(Status::InvalidIndex)
    }

    fn delete_gesture_combination(&mut self, combination: CombinationId) -> Result<()> {
        self.guard_training()?;
        let mut model = lock(&self.model);
        let index = usize::try_from(combination).map_err(|_| Status::InvalidIndex)?;
        if index >= model.combinations.len() {
            return Err(Status::InvalidIndex);
        }
        model.combinations.remove(index);
        Ok(())
    }

    fn set_combination_part_gesture(
        &mut self,
        combination: CombinationId,
        part: usize,
        gesture: GestureId,
    ) -> Result<()> {
        let mut model = lock(&self.model);
        if gesture != NONE_ID {
            model.gesture(part, gesture)?;
        } else if part >= model.parts.len() {
            return Err(Status::InvalidIndex);
        }
        let slot = usize::try_from(combination)
            .ok()
            .and_then(|i| model.combinations.get_mut(i))
            .and_then(|c| c.expected.get_mut(part))
            .ok_or(Status::InvalidIndex)?;
        *slot = (gesture != NONE_ID).then_some(gesture);
        Ok(())
    }

    fn combination_part_gesture(
        &self,
        combination: CombinationId,
        part: usize,
    ) -> Result<Option<GestureId>> {
        let model = lock(&self.model);
        usize::try_from(combination)
            .ok()
            .and_then(|i| model.combinations.get(i))
            .and_then(|c| c.expected.get(part))
            .copied()
            .ok_or(Status::InvalidIndex)
    }

    fn start_training(&mut self) -> Result<()> {
        self.guard_training()?;
        self.reap_training_thread();
        {
            let model = lock(&self.model);
            if model.total_gestures() == 0 {
                return Err(Status::NoGesturesRegistered);
            }
            if model.total_samples() == 0 {
                return Err(Status::InsufficientData);
            }
        }

        self.training_stop.store(false, Ordering::Release);
        self.training_active.store(true, Ordering::Release);

        let model = Arc::clone(&self.model);
        let active = Arc::clone(&self.training_active);
        let stop = Arc::clone(&self.training_stop);
        let update_cb = Arc::clone(&self.update_cb);
        let finish_cb = Arc::clone(&self.finish_cb);
        let max_seconds = self.max_training_time;

        info!("training started");
        self.training_thread = Some(thread::spawn(move || {
            let started = Instant::now();
            let mut best = 0.0;
            for epoch in 0..TRAINING_EPOCHS {
                if stop.load(Ordering::Acquire) {
                    debug!(epoch, "training stopped early");
                    break;
                }
                if max_seconds > 0 && started.elapsed() >= Duration::from_secs(max_seconds) {
                    debug!(epoch, "training time limit reached");
                    break;
                }
                let performance = lock(&model).train_pass();
                best = performance;
                if let Some(cb) = lock(&update_cb).as_ref() {
                    cb(performance);
                }
                thread::sleep(EPOCH_PAUSE);
            }
            {
                let mut model = lock(&model);
                model.score = best;
                model.trained = true;
            }
            active.store(false, Ordering::Release);
            info!(performance = best, "training finished");
            if let Some(cb) = lock(&finish_cb).as_ref() {
                cb(best);
            }
        }));
        Ok(())
    }

    fn is_training(&self) -> bool {
        self.training_active.load(Ordering::Acquire)
    }

    fn stop_training(&mut self) {
        self.training_stop.store(true, Ordering::Release);
    }

    fn recognition_score(&self) -> f64 {
        lock(&self.model).score
    }

    fn max_training_time(&self) -> u64 {
        self.max_training_time
    }

    fn set_max_training_time(&mut self, seconds: u64) {
        self.max_training_time = seconds;
    }

    fn set_training_update_callback(&mut self, callback: Option<TrainingCallback>) {
        *lock(&self.update_cb) = callback;
    }

    fn set_training_finish_callback(&mut self, callback: Option<TrainingCallback>) {
        *lock(&self.finish_cb) = callback;
    }

    fn save_to_file(&mut self, path: &Path) -> Result<()> {
        self.guard_training()?;
        let bytes = self.save_to_buffer()?;
        std::fs::write(path, bytes).map_err(|err| {
            warn!(?path, %err, "saving gesture database failed");
            Status::InvalidPath
        })
    }

    fn load_from_file(&mut self, path: &Path) -> Result<()> {
        self.guard_training()?;
        let bytes = std::fs::read(path).map_err(|err| {
            warn!(?path, %err, "reading gesture database failed");
            Status::InvalidPath
        })?;
        let model = Self::load_model_bytes(&bytes)?;
        info!(?path, parts = model.parts.len(), "gesture database loaded");
        self.install_model(model);
        Ok(())
    }

    fn save_to_buffer(&self) -> Result<Vec<u8>> {
        self.guard_training()?;
        serde_json::to_vec(&*lock(&self.model)).map_err(|_| Status::ObjectInconsistent)
    }

    fn load_from_buffer(&mut self, buffer: &[u8]) -> Result<()> {
        self.guard_training()?;
        let model = Self::load_model_bytes(buffer)?;
        self.install_model(model);
        Ok(())
    }

    fn save_to_file_async(&mut self, path: &Path) -> Result<()> {
        self.guard_training()?;
        let model = Arc::clone(&self.model);
        let callback = Arc::clone(&self.saving_cb);
        let path = path.to_path_buf();
        self.io_threads.push(thread::spawn(move || {
            let code = serde_json::to_vec(&*lock(&model))
                .map_err(|_| Status::ObjectInconsistent)
                .and_then(|bytes| {
                    std::fs::write(&path, bytes).map_err(|_| Status::InvalidPath)
                })
                .map_or_else(|status| status.code(), |_| 0);
            if let Some(cb) = lock(&callback).as_ref() {
                cb(code);
            }
        }));
        Ok(())
    }

    fn load_from_file_async(&mut self, path: &Path) -> Result<()> {
        self.guard_training()?;
        let model = Arc::clone(&self.model);
        let callback = Arc::clone(&self.loading_cb);
        let path = path.to_path_buf();
        self.io_threads.push(thread::spawn(move || {
            let code = std::fs::read(&path)
                .map_err(|_| Status::InvalidPath)
                .and_then(|bytes| Self::load_model_bytes(&bytes))
                .map_or_else(
                    |status| status.code(),
                    |loaded| {
                        *lock(&model) = loaded;
                        0
                    },
                );
            if let Some(cb) = lock(&callback).as_ref() {
                cb(code);
            }
        }));
        Ok(())
    }

    fn set_loading_finish_callback(&mut self, callback: Option<CompletionCallback>) {
        *lock(&self.loading_cb) = callback;
    }

    fn set_saving_finish_callback(&mut self, callback: Option<CompletionCallback>) {
        *lock(&self.saving_cb) = callback;
    }

    fn frame_of_reference(&self) -> FrameOfReferenceSettings {
        lock(&self.model).frame
    }

    fn set_frame_of_reference(&mut self, settings: FrameOfReferenceSettings) {
        lock(&self.model).frame = settings;
    }
}

impl Drop for BuiltinEngine {
    fn drop(&mut self) {
        self.training_stop.store(true, Ordering::Release);
        if let Some(handle) = self.training_thread.take() {
            let _ = handle.join();
        }
        for handle in self.io_threads.drain(..) {
            let _ = handle.join();
        }
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn head() -> TransformSample {
        TransformSample::new(Vec3::new(0.0, 1.6, 0.0), Quat::IDENTITY)
    }

    fn at(x: f64, y: f64, z: f64) -> TransformSample {
        TransformSample::new(Vec3::new(x, y, z), Quat::IDENTITY)
    }

    /// Record one stroke for `gesture` tracing the given path.
    fn record(engine: &mut BuiltinEngine, part: usize, gesture: GestureId, path: &[Vec3]) {
        engine.start_stroke(part, head(), Some(gesture)).unwrap();
        for p in path {
            engine
                .continue_stroke(part, TransformSample::new(*p, Quat::IDENTITY))
                .unwrap();
        }
        engine.end_stroke(part).unwrap();
    }

    fn line_x(n: usize) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::new(i as f64 * 0.1, 1.0, 0.5)).collect()
    }

    fn line_y(n: usize) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::new(0.2, 1.0 + i as f64 * 0.1, 0.5)).collect()
    }

    fn train_blocking(engine: &mut BuiltinEngine) -> f64 {
        let (tx, rx) = mpsc::channel();
        engine.set_training_finish_callback(Some(Box::new(move |perf| {
            tx.send(perf).ok();
        })));
        engine.start_training().unwrap();
        let performance = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        while engine.is_training() {
            thread::sleep(Duration::from_millis(1));
        }
        engine.set_training_finish_callback(None);
        performance
    }

    #[test]
    fn test_stroke_state_errors() {
        let mut engine = BuiltinEngine::new(2);
        assert_eq!(engine.continue_stroke(0, at(0.0, 0.0, 0.0)), Err(Status::StrokeNotStarted));
        assert!(matches!(engine.end_stroke(0), Err(Status::StrokeNotStarted)));
        assert_eq!(engine.cancel_stroke(1), Err(Status::StrokeNotStarted));
        assert_eq!(
            engine.start_stroke(5, head(), None),
            Err(Status::InvalidIndex)
        );

        engine.start_stroke(0, head(), None).unwrap();
        assert_eq!(
            engine.start_stroke(0, head(), None),
            Err(Status::StrokeNotFinished)
        );
        engine.cancel_stroke(0).unwrap();
        assert!(!engine.is_stroke_started(0));
    }

    #[test]
    fn test_record_appends_samples() {
        let mut engine = BuiltinEngine::new(1);
        let wave = engine.create_gesture(0, "wave").unwrap();
        record(&mut engine, 0, wave, &line_x(10));
        record(&mut engine, 0, wave, &line_x(10));
        assert_eq!(engine.gesture_number_of_samples(0, wave).unwrap(), 2);
    }

    #[test]
    fn test_record_invalid_gesture() {
        let mut engine = BuiltinEngine::new(1);
        assert_eq!(
            engine.start_stroke(0, head(), Some(3)),
            Err(Status::InvalidIndex)
        );
    }

    #[test]
    fn test_identify_untrained_fails() {
        let mut engine = BuiltinEngine::new(1);
        engine.create_gesture(0, "wave").unwrap();
        engine.start_stroke(0, head(), None).unwrap();
        let done = engine.end_stroke(0).unwrap();
        assert_eq!(done.gesture, Err(Status::InsufficientData));
    }

    #[test]
    fn test_train_and_identify() {
        let mut engine = BuiltinEngine::new(1);
        let swipe = engine.create_gesture(0, "swipe").unwrap();
        let raise = engine.create_gesture(0, "raise").unwrap();
        for _ in 0..5 {
            record(&mut engine, 0, swipe, &line_x(12));
            record(&mut engine, 0, raise, &line_y(12));
        }

        let performance = train_blocking(&mut engine);
        assert!(performance > 0.0);
        assert!(engine.recognition_score() > 0.0);

        engine.start_stroke(0, head(), None).unwrap();
        for p in line_x(12) {
            engine
                .continue_stroke(0, TransformSample::new(p, Quat::IDENTITY))
                .unwrap();
        }
        let done = engine.end_stroke(0).unwrap();
        assert_eq!(done.gesture, Ok(swipe));
        assert!(done.summary.scale > 0.0);
    }

    #[test]
    fn test_training_progress_then_finish() {
        let mut engine = BuiltinEngine::new(1);
        let g = engine.create_gesture(0, "g").unwrap();
        record(&mut engine, 0, g, &line_x(8));

        let (tx, rx) = mpsc::channel();
        let progress_tx = tx.clone();
        engine.set_training_update_callback(Some(Box::new(move |perf| {
            progress_tx.send(("update", perf)).ok();
        })));
        engine.set_training_finish_callback(Some(Box::new(move |perf| {
            tx.send(("finish", perf)).ok();
        })));
        engine.start_training().unwrap();
        assert_eq!(engine.start_training(), Err(Status::BusyTraining));

        let mut kinds = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok((kind, _)) => {
                    let finished = kind == "finish";
                    kinds.push(kind);
                    if finished {
                        break;
                    }
                }
                Err(err) => panic!("training never finished: {err}"),
            }
        }
        assert_eq!(kinds.last(), Some(&"finish"));
        assert_eq!(kinds.iter().filter(|k| **k == "finish").count(), 1);
    }

    #[test]
    fn test_training_preconditions() {
        let mut engine = BuiltinEngine::new(1);
        assert_eq!(engine.start_training(), Err(Status::NoGesturesRegistered));
        engine.create_gesture(0, "g").unwrap();
        assert_eq!(engine.start_training(), Err(Status::InsufficientData));
    }

    #[test]
    fn test_combination_matching() {
        let mut engine = BuiltinEngine::new(2);
        let left = engine.create_gesture(0, "wave left").unwrap();
        let right = engine.create_gesture(1, "wave right").unwrap();
        let combo = engine.create_gesture_combination("wave both").unwrap();
        engine.set_combination_part_gesture(combo, 0, left).unwrap();
        engine.set_combination_part_gesture(combo, 1, right).unwrap();
        assert_eq!(engine.combination_part_gesture(combo, 0).unwrap(), Some(left));

        for _ in 0..5 {
            record(&mut engine, 0, left, &line_x(12));
            record(&mut engine, 1, right, &line_y(12));
        }
        let performance = train_blocking(&mut engine);
        assert!(performance > 0.0);

        for (part, path) in [(0usize, line_x(12)), (1usize, line_y(12))] {
            engine.start_stroke(part, head(), None).unwrap();
            for p in path {
                engine
                    .continue_stroke(part, TransformSample::new(p, Quat::IDENTITY))
                    .unwrap();
            }
            let done = engine.end_stroke(part).unwrap();
            assert!(done.gesture.is_ok());
        }

        let (id, similarity) = engine.identify_gesture_combination().unwrap();
        assert_eq!(id, combo);
        assert!(similarity >= 0.0);

        // Tracking reset: a second resolution has nothing to combine.
        assert_eq!(
            engine.identify_gesture_combination(),
            Err(Status::StrokeNotStarted)
        );
    }

    #[test]
    fn test_load_missing_file() {
        let mut engine = BuiltinEngine::new(2);
        let err = engine
            .load_from_file(Path::new("definitely-missing.dat"))
            .unwrap_err();
        assert_eq!(err, Status::InvalidPath);
        // Instance stays usable
        engine.start_stroke(0, head(), None).unwrap();
        engine.cancel_stroke(0).unwrap();
    }

    #[test]
    fn test_load_garbage_buffer() {
        let mut engine = BuiltinEngine::new(1);
        assert_eq!(
            engine.load_from_buffer(b"not a gesture database"),
            Err(Status::InvalidFile)
        );
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gestures.dat");

        let mut engine = BuiltinEngine::new(2);
        let g = engine.create_gesture(0, "circle").unwrap();
        record(&mut engine, 0, g, &line_x(10));
        engine.save_to_file(&path).unwrap();

        let mut restored = BuiltinEngine::new(0);
        restored.load_from_file(&path).unwrap();
        assert_eq!(restored.number_of_parts(), 2);
        assert_eq!(restored.gesture_name(0, g).unwrap(), "circle");
        assert_eq!(restored.gesture_number_of_samples(0, g).unwrap(), 1);
    }

    #[test]
    fn test_async_save_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("async.dat");

        let mut engine = BuiltinEngine::new(1);
        let (tx, rx) = mpsc::channel();
        engine.set_saving_finish_callback(Some(Box::new(move |code| {
            tx.send(code).ok();
        })));
        engine.save_to_file_async(&path).unwrap();
        let code = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(code, 0);
        assert!(path.exists());
    }

    #[test]
    fn test_async_load_missing_reports_error_code() {
        let mut engine = BuiltinEngine::new(1);
        let (tx, rx) = mpsc::channel();
        engine.set_loading_finish_callback(Some(Box::new(move |code| {
            tx.send(code).ok();
        })));
        engine
            .load_from_file_async(Path::new("definitely-missing.dat"))
            .unwrap();
        let code = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(code, Status::InvalidPath.code());
    }

    #[test]
    fn test_delete_gesture_shifts_combination_expectations() {
        let mut engine = BuiltinEngine::new(1);
        let a = engine.create_gesture(0, "a").unwrap();
        let b = engine.create_gesture(0, "b").unwrap();
        let combo = engine.create_gesture_combination("combo").unwrap();
        engine.set_combination_part_gesture(combo, 0, b).unwrap();

        engine.delete_gesture(0, a).unwrap();
        assert_eq!(
            engine.combination_part_gesture(combo, 0).unwrap(),
            Some(b - 1)
        );
    }

    #[test]
    fn test_resample_empty_and_single() {
        assert_eq!(resample_normalized(&[]).len(), RESAMPLE_POINTS);
        let single = resample_normalized(&[Vec3::new(1.0, 2.0, 3.0)]);
        assert_eq!(single.len(), RESAMPLE_POINTS);
        // A single point normalizes to the origin
        assert!(single[0].length() < 1e-9);
    }

    #[test]
    fn test_principal_axes_of_line() {
        let points: Vec<Vec3> = (0..10).map(|i| Vec3::new(i as f64, 0.0, 0.0)).collect();
        let centroid = centroid_of(&points);
        let (dir0, _, _) = principal_axes(&points, centroid);
        assert!(dir0.x.abs() > 0.999, "primary axis should be X: {:?}", dir0);
    }
}
