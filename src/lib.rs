//! Multi-part VR gesture stroke capture and combination recognition.
//!
//! Captures spatial motion (head + tracked controller/hand transforms)
//! as discrete strokes, routes each stroke to an independent tracking
//! channel ("part"), and combines the per-part results into a single
//! identified multi-part gesture.  Long-running engine operations
//! (train / load / save) are supervised without blocking the caller's
//! per-frame loop: background notifications are queued and drained once
//! per frame on the caller's thread.
//!
//! Layering, bottom up:
//! - [`math`] / [`sample`]: value types for motion samples and stroke
//!   summaries
//! - [`convert`]: coordinate-convention normalization between XR
//!   runtimes and the engine's database convention
//! - [`engine`]: the [`engine::GestureEngine`] boundary and a
//!   self-contained in-memory implementation
//! - [`channel`] / [`coordinator`] / [`supervisor`]: the per-part state
//!   machine, cross-part batch tracking, and async lifecycle supervision
//! - [`recognizer`]: the owning protocol object
//! - [`session`]: device-facing layer (trigger edges, hand-to-part
//!   mapping, completion events)

pub mod channel;
pub mod convert;
pub mod coordinator;
pub mod engine;
pub mod math;
pub mod recognizer;
pub mod sample;
pub mod session;
pub mod status;
pub mod supervisor;

pub use channel::{ChannelState, StrokeChannel};
pub use convert::{CoordinateSystem, XrPlugin};
pub use coordinator::{BatchDecision, CombinationCoordinator};
pub use engine::{
    BuiltinEngine, CombinationId, CompletedStroke, FrameOfReference, FrameOfReferenceSettings,
    GestureEngine, GestureId, NONE_ID,
};
pub use math::{Quat, RotationOrder, Vec3};
pub use recognizer::{CombinationOutcome, CombinationRecognizer, StrokeOutcome};
pub use sample::{StrokeSummary, TransformSample};
pub use session::{
    CompletedPart, FrameInput, GestureCompletion, MotionSession, SessionConfig, SessionMode, Side,
};
pub use status::{Result, Status};
pub use supervisor::{
    AsyncOperationSupervisor, OperationEvent, OperationKind, OperationStatus, ReportedValue,
};
