//! Status-code taxonomy shared by the whole capture/recognition boundary.
//!
//! Every engine operation reports its outcome as a plain integer code:
//! zero for success, a small negative number for a specific failure.
//! Codes cross the engine boundary verbatim, so the enum round-trips
//! losslessly to and from its numeric form.

use thiserror::Error;

/// Result alias for operations that fail with a [`Status`].
pub type Result<T> = std::result::Result<T, Status>;

/// Failure codes reported by the gesture engine and the capture layer.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    /// Invalid parameter(s) provided to the operation.
    #[error("invalid parameter")]
    InvalidParameter,
    /// Invalid part, gesture, or combination index.
    #[error("invalid index")]
    InvalidIndex,
    /// Invalid file path.
    #[error("invalid file path")]
    InvalidPath,
    /// Path points to a file that is not a valid gesture database.
    #[error("invalid file")]
    InvalidFile,
    /// Calculations failed due to numeric instability.
    #[error("numeric instability")]
    NumericInstability,
    /// The engine's internal state was corrupted.
    #[error("corrupted state")]
    CorruptedState,
    /// Not enough data (samples, gestures) for this operation.
    #[error("insufficient data")]
    InsufficientData,
    /// The operation cannot run while training is in progress.
    #[error("busy training")]
    BusyTraining,
    /// No gestures registered.
    #[error("no gestures registered")]
    NoGesturesRegistered,
    /// The trained model is inconsistent; re-training may help.
    #[error("inconsistent model")]
    InconsistentModel,
    /// File or object already exists and cannot be overwritten.
    #[error("already exists")]
    AlreadyExists,
    /// Stroke operation before `start_stroke`.
    #[error("stroke not started")]
    StrokeNotStarted,
    /// Stroke still in progress (missing `end_stroke`).
    #[error("stroke not finished")]
    StrokeNotFinished,
    /// The engine object is internally corrupted or inconsistent.
    #[error("object inconsistent")]
    ObjectInconsistent,
    /// A negative code outside the known taxonomy.
    #[error("engine error code {0}")]
    Other(i32),
}

impl Status {
    /// Numeric code for this status (always negative).
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParameter => -1,
            Self::InvalidIndex => -2,
            Self::InvalidPath => -3,
            Self::InvalidFile => -4,
            Self::NumericInstability => -5,
            Self::CorruptedState => -6,
            Self::InsufficientData => -7,
            Self::BusyTraining => -8,
            Self::NoGesturesRegistered => -9,
            Self::InconsistentModel => -10,
            Self::AlreadyExists => -11,
            Self::StrokeNotStarted => -12,
            Self::StrokeNotFinished => -13,
            Self::ObjectInconsistent => -14,
            Self::Other(code) => *code,
        }
    }

    /// Reconstruct a status from a negative engine code.
    ///
    /// Returns `None` for zero and positive codes (those are successes /
    /// identifiers, not failures).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            c if c >= 0 => None,
            -1 => Some(Self::InvalidParameter),
            -2 => Some(Self::InvalidIndex),
            -3 => Some(Self::InvalidPath),
            -4 => Some(Self::InvalidFile),
            -5 => Some(Self::NumericInstability),
            -6 => Some(Self::CorruptedState),
            -7 => Some(Self::InsufficientData),
            -8 => Some(Self::BusyTraining),
            -9 => Some(Self::NoGesturesRegistered),
            -10 => Some(Self::InconsistentModel),
            -11 => Some(Self::AlreadyExists),
            -12 => Some(Self::StrokeNotStarted),
            -13 => Some(Self::StrokeNotFinished),
            -14 => Some(Self::ObjectInconsistent),
            c => Some(Self::Other(c)),
        }
    }

    /// Whether this failure leaves the instance unusable (§7: the caller
    /// must discard and recreate it).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CorruptedState | Self::ObjectInconsistent)
    }
}

/// Convert a raw engine return code into a `Result`: non-negative codes
/// pass through (identifiers, counts), negative codes become errors.
pub fn check_code(code: i32) -> Result<i32> {
    match Status::from_code(code) {
        Some(status) => Err(status),
        None => Ok(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in -14..0 {
            let status = Status::from_code(code).expect("negative code maps to a status");
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_unknown_code_passthrough() {
        let status = Status::from_code(-99).unwrap();
        assert_eq!(status, Status::Other(-99));
        assert_eq!(status.code(), -99);
    }

    #[test]
    fn test_non_negative_is_success() {
        assert_eq!(Status::from_code(0), None);
        assert_eq!(Status::from_code(7), None);
        assert_eq!(check_code(5), Ok(5));
        assert_eq!(check_code(-12), Err(Status::StrokeNotStarted));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(Status::CorruptedState.is_terminal());
        assert!(Status::ObjectInconsistent.is_terminal());
        assert!(!Status::InsufficientData.is_terminal());
        assert!(!Status::BusyTraining.is_terminal());
    }
}
