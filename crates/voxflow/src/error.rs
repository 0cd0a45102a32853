//! Error type shared by every stage of the tracking pipeline.
//!
//! Only fatal conditions are errors. "No match", "no displacement available"
//! and non-converged residual matching are reported as values.

use std::fmt;

/// Errors returned by input validation, persistence and the orchestration loop.
#[derive(Debug)]
pub enum TrackError {
    /// A channel's shape disagrees with the frame's label volume.
    ShapeMismatch {
        /// Frame index.
        frame: usize,
        /// Channel name (`"intensity"`, `"structure[1]"`, ...).
        channel: String,
        /// Shape of the reference label volume `[z, y, x]`.
        expected: [usize; 3],
        /// Shape actually provided.
        got: [usize; 3],
    },
    /// The distance-to-background map holds a negative value.
    NegativeDistance {
        /// Frame index.
        frame: usize,
        /// First offending voxel `[z, y, x]`.
        voxel: [usize; 3],
    },
    /// A floating-point channel holds NaN or infinity.
    NonFiniteInput {
        /// Frame index.
        frame: usize,
        /// Channel name.
        channel: String,
    },
    /// The sequence holds no frames.
    EmptySequence,
    /// A configuration value is out of its valid range.
    InvalidConfig(String),
    /// A frame index outside the sequence was requested.
    FrameOutOfRange {
        /// Requested frame.
        frame: usize,
        /// Number of frames available.
        n_frames: usize,
    },
    /// Flow records were appended out of frame order.
    FrameOrder {
        /// Last frame already present in the table.
        last: usize,
        /// Frame that was appended.
        got: usize,
    },
    /// Processing was cancelled between frame pairs.
    Cancelled {
        /// Number of frame pairs completed before cancellation.
        completed_pairs: usize,
    },
    /// A persisted file declares an unknown schema.
    UnsupportedSchema {
        /// Schema string found in the file.
        found: String,
        /// Schema string this build understands.
        expected: &'static str,
    },
    /// A persisted file is structurally malformed.
    MalformedFile(String),
    /// I/O failure while reading or writing a persisted artifact.
    Io(std::io::Error),
    /// JSON (de)serialization failure.
    Json(serde_json::Error),
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch {
                frame,
                channel,
                expected,
                got,
            } => write!(
                f,
                "frame {frame}: channel '{channel}' has shape {got:?}, expected {expected:?}"
            ),
            Self::NegativeDistance { frame, voxel } => {
                write!(f, "frame {frame}: negative distance value at voxel {voxel:?}")
            }
            Self::NonFiniteInput { frame, channel } => {
                write!(f, "frame {frame}: channel '{channel}' contains non-finite values")
            }
            Self::EmptySequence => write!(f, "sequence contains no frames"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::FrameOutOfRange { frame, n_frames } => {
                write!(f, "frame {frame} out of range (sequence has {n_frames} frames)")
            }
            Self::FrameOrder { last, got } => write!(
                f,
                "flow records must be appended in frame order: last frame {last}, got {got}"
            ),
            Self::Cancelled { completed_pairs } => {
                write!(f, "cancelled after {completed_pairs} frame pairs")
            }
            Self::UnsupportedSchema { found, expected } => {
                write!(f, "unsupported schema '{found}' (expected '{expected}')")
            }
            Self::MalformedFile(msg) => write!(f, "malformed file: {msg}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl std::error::Error for TrackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrackError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for TrackError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrackError>;
