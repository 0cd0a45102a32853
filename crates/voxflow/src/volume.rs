//! Dense per-frame inputs consumed from upstream segmentation stages.
//!
//! All volumes are `[z, y, x]` arrays. A 2-D time-lapse is represented with
//! depth 1. Voxel enumeration is always C order (z, then y, then x); every
//! index handed to later stages refers to that order.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// Integer voxel coordinate `[z, y, x]`.
pub type Voxel = [usize; 3];

/// Floating-point coordinate or vector `[z, y, x]`.
pub type Vec3 = [f64; 3];

/// Physical voxel size in micrometers per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub z: f64,
    pub y: f64,
    pub x: f64,
}

impl Scaling {
    pub fn new(z: f64, y: f64, x: f64) -> Self {
        Self { z, y, x }
    }

    pub fn isotropic(s: f64) -> Self {
        Self::new(s, s, s)
    }

    pub fn as_array(&self) -> Vec3 {
        [self.z, self.y, self.x]
    }

    /// Scale a voxel-space point into physical units.
    #[inline]
    pub fn to_physical(&self, p: Vec3) -> Vec3 {
        [p[0] * self.z, p[1] * self.y, p[2] * self.x]
    }

    #[inline]
    pub fn voxel_to_physical(&self, v: Voxel) -> Vec3 {
        self.to_physical(voxel_to_vec(v))
    }

    /// Euclidean distance between two voxel-space points, in physical units.
    #[inline]
    pub fn distance(&self, a: Vec3, b: Vec3) -> f64 {
        let dz = (a[0] - b[0]) * self.z;
        let dy = (a[1] - b[1]) * self.y;
        let dx = (a[2] - b[2]) * self.x;
        (dz * dz + dy * dy + dx * dx).sqrt()
    }

    pub fn validate(&self) -> Result<()> {
        for (axis, v) in [("z", self.z), ("y", self.y), ("x", self.x)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(TrackError::InvalidConfig(format!(
                    "scaling.{axis} must be finite and > 0 (got {v})"
                )));
            }
        }
        Ok(())
    }
}

impl Default for Scaling {
    fn default() -> Self {
        Self::isotropic(1.0)
    }
}

#[inline]
pub fn voxel_to_vec(v: Voxel) -> Vec3 {
    [v[0] as f64, v[1] as f64, v[2] as f64]
}

#[inline]
pub(crate) fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub(crate) fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub(crate) fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn shape_of<T>(a: &Array3<T>) -> [usize; 3] {
    let (z, y, x) = a.dim();
    [z, y, x]
}

/// Upstream data for one time frame.
#[derive(Debug, Clone)]
pub struct FrameInputs {
    /// Instance-segmented foreground (0 = background).
    pub labels: Array3<u32>,
    /// Raw intensity.
    pub intensity: Array3<f32>,
    /// Structure-strength channels (e.g. vesselness), in descriptor order.
    pub structure: Vec<Array3<f32>>,
    /// Sparse landmark voxels.
    pub markers: Array3<bool>,
    /// Distance-to-background map (0 outside the foreground).
    pub distance: Array3<f32>,
}

impl FrameInputs {
    pub fn new(
        labels: Array3<u32>,
        intensity: Array3<f32>,
        markers: Array3<bool>,
        distance: Array3<f32>,
    ) -> Self {
        Self {
            labels,
            intensity,
            structure: Vec::new(),
            markers,
            distance,
        }
    }

    pub fn with_structure(mut self, structure: Vec<Array3<f32>>) -> Self {
        self.structure = structure;
        self
    }

    pub fn shape(&self) -> [usize; 3] {
        shape_of(&self.labels)
    }

    /// Check channel shapes and value ranges for frame `frame`.
    pub fn validate(&self, frame: usize, expected: [usize; 3]) -> Result<()> {
        let check = |channel: String, got: [usize; 3]| -> Result<()> {
            if got != expected {
                return Err(TrackError::ShapeMismatch {
                    frame,
                    channel,
                    expected,
                    got,
                });
            }
            Ok(())
        };
        check("labels".to_string(), shape_of(&self.labels))?;
        check("intensity".to_string(), shape_of(&self.intensity))?;
        check("markers".to_string(), shape_of(&self.markers))?;
        check("distance".to_string(), shape_of(&self.distance))?;
        for (i, s) in self.structure.iter().enumerate() {
            check(format!("structure[{i}]"), shape_of(s))?;
        }

        if self.intensity.iter().any(|v| !v.is_finite()) {
            return Err(TrackError::NonFiniteInput {
                frame,
                channel: "intensity".to_string(),
            });
        }
        for (i, s) in self.structure.iter().enumerate() {
            if s.iter().any(|v| !v.is_finite()) {
                return Err(TrackError::NonFiniteInput {
                    frame,
                    channel: format!("structure[{i}]"),
                });
            }
        }
        for ((z, y, x), &d) in self.distance.indexed_iter() {
            if !d.is_finite() {
                return Err(TrackError::NonFiniteInput {
                    frame,
                    channel: "distance".to_string(),
                });
            }
            if d < 0.0 {
                return Err(TrackError::NegativeDistance {
                    frame,
                    voxel: [z, y, x],
                });
            }
        }
        Ok(())
    }
}

/// A time-lapse sequence of frames sharing one shape and voxel scaling.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub frames: Vec<FrameInputs>,
    pub scaling: Scaling,
    /// Seconds between consecutive frames.
    pub frame_interval_s: f64,
}

impl Sequence {
    pub fn new(frames: Vec<FrameInputs>, scaling: Scaling, frame_interval_s: f64) -> Self {
        Self {
            frames,
            scaling,
            frame_interval_s,
        }
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn shape(&self) -> Option<[usize; 3]> {
        self.frames.first().map(FrameInputs::shape)
    }

    pub fn frame(&self, t: usize) -> Result<&FrameInputs> {
        self.frames.get(t).ok_or(TrackError::FrameOutOfRange {
            frame: t,
            n_frames: self.frames.len(),
        })
    }

    /// Validate the whole sequence before any processing begins.
    pub fn validate(&self) -> Result<()> {
        let expected = self.shape().ok_or(TrackError::EmptySequence)?;
        self.scaling.validate()?;
        if !self.frame_interval_s.is_finite() || self.frame_interval_s <= 0.0 {
            return Err(TrackError::InvalidConfig(format!(
                "frame_interval_s must be finite and > 0 (got {})",
                self.frame_interval_s
            )));
        }
        let n_structure = self.frames[0].structure.len();
        for (t, frame) in self.frames.iter().enumerate() {
            if frame.structure.len() != n_structure {
                return Err(TrackError::InvalidConfig(format!(
                    "frame {t} has {} structure channels, frame 0 has {n_structure}",
                    frame.structure.len()
                )));
            }
            frame.validate(t, expected)?;
        }
        Ok(())
    }
}

/// Foreground voxels of a label volume, in C order.
pub fn foreground_voxels(labels: &Array3<u32>) -> Vec<Voxel> {
    labels
        .indexed_iter()
        .filter(|(_, &l)| l > 0)
        .map(|((z, y, x), _)| [z, y, x])
        .collect()
}

/// Marker voxels, in C order.
pub fn marker_voxels(markers: &Array3<bool>) -> Vec<Voxel> {
    markers
        .indexed_iter()
        .filter(|(_, &m)| m)
        .map(|((z, y, x), _)| [z, y, x])
        .collect()
}
