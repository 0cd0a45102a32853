//! JSON persistence of input sequences (`voxflow.sequence.v1`) and
//! propagated labels (`voxflow.labels.v1`).
//!
//! Dense volumes are stored flattened in C order (`z`, then `y`, then `x`);
//! markers are stored as a list of voxel coordinates.

use std::path::Path;

use ndarray::Array3;

use crate::error::{Result, TrackError};
use crate::pipeline::{LabelPassResult, PairReassignStats};
use crate::volume::{shape_of, FrameInputs, Scaling, Sequence, Voxel};

pub const SEQUENCE_SCHEMA_V1: &str = "voxflow.sequence.v1";
pub const LABELS_SCHEMA_V1: &str = "voxflow.labels.v1";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct SequenceSpecV1 {
    schema: String,
    /// `[z, y, x]`.
    shape: [usize; 3],
    scaling_um: Scaling,
    frame_interval_s: f64,
    frames: Vec<FrameSpecV1>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct FrameSpecV1 {
    labels: Vec<u32>,
    intensity: Vec<f32>,
    #[serde(default)]
    structure: Vec<Vec<f32>>,
    markers: Vec<Voxel>,
    distance: Vec<f32>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct LabelsSpecV1 {
    schema: String,
    shape: [usize; 3],
    frames: Vec<Vec<u32>>,
    steps: Vec<PairReassignStats>,
}

fn volume<T>(shape: [usize; 3], data: Vec<T>, what: &str, frame: usize) -> Result<Array3<T>> {
    let expected = shape[0] * shape[1] * shape[2];
    if data.len() != expected {
        return Err(TrackError::MalformedFile(format!(
            "frame {frame}: '{what}' holds {} values, shape {shape:?} needs {expected}",
            data.len()
        )));
    }
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), data)
        .map_err(|e| TrackError::MalformedFile(format!("frame {frame}: '{what}': {e}")))
}

fn flatten<T: Clone>(a: &Array3<T>) -> Vec<T> {
    a.iter().cloned().collect()
}

fn frame_from_spec(shape: [usize; 3], t: usize, spec: FrameSpecV1) -> Result<FrameInputs> {
    let labels = volume(shape, spec.labels, "labels", t)?;
    let intensity = volume(shape, spec.intensity, "intensity", t)?;
    let distance = volume(shape, spec.distance, "distance", t)?;
    let structure = spec
        .structure
        .into_iter()
        .enumerate()
        .map(|(i, s)| volume(shape, s, &format!("structure[{i}]"), t))
        .collect::<Result<Vec<_>>>()?;
    let mut markers = Array3::from_elem((shape[0], shape[1], shape[2]), false);
    for m in spec.markers {
        if (0..3).any(|a| m[a] >= shape[a]) {
            return Err(TrackError::MalformedFile(format!(
                "frame {t}: marker {m:?} outside shape {shape:?}"
            )));
        }
        markers[m] = true;
    }
    Ok(FrameInputs::new(labels, intensity, markers, distance).with_structure(structure))
}

/// Parse a sequence document and validate it.
pub fn sequence_from_json_str(data: &str) -> Result<Sequence> {
    let spec: SequenceSpecV1 = serde_json::from_str(data)?;
    if spec.schema != SEQUENCE_SCHEMA_V1 {
        return Err(TrackError::UnsupportedSchema {
            found: spec.schema,
            expected: SEQUENCE_SCHEMA_V1,
        });
    }
    let shape = spec.shape;
    let frames = spec
        .frames
        .into_iter()
        .enumerate()
        .map(|(t, f)| frame_from_spec(shape, t, f))
        .collect::<Result<Vec<_>>>()?;
    let seq = Sequence::new(frames, spec.scaling_um, spec.frame_interval_s);
    seq.validate()?;
    Ok(seq)
}

pub fn load_sequence(path: &Path) -> Result<Sequence> {
    let data = std::fs::read_to_string(path)?;
    sequence_from_json_str(&data)
}

pub fn sequence_to_json_string(seq: &Sequence) -> Result<String> {
    let shape = seq.shape().ok_or(TrackError::EmptySequence)?;
    let frames = seq
        .frames
        .iter()
        .map(|f| FrameSpecV1 {
            labels: flatten(&f.labels),
            intensity: flatten(&f.intensity),
            structure: f.structure.iter().map(flatten).collect(),
            markers: crate::volume::marker_voxels(&f.markers),
            distance: flatten(&f.distance),
        })
        .collect();
    let spec = SequenceSpecV1 {
        schema: SEQUENCE_SCHEMA_V1.to_string(),
        shape,
        scaling_um: seq.scaling,
        frame_interval_s: seq.frame_interval_s,
        frames,
    };
    Ok(serde_json::to_string(&spec)?)
}

pub fn save_sequence(seq: &Sequence, path: &Path) -> Result<()> {
    std::fs::write(path, sequence_to_json_string(seq)?)?;
    Ok(())
}

pub fn labels_to_json_string(result: &LabelPassResult) -> Result<String> {
    let shape = result
        .labels
        .first()
        .map(shape_of)
        .ok_or(TrackError::EmptySequence)?;
    let spec = LabelsSpecV1 {
        schema: LABELS_SCHEMA_V1.to_string(),
        shape,
        frames: result.labels.iter().map(flatten).collect(),
        steps: result.steps.clone(),
    };
    Ok(serde_json::to_string(&spec)?)
}

pub fn save_labels(result: &LabelPassResult, path: &Path) -> Result<()> {
    std::fs::write(path, labels_to_json_string(result)?)?;
    Ok(())
}

/// Parse a labels document back into per-frame volumes.
pub fn labels_from_json_str(data: &str) -> Result<LabelPassResult> {
    let spec: LabelsSpecV1 = serde_json::from_str(data)?;
    if spec.schema != LABELS_SCHEMA_V1 {
        return Err(TrackError::UnsupportedSchema {
            found: spec.schema,
            expected: LABELS_SCHEMA_V1,
        });
    }
    let labels = spec
        .frames
        .into_iter()
        .enumerate()
        .map(|(t, f)| volume(spec.shape, f, "labels", t))
        .collect::<Result<Vec<_>>>()?;
    Ok(LabelPassResult {
        labels,
        steps: spec.steps,
    })
}
