//! JSON persistence of the sparse flow table (`voxflow.flow.v1`).
//!
//! Records are stored as fixed-width rows
//! `[frame, oz, oy, ox, dz, dy, dx, cost]`.

use std::path::Path;

use crate::error::{Result, TrackError};
use crate::volume::Scaling;

use super::{FlowRecord, SparseFlowTable};

pub const FLOW_SCHEMA_V1: &str = "voxflow.flow.v1";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct FlowTableSpecV1 {
    schema: String,
    scaling_um: Scaling,
    records: Vec<[f64; 8]>,
}

fn to_row(r: &FlowRecord) -> [f64; 8] {
    [
        r.frame as f64,
        r.origin[0],
        r.origin[1],
        r.origin[2],
        r.displacement[0],
        r.displacement[1],
        r.displacement[2],
        r.cost,
    ]
}

fn from_row(i: usize, row: &[f64; 8]) -> Result<FlowRecord> {
    if let Some(bad) = row.iter().position(|v| !v.is_finite()) {
        return Err(TrackError::MalformedFile(format!(
            "flow record {i}: column {bad} is not finite"
        )));
    }
    let frame = row[0];
    if frame < 0.0 || frame.fract() != 0.0 {
        return Err(TrackError::MalformedFile(format!(
            "flow record {i}: frame {frame} is not a non-negative integer"
        )));
    }
    Ok(FlowRecord {
        frame: frame as usize,
        origin: [row[1], row[2], row[3]],
        displacement: [row[4], row[5], row[6]],
        cost: row[7],
    })
}

impl SparseFlowTable {
    pub fn to_json_string(&self) -> Result<String> {
        let spec = FlowTableSpecV1 {
            schema: FLOW_SCHEMA_V1.to_string(),
            scaling_um: self.scaling,
            records: self.records.iter().map(to_row).collect(),
        };
        Ok(serde_json::to_string_pretty(&spec)?)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let spec: FlowTableSpecV1 = serde_json::from_str(data)?;
        if spec.schema != FLOW_SCHEMA_V1 {
            return Err(TrackError::UnsupportedSchema {
                found: spec.schema,
                expected: FLOW_SCHEMA_V1,
            });
        }
        spec.scaling_um.validate()?;
        let records = spec
            .records
            .iter()
            .enumerate()
            .map(|(i, row)| from_row(i, row))
            .collect::<Result<Vec<_>>>()?;
        Self::from_records(records, spec.scaling_um)
    }

    /// Write the table as pretty-printed JSON.
    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Load a table written by [`Self::write_json_file`].
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}
