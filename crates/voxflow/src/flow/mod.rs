//! Sparse flow: one displacement record per accepted marker link.
//!
//! A record with `frame = t` describes a link from frame `t` to `t + 1`: the
//! origin is the marker position in frame `t` and `origin + displacement` is
//! its position in frame `t + 1`. Records are stored contiguously in frame
//! order so per-frame lookups are a range slice.

mod persist;

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::linking::Correspondence;
use crate::volume::{add, sub, voxel_to_vec, Scaling, Vec3, Voxel};

pub use persist::FLOW_SCHEMA_V1;

/// A single marker displacement between frames `frame` and `frame + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub frame: usize,
    /// Position in frame `frame`, voxel units `[z, y, x]`.
    pub origin: Vec3,
    /// Displacement to the linked position in frame `frame + 1`.
    pub displacement: Vec3,
    /// Assignment cost of the link (lower is more reliable).
    pub cost: f64,
}

impl FlowRecord {
    /// Position of the linked marker in frame `frame + 1`.
    pub fn arrival(&self) -> Vec3 {
        add(self.origin, self.displacement)
    }
}

/// Immutable sparse flow table with per-frame index.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseFlowTable {
    records: Vec<FlowRecord>,
    index: BTreeMap<usize, Range<usize>>,
    scaling: Scaling,
}

impl SparseFlowTable {
    pub fn empty(scaling: Scaling) -> Self {
        Self {
            records: Vec::new(),
            index: BTreeMap::new(),
            scaling,
        }
    }

    /// Build from records; they must already be in non-decreasing frame order.
    pub fn from_records(records: Vec<FlowRecord>, scaling: Scaling) -> Result<Self> {
        let mut builder = FlowTableBuilder::new(scaling);
        for r in records {
            builder.push(r)?;
        }
        Ok(builder.finish())
    }

    pub fn records(&self) -> &[FlowRecord] {
        &self.records
    }

    /// Records anchored at frame `t` (empty when there are none).
    pub fn records_for_frame(&self, t: usize) -> &[FlowRecord] {
        match self.index.get(&t) {
            Some(range) => &self.records[range.clone()],
            None => &[],
        }
    }

    /// Frames that have at least one record, ascending.
    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.index.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn scaling(&self) -> Scaling {
        self.scaling
    }

    /// Mean displacement magnitude (physical units) of frame `t`'s records.
    pub fn mean_speed_um(&self, t: usize) -> Option<f64> {
        let recs = self.records_for_frame(t);
        if recs.is_empty() {
            return None;
        }
        let total: f64 = recs
            .iter()
            .map(|r| self.scaling.distance(r.origin, r.arrival()))
            .sum();
        Some(total / recs.len() as f64)
    }
}

/// Append-only builder enforcing frame order.
#[derive(Debug, Clone)]
pub struct FlowTableBuilder {
    records: Vec<FlowRecord>,
    index: BTreeMap<usize, Range<usize>>,
    scaling: Scaling,
    last_frame: Option<usize>,
}

impl FlowTableBuilder {
    pub fn new(scaling: Scaling) -> Self {
        Self {
            records: Vec::new(),
            index: BTreeMap::new(),
            scaling,
            last_frame: None,
        }
    }

    pub fn push(&mut self, record: FlowRecord) -> Result<()> {
        if let Some(last) = self.last_frame {
            if record.frame < last {
                return Err(TrackError::FrameOrder {
                    last,
                    got: record.frame,
                });
            }
        }
        let at = self.records.len();
        self.index
            .entry(record.frame)
            .and_modify(|r| r.end = at + 1)
            .or_insert(at..at + 1);
        self.records.push(record);
        self.last_frame = Some(record.frame);
        Ok(())
    }

    /// Append one record per correspondence linking `prev_markers` (frame
    /// `anchor_frame`) to `next_markers` (frame `anchor_frame + 1`).
    ///
    /// Returns the number of records appended.
    pub fn append_links(
        &mut self,
        anchor_frame: usize,
        prev_markers: &[Voxel],
        next_markers: &[Voxel],
        correspondences: &[Correspondence],
    ) -> Result<usize> {
        for c in correspondences {
            let origin = voxel_to_vec(prev_markers[c.row]);
            let arrival = voxel_to_vec(next_markers[c.col]);
            self.push(FlowRecord {
                frame: anchor_frame,
                origin,
                displacement: sub(arrival, origin),
                cost: c.cost,
            })?;
        }
        Ok(correspondences.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn finish(self) -> SparseFlowTable {
        SparseFlowTable {
            records: self.records,
            index: self.index,
            scaling: self.scaling,
        }
    }
}
