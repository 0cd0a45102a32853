//! Dense displacement estimates from the sparse flow table.
//!
//! For a query point `p` at frame `t`, every record within
//! `max_radius_um` of `p` contributes its displacement, weighted by
//! `1 / (1 + cost)` times the inverse distance. A record sitting exactly on
//! `p` receives `zero_distance_weight` instead of an infinite weight.
//!
//! * Forward flow uses records anchored at `t`, located at their origin, and
//!   maps `t → t+1`.
//! * Backward flow uses records anchored at `t-1`, located at their arrival
//!   point, and yields the displacement that was applied to reach `p` from
//!   `t-1` (the caller subtracts it to map `t → t-1`).

use serde::{Deserialize, Serialize};

use crate::compute::ComputeBackend;
use crate::error::{Result, TrackError};
use crate::flow::SparseFlowTable;
use crate::spatial::KdTree;
use crate::volume::{Scaling, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Forward,
    Backward,
}

/// Interpolation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Neighbourhood radius in micrometers.
    pub max_radius_um: f64,
    /// Weight given to a record located exactly at the query point.
    pub zero_distance_weight: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            max_radius_um: 0.5,
            zero_distance_weight: 1e6,
        }
    }
}

impl InterpolationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_radius_um.is_finite() || self.max_radius_um <= 0.0 {
            return Err(TrackError::InvalidConfig(format!(
                "interpolation.max_radius_um must be finite and > 0 (got {})",
                self.max_radius_um
            )));
        }
        if !self.zero_distance_weight.is_finite() || self.zero_distance_weight <= 0.0 {
            return Err(TrackError::InvalidConfig(format!(
                "interpolation.zero_distance_weight must be finite and > 0 (got {})",
                self.zero_distance_weight
            )));
        }
        Ok(())
    }
}

/// Spatial index over the records relevant to one query frame.
///
/// Read-only once built, so it can be queried from many threads.
#[derive(Debug, Clone)]
pub struct FrameFlowIndex {
    query_frame: usize,
    direction: FlowDirection,
    displacements: Vec<Vec3>,
    reliability: Vec<f64>,
    tree: KdTree,
    scaling: Scaling,
    config: InterpolationConfig,
}

impl FrameFlowIndex {
    pub fn build(
        table: &SparseFlowTable,
        t: usize,
        direction: FlowDirection,
        config: &InterpolationConfig,
    ) -> Self {
        let scaling = table.scaling();
        let records = match direction {
            FlowDirection::Forward => table.records_for_frame(t),
            FlowDirection::Backward => match t.checked_sub(1) {
                Some(prev) => table.records_for_frame(prev),
                None => &[],
            },
        };
        let anchors: Vec<Vec3> = records
            .iter()
            .map(|r| {
                let anchor = match direction {
                    FlowDirection::Forward => r.origin,
                    FlowDirection::Backward => r.arrival(),
                };
                scaling.to_physical(anchor)
            })
            .collect();
        tracing::trace!(
            frame = t,
            ?direction,
            n_records = records.len(),
            "flow index built"
        );
        Self {
            query_frame: t,
            direction,
            displacements: records.iter().map(|r| r.displacement).collect(),
            reliability: records.iter().map(|r| 1.0 / (1.0 + r.cost.max(0.0))).collect(),
            tree: KdTree::build(anchors),
            scaling,
            config: config.clone(),
        }
    }

    pub fn frame(&self) -> usize {
        self.query_frame
    }

    pub fn direction(&self) -> FlowDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.displacements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displacements.is_empty()
    }

    /// Weighted displacement at `point` (voxel units), or `None` when no
    /// record lies within the interpolation radius.
    pub fn displacement_at(&self, point: Vec3) -> Option<Vec3> {
        if self.is_empty() {
            return None;
        }
        let hits = self
            .tree
            .within_radius(self.scaling.to_physical(point), self.config.max_radius_um);
        if hits.is_empty() {
            return None;
        }
        let mut acc = [0.0f64; 3];
        let mut total = 0.0;
        for n in &hits {
            let spatial = if n.distance == 0.0 {
                self.config.zero_distance_weight
            } else {
                1.0 / n.distance
            };
            let w = spatial * self.reliability[n.index];
            let d = self.displacements[n.index];
            for a in 0..3 {
                acc[a] += w * d[a];
            }
            total += w;
        }
        if total <= 0.0 || !total.is_finite() {
            return None;
        }
        Some(acc.map(|v| v / total))
    }
}

/// Direction-bound interpolator that caches the index of the last queried
/// frame.
#[derive(Debug)]
pub struct FlowInterpolator<'a> {
    table: &'a SparseFlowTable,
    direction: FlowDirection,
    config: InterpolationConfig,
    cached: Option<FrameFlowIndex>,
}

impl<'a> FlowInterpolator<'a> {
    pub fn new(table: &'a SparseFlowTable, direction: FlowDirection, config: InterpolationConfig) -> Self {
        Self {
            table,
            direction,
            config,
            cached: None,
        }
    }

    pub fn direction(&self) -> FlowDirection {
        self.direction
    }

    /// Index for frame `t`, rebuilt only when `t` changes.
    pub fn frame_index(&mut self, t: usize) -> &FrameFlowIndex {
        if self.cached.as_ref().map_or(false, |c| c.frame() != t) {
            self.cached = None;
        }
        let (table, direction, config) = (self.table, self.direction, &self.config);
        self.cached
            .get_or_insert_with(|| FrameFlowIndex::build(table, t, direction, config))
    }

    pub fn interpolate(&mut self, point: Vec3, t: usize) -> Option<Vec3> {
        self.frame_index(t).displacement_at(point)
    }

    /// Interpolate many points of frame `t`, results in input order.
    pub fn interpolate_many(
        &mut self,
        points: &[Vec3],
        t: usize,
        backend: &ComputeBackend,
    ) -> Vec<Option<Vec3>> {
        let index = self.frame_index(t);
        backend.map_slice(points, |p| index.displacement_at(*p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRecord;
    use approx::assert_abs_diff_eq;

    fn record(frame: usize, origin: Vec3, displacement: Vec3, cost: f64) -> FlowRecord {
        FlowRecord {
            frame,
            origin,
            displacement,
            cost,
        }
    }

    fn table() -> SparseFlowTable {
        SparseFlowTable::from_records(
            vec![
                record(0, [0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 0.0),
                record(0, [0.0, 0.0, 10.0], [0.0, 2.0, 0.0], 0.0),
                record(1, [0.0, 5.0, 5.0], [1.0, 0.0, 0.0], 0.0),
            ],
            Scaling::default(),
        )
        .unwrap()
    }

    #[test]
    fn forward_uses_origins_of_same_frame() {
        let t = table();
        let cfg = InterpolationConfig {
            max_radius_um: 2.0,
            ..Default::default()
        };
        let mut fw = FlowInterpolator::new(&t, FlowDirection::Forward, cfg);
        let d = fw.interpolate([0.0, 0.0, 0.5], 0).unwrap();
        assert_abs_diff_eq!(d[2], 1.0);
        assert!(fw.interpolate([0.0, 0.0, 5.0], 0).is_none());
        assert!(fw.interpolate([0.0, 0.0, 0.0], 2).is_none());
    }

    #[test]
    fn backward_uses_arrivals_of_previous_frame() {
        let t = table();
        let cfg = InterpolationConfig {
            max_radius_um: 0.5,
            ..Default::default()
        };
        let mut bw = FlowInterpolator::new(&t, FlowDirection::Backward, cfg);
        // record (0, origin x=0) arrives at x=1 in frame 1
        let d = bw.interpolate([0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(d, [0.0, 0.0, 1.0]);
        assert!(bw.interpolate([0.0, 0.0, 0.0], 1).is_none());
        assert!(bw.interpolate([0.0, 0.0, 1.0], 0).is_none());
    }

    #[test]
    fn exact_hit_dominates_and_weights_normalize() {
        let t = SparseFlowTable::from_records(
            vec![
                record(0, [0.0, 0.0, 0.0], [0.0, 0.0, 2.0], 0.0),
                record(0, [0.0, 0.0, 1.0], [0.0, 0.0, 4.0], 0.0),
                record(0, [0.0, 0.0, 3.0], [0.0, 0.0, 8.0], 0.0),
            ],
            Scaling::default(),
        )
        .unwrap();
        let cfg = InterpolationConfig {
            max_radius_um: 10.0,
            ..Default::default()
        };
        let index = FrameFlowIndex::build(&t, 0, FlowDirection::Forward, &cfg);
        let d = index.displacement_at([0.0, 0.0, 1.0]).unwrap();
        assert_abs_diff_eq!(d[2], 4.0, epsilon = 1e-4);

        // halfway between two equal-cost records
        let d = index.displacement_at([0.0, 0.0, 2.0]).unwrap();
        let w = [1.0 / 2.0, 1.0, 1.0];
        let expected = (w[0] * 2.0 + w[1] * 4.0 + w[2] * 8.0) / (w[0] + w[1] + w[2]);
        assert_abs_diff_eq!(d[2], expected, epsilon = 1e-12);
    }

    #[test]
    fn lower_cost_records_weigh_more() {
        let t = SparseFlowTable::from_records(
            vec![
                record(0, [0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 0.0),
                record(0, [0.0, 0.0, 2.0], [0.0, 0.0, 3.0], 3.0),
            ],
            Scaling::default(),
        )
        .unwrap();
        let cfg = InterpolationConfig {
            max_radius_um: 5.0,
            ..Default::default()
        };
        let index = FrameFlowIndex::build(&t, 0, FlowDirection::Forward, &cfg);
        let d = index.displacement_at([0.0, 0.0, 1.0]).unwrap();
        assert_abs_diff_eq!(d[2], (1.0 + 0.25 * 3.0) / 1.25, epsilon = 1e-12);
    }

    #[test]
    fn anisotropic_scaling_shrinks_neighbourhood() {
        let t = SparseFlowTable::from_records(
            vec![record(0, [0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 0.0)],
            Scaling::new(4.0, 1.0, 1.0),
        )
        .unwrap();
        let cfg = InterpolationConfig {
            max_radius_um: 2.0,
            ..Default::default()
        };
        let mut fw = FlowInterpolator::new(&t, FlowDirection::Forward, cfg);
        assert!(fw.interpolate([0.0, 0.0, 1.5], 0).is_some());
        assert!(fw.interpolate([1.0, 0.0, 0.0], 0).is_none());
    }

    #[test]
    fn batch_matches_single_queries() {
        let t = table();
        let cfg = InterpolationConfig {
            max_radius_um: 3.0,
            ..Default::default()
        };
        let mut fw = FlowInterpolator::new(&t, FlowDirection::Forward, cfg);
        let pts = vec![[0.0, 0.0, 0.0], [0.0, 0.0, 9.0], [0.0, 0.0, 5.0]];
        let many = fw.interpolate_many(&pts, 0, &ComputeBackend::parallel());
        let single: Vec<_> = pts.iter().map(|p| fw.interpolate(*p, 0)).collect();
        assert_eq!(many, single);
    }
}
