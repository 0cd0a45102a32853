//! Dense label propagation from frame to frame using interpolated flow.
//!
//! For a pair (prev, next), prev-frame voxels are projected into the next
//! frame (`to_next`) and next-frame voxels are projected back (`to_prev`).
//! Each projection snaps to the nearest foreground voxel of the other frame
//! and is kept when the physical distance between the two voxels is within
//! the motion gate. Competing claims on a next voxel are resolved by
//! distance; losing prev voxels go back into the pool and may take the
//! nearest unclaimed next voxel within the gate. Leftover next voxels are
//! then filled iteratively from their matched neighbours. Every next voxel
//! ends up with at most one label.

pub mod collision;
pub mod residual;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::compute::ComputeBackend;
use crate::error::{Result, TrackError};
use crate::interpolate::FrameFlowIndex;
use crate::spatial::KdTree;
use crate::volume::{add, foreground_voxels, scale, shape_of, voxel_to_vec, Scaling, Vec3, Voxel};
use collision::{combine, rematch_rejected, resolve_collisions};
use residual::{fill_residual, ResidualTermination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDirection {
    Forward,
    Backward,
    #[default]
    Both,
}

/// How forward and backward matches are combined when both are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossCheck {
    #[default]
    Union,
    Agreement,
}

/// Labeling of next-frame foreground voxels that remain unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Leave them at 0.
    #[default]
    Background,
    /// One fresh label per upstream instance touched by unmatched voxels.
    FreshLabelPerInstance,
}

/// Voxel reassignment parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassignConfig {
    /// Cap on residual nearest-neighbour passes.
    pub max_iterations: usize,
    pub match_direction: MatchDirection,
    pub cross_check: CrossCheck,
    pub unmatched_policy: UnmatchedPolicy,
}

impl Default for ReassignConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            match_direction: MatchDirection::Both,
            cross_check: CrossCheck::Union,
            unmatched_policy: UnmatchedPolicy::Background,
        }
    }
}

impl ReassignConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(TrackError::InvalidConfig(
                "reassign.max_iterations must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A prev-frame voxel linked to a next-frame voxel (indices into the
/// respective C-order foreground lists).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelMatch {
    pub prev: usize,
    pub next: usize,
    /// Physical distance between the two voxels.
    pub distance: f64,
}

/// Maps voxel positions of one frame into another through a flow index.
///
/// `sign = +1` adds the interpolated displacement, `-1` subtracts it.
#[derive(Debug, Clone, Copy)]
pub struct FlowProjection<'a> {
    index: &'a FrameFlowIndex,
    sign: f64,
}

impl<'a> FlowProjection<'a> {
    pub fn along(index: &'a FrameFlowIndex) -> Self {
        Self { index, sign: 1.0 }
    }

    pub fn against(index: &'a FrameFlowIndex) -> Self {
        Self { index, sign: -1.0 }
    }

    pub fn project(&self, p: Vec3) -> Option<Vec3> {
        self.index
            .displacement_at(p)
            .map(|d| add(p, scale(d, self.sign)))
    }
}

/// Counters reported for one reassignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignStats {
    pub n_prev: usize,
    pub n_next: usize,
    pub n_forward_matches: usize,
    pub n_backward_matches: usize,
    pub n_collisions: usize,
    pub n_direct: usize,
    /// Collision losers placed on a free next voxel within the gate.
    pub n_rematched: usize,
    pub n_residual_matched: usize,
    pub iterations: usize,
    pub n_unmatched: usize,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct ReassignOutcome {
    /// Propagated labels of the next frame (0 where unmatched).
    pub labels: Array3<u32>,
    /// Next-frame foreground voxels left without a label, C order.
    pub unmatched: Vec<Voxel>,
    /// Prev-frame voxels that lost a collision and found no free next voxel
    /// within the gate, C order.
    pub unmatched_prev: Vec<Voxel>,
    pub stats: ReassignStats,
}

#[derive(Debug, Clone)]
pub struct VoxelReassigner {
    config: ReassignConfig,
    scaling: Scaling,
    max_distance_um: f64,
    backend: ComputeBackend,
}

impl VoxelReassigner {
    pub fn new(
        config: ReassignConfig,
        scaling: Scaling,
        max_distance_um: f64,
        backend: ComputeBackend,
    ) -> Self {
        Self {
            config,
            scaling,
            max_distance_um,
            backend,
        }
    }

    pub fn config(&self) -> &ReassignConfig {
        &self.config
    }

    /// Carry `prev_labels` onto the foreground of `next_foreground`.
    ///
    /// `to_next` maps prev positions into the next frame, `to_prev` maps next
    /// positions back; either may be absent, and the configured match
    /// direction decides which are used.
    pub fn reassign(
        &self,
        prev_labels: &Array3<u32>,
        next_foreground: &Array3<u32>,
        to_next: Option<FlowProjection<'_>>,
        to_prev: Option<FlowProjection<'_>>,
    ) -> ReassignOutcome {
        let prev_voxels = foreground_voxels(prev_labels);
        let next_voxels = foreground_voxels(next_foreground);
        let mut labels = Array3::<u32>::zeros(next_foreground.raw_dim());
        let mut stats = ReassignStats {
            n_prev: prev_voxels.len(),
            n_next: next_voxels.len(),
            ..ReassignStats::default()
        };
        if next_voxels.is_empty() {
            stats.converged = true;
            return ReassignOutcome {
                labels,
                unmatched: Vec::new(),
                unmatched_prev: Vec::new(),
                stats,
            };
        }
        if prev_voxels.is_empty() {
            stats.n_unmatched = next_voxels.len();
            return ReassignOutcome {
                labels,
                unmatched: next_voxels,
                unmatched_prev: Vec::new(),
                stats,
            };
        }

        let use_forward = matches!(self.config.match_direction, MatchDirection::Forward | MatchDirection::Both);
        let use_backward = matches!(self.config.match_direction, MatchDirection::Backward | MatchDirection::Both);

        let forward: Vec<VoxelMatch> = match (use_forward, to_next) {
            (true, Some(proj)) => {
                let tree = KdTree::from_voxels(&next_voxels, &self.scaling);
                self.snap(&prev_voxels, &next_voxels, &tree, proj)
                    .into_iter()
                    .map(|(p, n, distance)| VoxelMatch { prev: p, next: n, distance })
                    .collect()
            }
            _ => Vec::new(),
        };
        let backward: Vec<VoxelMatch> = match (use_backward, to_prev) {
            (true, Some(proj)) => {
                let tree = KdTree::from_voxels(&prev_voxels, &self.scaling);
                self.snap(&next_voxels, &prev_voxels, &tree, proj)
                    .into_iter()
                    .map(|(n, p, distance)| VoxelMatch { prev: p, next: n, distance })
                    .collect()
            }
            _ => Vec::new(),
        };
        stats.n_forward_matches = forward.len();
        stats.n_backward_matches = backward.len();

        let agreement = self.config.cross_check == CrossCheck::Agreement && use_forward && use_backward;
        let combined = combine(forward, backward, agreement);
        let (kept, rejected) = resolve_collisions(combined, next_voxels.len());
        stats.n_collisions = rejected.len();
        stats.n_direct = kept.len();
        let (rematched, lost) = rematch_rejected(
            &rejected,
            &kept,
            &prev_voxels,
            &next_voxels,
            &self.scaling,
            self.max_distance_um,
        );
        stats.n_rematched = rematched.len();

        let mut source: Vec<Option<usize>> = vec![None; next_voxels.len()];
        for m in kept.iter().chain(&rematched) {
            source[m.next] = Some(m.prev);
        }
        let report = fill_residual(
            &next_voxels,
            &mut source,
            &self.scaling,
            self.max_distance_um,
            self.config.max_iterations,
            &self.backend,
        );
        stats.n_residual_matched = report.n_matched;
        stats.iterations = report.iterations;
        stats.converged = report.termination == ResidualTermination::AllMatched;

        let mut unmatched = Vec::new();
        for (i, v) in next_voxels.iter().enumerate() {
            match source[i] {
                Some(p) => labels[*v] = prev_labels[prev_voxels[p]],
                None => unmatched.push(*v),
            }
        }
        stats.n_unmatched = unmatched.len();
        if report.termination != ResidualTermination::AllMatched {
            tracing::warn!(
                n_unmatched = stats.n_unmatched,
                n_unmatched_prev = lost.len(),
                iterations = stats.iterations,
                termination = ?report.termination,
                "residual matching left voxels unlabeled"
            );
        }
        ReassignOutcome {
            labels,
            unmatched,
            unmatched_prev: lost.into_iter().map(|p| prev_voxels[p]).collect(),
            stats,
        }
    }

    /// Project `sources` and snap each estimate to the nearest voxel in
    /// `tree` (built over `targets`). Returns `(source, target, distance)`.
    fn snap(
        &self,
        sources: &[Voxel],
        targets: &[Voxel],
        tree: &KdTree,
        projection: FlowProjection<'_>,
    ) -> Vec<(usize, usize, f64)> {
        let hits = self.backend.map_indexed(sources.len(), |i| {
            let origin = voxel_to_vec(sources[i]);
            let estimate = projection.project(origin)?;
            let hit = tree.nearest(self.scaling.to_physical(estimate))?;
            let distance = self.scaling.distance(origin, voxel_to_vec(targets[hit.index]));
            (distance <= self.max_distance_um).then_some((i, hit.index, distance))
        });
        hits.into_iter().flatten().collect()
    }
}

/// Apply the unmatched-voxel policy in place.
///
/// `next_free` is the first label not used anywhere in the propagated
/// sequence so far; it is advanced past every label handed out. Returns the
/// number of fresh labels created.
pub fn apply_unmatched_policy(
    labels: &mut Array3<u32>,
    unmatched: &[Voxel],
    upstream: &Array3<u32>,
    policy: UnmatchedPolicy,
    next_free: &mut u32,
) -> usize {
    match policy {
        UnmatchedPolicy::Background => 0,
        UnmatchedPolicy::FreshLabelPerInstance => {
            debug_assert_eq!(shape_of(labels), shape_of(upstream));
            let mut fresh: std::collections::BTreeMap<u32, u32> = std::collections::BTreeMap::new();
            for v in unmatched {
                let instance = upstream[*v];
                let label = *fresh.entry(instance).or_insert_with(|| {
                    let l = *next_free;
                    *next_free = next_free.saturating_add(1);
                    l
                });
                labels[*v] = label;
            }
            fresh.len()
        }
    }
}
