use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::flow::SparseFlowTable;
use crate::linking::FrameLinks;
use crate::reassign::ReassignStats;

/// Linking outcome for frames `prev_frame -> next_frame`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairLinks {
    pub prev_frame: usize,
    pub next_frame: usize,
    pub n_prev_markers: usize,
    pub n_next_markers: usize,
    pub links: FrameLinks,
}

#[derive(Debug, Clone)]
pub struct FlowPassResult {
    pub table: SparseFlowTable,
    /// One entry per frame pair, in frame order.
    pub pairs: Vec<PairLinks>,
}

/// Reassignment counters for one propagation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairReassignStats {
    pub prev_frame: usize,
    pub next_frame: usize,
    #[serde(flatten)]
    pub stats: ReassignStats,
    /// Fresh labels created by the unmatched-voxel policy.
    pub n_fresh_labels: usize,
}

#[derive(Debug, Clone)]
pub struct LabelPassResult {
    /// Propagated labels, indexed by frame (frame order regardless of the
    /// propagation direction).
    pub labels: Vec<Array3<u32>>,
    /// One entry per propagation step, in processing order.
    pub steps: Vec<PairReassignStats>,
}

/// Combined output of a full tracking run.
#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub flow: FlowPassResult,
    pub labels: LabelPassResult,
}

impl TrackingResult {
    /// Distinct non-zero labels present in frame `t`, ascending.
    pub fn labels_in_frame(&self, t: usize) -> Vec<u32> {
        let Some(vol) = self.labels.labels.get(t) else {
            return Vec::new();
        };
        let set: std::collections::BTreeSet<u32> = vol.iter().copied().filter(|l| *l > 0).collect();
        set.into_iter().collect()
    }
}
