//! Label pass: propagate the seed frame's labels through the sequence using
//! the interpolated flow.

use ndarray::Array3;

use super::result::{LabelPassResult, PairReassignStats};
use super::CancelFlag;
use crate::compute::ComputeBackend;
use crate::config::{Propagation, TrackConfig};
use crate::error::{Result, TrackError};
use crate::flow::SparseFlowTable;
use crate::interpolate::{FlowDirection, FlowInterpolator};
use crate::reassign::{apply_unmatched_policy, FlowProjection, VoxelReassigner};
use crate::volume::Sequence;

/// Propagate labels of the seed frame (first frame for forward propagation,
/// last frame for backward) through `seq`.
pub fn run_label_pass(
    seq: &Sequence,
    table: &SparseFlowTable,
    config: &TrackConfig,
    cancel: &CancelFlag,
) -> Result<LabelPassResult> {
    seq.validate()?;
    config.validate()?;
    run(seq, table, config, cancel)
}

pub(crate) fn run(
    seq: &Sequence,
    table: &SparseFlowTable,
    config: &TrackConfig,
    cancel: &CancelFlag,
) -> Result<LabelPassResult> {
    let n = seq.n_frames();
    let order: Vec<usize> = match config.propagation {
        Propagation::Forward => (0..n).collect(),
        Propagation::Backward => (0..n).rev().collect(),
    };
    let seed_frame = *order.first().ok_or(TrackError::EmptySequence)?;
    let seed = seq.frame(seed_frame)?.labels.clone();
    let mut next_free = max_label(&seed).saturating_add(1);

    let gate_um = config.max_link_distance_um(seq.frame_interval_s);
    let backend = ComputeBackend::new(config.backend);
    let reassigner = VoxelReassigner::new(config.reassign.clone(), seq.scaling, gate_um, backend);
    let mut fw = FlowInterpolator::new(table, FlowDirection::Forward, config.interpolation.clone());
    let mut bw = FlowInterpolator::new(table, FlowDirection::Backward, config.interpolation.clone());

    tracing::info!(
        seed_frame,
        propagation = ?config.propagation,
        n_records = table.len(),
        "label pass started"
    );

    let mut labels: Vec<Array3<u32>> = Vec::with_capacity(n);
    labels.push(seed);
    let mut steps = Vec::with_capacity(n.saturating_sub(1));

    for (k, pair) in order.windows(2).enumerate() {
        let (prev_t, next_t) = (pair[0], pair[1]);
        if cancel.is_cancelled() {
            tracing::warn!(completed_pairs = k, "label pass cancelled");
            return Err(TrackError::Cancelled { completed_pairs: k });
        }

        let (to_next, to_prev) = match config.propagation {
            Propagation::Forward => (
                FlowProjection::along(fw.frame_index(prev_t)),
                FlowProjection::against(bw.frame_index(next_t)),
            ),
            Propagation::Backward => (
                FlowProjection::against(bw.frame_index(prev_t)),
                FlowProjection::along(fw.frame_index(next_t)),
            ),
        };

        let upstream = &seq.frame(next_t)?.labels;
        let mut outcome = reassigner.reassign(&labels[k], upstream, Some(to_next), Some(to_prev));
        let n_fresh_labels = apply_unmatched_policy(
            &mut outcome.labels,
            &outcome.unmatched,
            upstream,
            config.reassign.unmatched_policy,
            &mut next_free,
        );
        next_free = next_free.max(max_label(&outcome.labels).saturating_add(1));

        tracing::info!(
            prev_frame = prev_t,
            next_frame = next_t,
            n_next = outcome.stats.n_next,
            n_direct = outcome.stats.n_direct,
            n_rematched = outcome.stats.n_rematched,
            n_residual = outcome.stats.n_residual_matched,
            n_unmatched = outcome.stats.n_unmatched,
            n_fresh_labels,
            "labels propagated"
        );

        steps.push(PairReassignStats {
            prev_frame: prev_t,
            next_frame: next_t,
            stats: outcome.stats,
            n_fresh_labels,
        });
        labels.push(outcome.labels);
    }

    if config.propagation == Propagation::Backward {
        labels.reverse();
    }
    Ok(LabelPassResult { labels, steps })
}

fn max_label(labels: &Array3<u32>) -> u32 {
    labels.iter().copied().max().unwrap_or(0)
}
