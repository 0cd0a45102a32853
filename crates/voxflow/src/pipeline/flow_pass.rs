//! Flow pass: descriptors -> cost matrix -> tiers -> flow records, per pair.

use super::result::{FlowPassResult, PairLinks};
use super::CancelFlag;
use crate::compute::ComputeBackend;
use crate::config::TrackConfig;
use crate::error::{Result, TrackError};
use crate::features::extract_frame_descriptors;
use crate::flow::FlowTableBuilder;
use crate::linking::{build_cost_matrix, solve_links};
use crate::volume::Sequence;

/// Build the sparse flow table of `seq`.
///
/// Validates inputs and configuration before touching any frame.
pub fn run_flow_pass(seq: &Sequence, config: &TrackConfig, cancel: &CancelFlag) -> Result<FlowPassResult> {
    seq.validate()?;
    config.validate()?;
    run(seq, config, cancel)
}

pub(crate) fn run(seq: &Sequence, config: &TrackConfig, cancel: &CancelFlag) -> Result<FlowPassResult> {
    let backend = ComputeBackend::new(config.backend);
    let gate_um = config.max_link_distance_um(seq.frame_interval_s);
    tracing::info!(
        n_frames = seq.n_frames(),
        gate_um,
        backend = ?config.backend,
        "flow pass started"
    );

    let mut builder = FlowTableBuilder::new(seq.scaling);
    let mut pairs = Vec::with_capacity(seq.n_frames().saturating_sub(1));
    let mut prev = extract_frame_descriptors(0, seq.frame(0)?, &config.features, &backend);

    for t in 1..seq.n_frames() {
        if cancel.is_cancelled() {
            tracing::warn!(completed_pairs = t - 1, "flow pass cancelled");
            return Err(TrackError::Cancelled {
                completed_pairs: t - 1,
            });
        }
        let next = extract_frame_descriptors(t, seq.frame(t)?, &config.features, &backend);
        if prev.is_empty() || next.is_empty() {
            tracing::warn!(
                prev_frame = t - 1,
                next_frame = t,
                n_prev = prev.len(),
                n_next = next.len(),
                "frame pair has an empty marker set"
            );
        }

        let cm = build_cost_matrix(&prev, &next, &seq.scaling, gate_um);
        let links = solve_links(&cm, &config.assignment);
        let n_records = builder.append_links(t - 1, &prev.markers, &next.markers, &links.correspondences)?;
        tracing::info!(
            prev_frame = t - 1,
            next_frame = t,
            n_prev = prev.len(),
            n_next = next.len(),
            n_records,
            "frame pair linked"
        );

        pairs.push(PairLinks {
            prev_frame: t - 1,
            next_frame: t,
            n_prev_markers: prev.len(),
            n_next_markers: next.len(),
            links,
        });
        prev = next;
    }

    let table = builder.finish();
    tracing::info!(n_records = table.len(), "flow pass finished");
    Ok(FlowPassResult { table, pairs })
}
