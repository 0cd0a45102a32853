//! Sequence-level orchestration.
//!
//! This module is the "glue" layer that walks frame pairs in order and wires
//! the stages together:
//! descriptors -> cost matrix -> assignment/tiers -> flow table (flow pass),
//! then interpolation -> voxel reassignment (label pass).
//!
//! Algorithmic primitives live in `crate::features`, `crate::linking`,
//! `crate::interpolate` and `crate::reassign`; this layer only owns call
//! order, frame bookkeeping and cancellation.
//!
//! Entry points:
//! - `run_flow_pass`: build the sparse flow table for a whole sequence
//! - `run_label_pass`: propagate the seed frame's labels through the sequence

mod flow_pass;
mod label_pass;
mod result;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use flow_pass::run_flow_pass;
pub use label_pass::run_label_pass;
pub use result::{FlowPassResult, LabelPassResult, PairLinks, PairReassignStats, TrackingResult};

/// Cooperative cancellation shared between the caller and a running pass.
///
/// Checked between frame pairs; the pair in flight always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
