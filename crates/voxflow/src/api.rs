//! High-level tracking API.
//!
//! [`Tracker`] is the primary entry point. It wraps a [`TrackConfig`] and a
//! [`CancelFlag`] and runs the flow and label passes over a [`Sequence`].

use std::path::Path;

use crate::config::TrackConfig;
use crate::error::Result;
use crate::flow::SparseFlowTable;
use crate::pipeline::{self, CancelFlag, FlowPassResult, LabelPassResult, TrackingResult};
use crate::volume::Sequence;

/// Primary tracking interface.
///
/// Create once, track many sequences.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use voxflow::{io, TrackConfig, Tracker};
///
/// let seq = io::load_sequence(Path::new("sequence.json")).unwrap();
/// let tracker = Tracker::with_config(TrackConfig::default());
/// let result = tracker.track(&seq).unwrap();
/// println!("{} flow records", result.flow.table.len());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    config: TrackConfig,
    cancel: CancelFlag,
}

impl Tracker {
    /// Tracker with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TrackConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Load configuration from JSON and create a tracker in one step.
    pub fn from_config_json_file(path: &Path) -> Result<Self> {
        Ok(Self::with_config(TrackConfig::from_json_file(path)?))
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Mutable access to configuration for post-construction tuning.
    pub fn config_mut(&mut self) -> &mut TrackConfig {
        &mut self.config
    }

    /// Handle that cancels a running pass from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Build the sparse flow table only.
    pub fn build_flow(&self, seq: &Sequence) -> Result<FlowPassResult> {
        pipeline::run_flow_pass(seq, &self.config, &self.cancel)
    }

    /// Propagate labels with a previously built (or loaded) flow table.
    pub fn propagate_labels(&self, seq: &Sequence, table: &SparseFlowTable) -> Result<LabelPassResult> {
        pipeline::run_label_pass(seq, table, &self.config, &self.cancel)
    }

    /// Flow pass followed by label pass.
    pub fn track(&self, seq: &Sequence) -> Result<TrackingResult> {
        let flow = self.build_flow(seq)?;
        let labels = self.propagate_labels(seq, &flow.table)?;
        Ok(TrackingResult { flow, labels })
    }
}
