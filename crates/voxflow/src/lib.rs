//! voxflow: marker-based flow estimation and label propagation for
//! time-lapse volumetric microscopy.
//!
//! Upstream stages provide, per frame, an instance-segmented foreground,
//! intensity and structure channels, sparse marker voxels and a
//! distance-to-background map. The stages here are:
//!
//! 1. **Features** – per-marker descriptors from cropped max-projections
//!    (global statistics plus log-compressed Hu invariants).
//! 2. **Linking** – gated, z-score-normalized cost matrix between the markers
//!    of consecutive frames, optimal assignment and confidence tiers.
//! 3. **Flow** – sparse displacement records, one per accepted link.
//! 4. **Interpolation** – cost- and distance-weighted displacement at
//!    arbitrary points, forward or backward in time.
//! 5. **Reassignment** – dense label propagation: projection, snapping,
//!    collision resolution and iterative residual fill.
//!
//! # Public API
//! - [`Tracker`] as the primary entry point
//! - [`TrackConfig`] and the per-stage configs for tuning
//! - [`Sequence`]/[`FrameInputs`] as input and [`TrackingResult`] as output
//! - the stage modules for callers that drive stages individually

mod api;
pub mod compute;
pub mod config;
pub mod error;
pub mod features;
pub mod flow;
pub mod interpolate;
pub mod io;
pub mod linking;
pub mod pipeline;
pub mod reassign;
pub mod spatial;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_utils;

pub use api::Tracker;
pub use compute::{BackendKind, ComputeBackend};
pub use config::{Propagation, TrackConfig};
pub use error::{Result, TrackError};
pub use features::{DescriptorVector, FeatureConfig, FrameDescriptors};
pub use flow::{FlowRecord, FlowTableBuilder, SparseFlowTable, FLOW_SCHEMA_V1};
pub use interpolate::{FlowDirection, FlowInterpolator, FrameFlowIndex, InterpolationConfig};
pub use linking::{AssignmentConfig, Confidence, CostMatrix, Correspondence, FrameLinks};
pub use pipeline::{
    CancelFlag, FlowPassResult, LabelPassResult, PairLinks, PairReassignStats, TrackingResult,
};
pub use reassign::{
    CrossCheck, MatchDirection, ReassignConfig, ReassignStats, UnmatchedPolicy, VoxelReassigner,
};
pub use volume::{FrameInputs, Scaling, Sequence, Vec3, Voxel};
