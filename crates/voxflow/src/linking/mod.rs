//! Marker linking between consecutive frames: gated costs, optimal
//! assignment and confidence tiers.

pub mod cost;
pub mod hungarian;
pub mod tiers;

pub use cost::{build_cost_matrix, CostMatrix, UNREACHABLE};
pub use hungarian::optimal_pairs;
pub use tiers::{
    solve_links, AssignmentConfig, Confidence, Correspondence, FrameLinks, LinkCandidate,
};
