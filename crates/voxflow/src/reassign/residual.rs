//! Iterative nearest-neighbour fill for next-frame voxels left unmatched.
//!
//! Each pass builds a tree over the currently matched next-frame voxels and
//! lets every unmatched voxel within the gate inherit the prev-frame source
//! of its nearest matched neighbour. Passes repeat until nothing is left,
//! nothing changes, or the iteration cap is hit.

use serde::{Deserialize, Serialize};

use crate::compute::ComputeBackend;
use crate::spatial::KdTree;
use crate::volume::{Scaling, Voxel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualTermination {
    /// Every next-frame voxel has a source.
    AllMatched,
    /// A pass matched nothing new; the remaining voxels are out of reach.
    Stalled,
    /// The iteration cap was reached with voxels still unmatched.
    IterationCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidualReport {
    pub iterations: usize,
    pub n_matched: usize,
    pub termination: ResidualTermination,
}

/// Fill `source[i]` (prev index for next voxel `i`) where it is `None`.
pub fn fill_residual(
    next_voxels: &[Voxel],
    source: &mut [Option<usize>],
    scaling: &Scaling,
    max_distance_um: f64,
    max_iterations: usize,
    backend: &ComputeBackend,
) -> ResidualReport {
    let mut iterations = 0;
    let mut n_matched = 0;
    loop {
        let unmatched: Vec<usize> = (0..source.len()).filter(|&i| source[i].is_none()).collect();
        if unmatched.is_empty() {
            return report(iterations, n_matched, ResidualTermination::AllMatched);
        }
        if iterations >= max_iterations {
            return report(iterations, n_matched, ResidualTermination::IterationCap);
        }
        let matched: Vec<usize> = (0..source.len()).filter(|&i| source[i].is_some()).collect();
        if matched.is_empty() {
            return report(iterations, n_matched, ResidualTermination::Stalled);
        }
        iterations += 1;

        let tree = KdTree::build(
            matched
                .iter()
                .map(|&i| scaling.voxel_to_physical(next_voxels[i]))
                .collect(),
        );
        let snapshot: &[Option<usize>] = source;
        let found = backend.map_slice(&unmatched, |&u| {
            let hit = tree.nearest(scaling.voxel_to_physical(next_voxels[u]))?;
            if hit.distance > max_distance_um {
                return None;
            }
            snapshot[matched[hit.index]]
        });

        let mut gained = 0;
        for (&u, src) in unmatched.iter().zip(found) {
            if src.is_some() {
                source[u] = src;
                gained += 1;
            }
        }
        n_matched += gained;
        tracing::trace!(iteration = iterations, gained, remaining = unmatched.len() - gained, "residual pass");
        if gained == 0 {
            return report(iterations, n_matched, ResidualTermination::Stalled);
        }
    }
}

fn report(iterations: usize, n_matched: usize, termination: ResidualTermination) -> ResidualReport {
    ResidualReport {
        iterations,
        n_matched,
        termination,
    }
}
