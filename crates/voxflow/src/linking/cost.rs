//! Pairwise linking costs between the markers of two consecutive frames.
//!
//! Rows index markers of frame `t-1`, columns markers of frame `t`. A pair is
//! reachable when its physical distance is within the motion gate and both
//! descriptors are defined. Each term (normalized distance, then each
//! descriptor feature) is z-scored over the reachable entries; descriptor
//! features are averaged within their group so every group carries the same
//! weight as the distance term. Costs are finally shifted so the cheapest
//! reachable pair costs 0.

use nalgebra::DMatrix;

use crate::features::FrameDescriptors;
use crate::volume::{voxel_to_vec, Scaling};

/// Cost value of an unreachable pair.
pub const UNREACHABLE: f64 = f64::INFINITY;

const STD_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    /// Linking costs; [`UNREACHABLE`] where the pair is gated out.
    pub costs: DMatrix<f64>,
    /// Physical distance of every pair (reachable or not).
    pub distances_um: DMatrix<f64>,
}

impl CostMatrix {
    pub fn nrows(&self) -> usize {
        self.costs.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.costs.ncols()
    }

    #[inline]
    pub fn cost(&self, row: usize, col: usize) -> f64 {
        self.costs[(row, col)]
    }

    #[inline]
    pub fn is_reachable(&self, row: usize, col: usize) -> bool {
        self.costs[(row, col)].is_finite()
    }

    /// Reachable columns of `row` with their costs, in column order.
    pub fn row_candidates(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        (0..self.ncols())
            .map(move |c| (c, self.cost(row, c)))
            .filter(|(_, v)| v.is_finite())
    }

    /// Reachable rows of `col` with their costs, in row order.
    pub fn col_candidates(&self, col: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        (0..self.nrows())
            .map(move |r| (r, self.cost(r, col)))
            .filter(|(_, v)| v.is_finite())
    }

    pub fn row_min(&self, row: usize) -> Option<f64> {
        self.row_candidates(row).map(|(_, v)| v).reduce(f64::min)
    }

    pub fn col_min(&self, col: usize) -> Option<f64> {
        self.col_candidates(col).map(|(_, v)| v).reduce(f64::min)
    }

    pub fn n_reachable(&self) -> usize {
        self.costs.iter().filter(|v| v.is_finite()).count()
    }

    pub fn max_reachable(&self) -> Option<f64> {
        self.costs
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f64::max)
    }
}

/// Build the cost matrix for the marker sets of frames `t-1` (`prev`) and
/// `t` (`next`).
pub fn build_cost_matrix(
    prev: &FrameDescriptors,
    next: &FrameDescriptors,
    scaling: &Scaling,
    max_link_distance_um: f64,
) -> CostMatrix {
    let (nr, nc) = (prev.len(), next.len());
    let distances_um = DMatrix::from_fn(nr, nc, |r, c| {
        scaling.distance(voxel_to_vec(prev.markers[r]), voxel_to_vec(next.markers[c]))
    });
    let reachable = DMatrix::from_fn(nr, nc, |r, c| {
        distances_um[(r, c)] <= max_link_distance_um
            && prev.descriptors[r].defined
            && next.descriptors[c].defined
    });

    let mut acc = DMatrix::<f64>::zeros(nr, nc);
    let gate = if max_link_distance_um > 0.0 {
        max_link_distance_um
    } else {
        1.0
    };
    accumulate_zscored(&mut acc, &reachable, 1.0, |r, c| distances_um[(r, c)] / gate);

    let n_stats = prev
        .descriptors
        .first()
        .or(next.descriptors.first())
        .map_or(0, |d| d.stats.len());
    for k in 0..n_stats {
        accumulate_zscored(&mut acc, &reachable, 1.0 / n_stats as f64, |r, c| {
            (prev.descriptors[r].stats[k] - next.descriptors[c].stats[k]).abs()
        });
    }

    let n_shape = prev
        .descriptors
        .first()
        .or(next.descriptors.first())
        .map_or(0, |d| d.shape.len());
    for k in 0..n_shape {
        accumulate_zscored(&mut acc, &reachable, 1.0 / n_shape as f64, |r, c| {
            (prev.descriptors[r].shape[k] - next.descriptors[c].shape[k]).abs()
        });
    }

    let min_cost = acc
        .iter()
        .zip(reachable.iter())
        .filter(|(_, ok)| **ok)
        .map(|(v, _)| *v)
        .reduce(f64::min)
        .unwrap_or(0.0);
    let costs = DMatrix::from_fn(nr, nc, |r, c| {
        if reachable[(r, c)] {
            acc[(r, c)] - min_cost
        } else {
            UNREACHABLE
        }
    });

    let out = CostMatrix {
        costs,
        distances_um,
    };
    tracing::trace!(
        rows = nr,
        cols = nc,
        n_reachable = out.n_reachable(),
        "cost matrix built"
    );
    out
}

/// Add `weight · z(value)` to every reachable entry with a finite value.
///
/// The z-score is taken over those same entries; a constant term adds 0.
fn accumulate_zscored<F>(acc: &mut DMatrix<f64>, reachable: &DMatrix<bool>, weight: f64, value: F)
where
    F: Fn(usize, usize) -> f64,
{
    let (nr, nc) = acc.shape();
    let mut n = 0usize;
    let mut sum = 0.0;
    for c in 0..nc {
        for r in 0..nr {
            if reachable[(r, c)] {
                let v = value(r, c);
                if v.is_finite() {
                    n += 1;
                    sum += v;
                }
            }
        }
    }
    if n == 0 {
        return;
    }
    let mean = sum / n as f64;
    let mut ss = 0.0;
    for c in 0..nc {
        for r in 0..nr {
            if reachable[(r, c)] {
                let v = value(r, c);
                if v.is_finite() {
                    ss += (v - mean) * (v - mean);
                }
            }
        }
    }
    let std = (ss / n as f64).sqrt();
    if std <= STD_EPS {
        return;
    }
    for c in 0..nc {
        for r in 0..nr {
            if reachable[(r, c)] {
                let v = value(r, c);
                if v.is_finite() {
                    acc[(r, c)] += weight * (v - mean) / std;
                }
            }
        }
    }
}
