//! Optimal one-to-one assignment on a gated, rectangular cost matrix.
//!
//! The rectangular matrix is embedded in a square one of side `rows + cols`:
//! every real row gets a private "unassigned" column and every real column a
//! private "unassigned" row. Leaving a marker unassigned costs `N`, more than
//! any reachable pair can save, so the solver maximizes the number of
//! reachable pairs first and minimizes their total cost second. Gated-out
//! pairs cost `3N`, so they are never preferred over two dummy slots.

use nalgebra::DMatrix;

use super::cost::CostMatrix;

/// Shortest augmenting path solver (potentials, O(n³)) on a square matrix.
///
/// Returns `assignment[row] = col`.
pub fn solve_square(c: &DMatrix<f64>) -> Vec<usize> {
    let n = c.nrows();
    debug_assert_eq!(n, c.ncols());
    if n == 0 {
        return Vec::new();
    }
    let inf = f64::INFINITY;

    // 1-indexed; index 0 is the virtual source column.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut min_val = vec![inf; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let val = c[(i0 - 1, j - 1)] - u[i0] - v[j];
                if val < min_val[j] {
                    min_val[j] = val;
                    way[j] = j0;
                }
                if min_val[j] < delta {
                    delta = min_val[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let prev = way[j0];
            p[j0] = p[prev];
            j0 = prev;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if p[j] > 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Optimal reachable `(row, col)` pairs of a gated cost matrix, sorted by row.
pub fn optimal_pairs(cm: &CostMatrix) -> Vec<(usize, usize)> {
    let (nr, nc) = (cm.nrows(), cm.ncols());
    if nr == 0 || nc == 0 || cm.n_reachable() == 0 {
        return Vec::new();
    }
    let padded = padded_square(cm);
    let assignment = solve_square(&padded);
    let pairs: Vec<(usize, usize)> = assignment
        .iter()
        .enumerate()
        .take(nr)
        .filter(|&(r, &c)| c < nc && cm.is_reachable(r, c))
        .map(|(r, &c)| (r, c))
        .collect();
    tracing::trace!(rows = nr, cols = nc, n_pairs = pairs.len(), "assignment solved");
    pairs
}

fn padded_square(cm: &CostMatrix) -> DMatrix<f64> {
    let (nr, nc) = (cm.nrows(), cm.ncols());
    let n = nr + nc;
    let max_cost = cm.max_reachable().unwrap_or(0.0).max(0.0);
    let unassigned = (max_cost + 1.0) * n as f64;
    let gated = 3.0 * unassigned;
    DMatrix::from_fn(n, n, |r, c| match (r < nr, c < nc) {
        (true, true) => {
            let v = cm.cost(r, c);
            if v.is_finite() {
                v
            } else {
                gated
            }
        }
        (true, false) => {
            if c - nc == r {
                unassigned
            } else {
                gated
            }
        }
        (false, true) => {
            if r - nr == c {
                unassigned
            } else {
                gated
            }
        }
        (false, false) => 0.0,
    })
}
