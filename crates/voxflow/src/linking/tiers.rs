//! Confidence tiers on top of the optimal assignment.
//!
//! Every pair of the optimal assignment is accepted; the tier only records
//! how unambiguous it is:
//!
//! 1. *mutual best*: the pair is the cheapest reachable option of both its
//!    row and its column;
//! 2. *sole alternative*: ignoring tier-1 markers, the row and column have at
//!    most one competing reachable option between them;
//! 3. *residual*: everything else, where the optimal assignment is the only
//!    tie-break.
//!
//! Rows left without a partner end their track, unpaired columns start a new
//! one. Ambiguous markers additionally get candidate lists of nearby
//! reachable partners (possible fusion or fission events).

use serde::{Deserialize, Serialize};

use super::cost::CostMatrix;
use super::hungarian::optimal_pairs;

/// Assignment and tiering parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Classify unambiguous non-mutual pairs as [`Confidence::SoleAlternative`].
    pub enable_sole_alternative: bool,
    /// Populate merge/emerge candidate lists for ambiguous markers.
    pub record_split_merge_candidates: bool,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            enable_sole_alternative: true,
            record_split_merge_candidates: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    MutualBest = 1,
    SoleAlternative = 2,
    Residual = 3,
}

impl Confidence {
    pub fn tier(self) -> u8 {
        self as u8
    }
}

/// An accepted marker link between frames `t-1` (row) and `t` (column).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub row: usize,
    pub col: usize,
    pub cost: f64,
    pub confidence: Confidence,
}

/// A reachable but unselected pair kept as a possible fusion/fission partner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkCandidate {
    pub row: usize,
    pub col: usize,
    pub cost: f64,
}

/// Outcome of linking one frame pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameLinks {
    /// Accepted links, sorted by row.
    pub correspondences: Vec<Correspondence>,
    /// Rows of frame `t-1` whose track ends.
    pub ended_rows: Vec<usize>,
    /// Columns of frame `t` that start a track.
    pub started_cols: Vec<usize>,
    /// `row` may have merged into `col`.
    pub merge_candidates: Vec<LinkCandidate>,
    /// `col` may have emerged from `row`.
    pub emerge_candidates: Vec<LinkCandidate>,
}

impl FrameLinks {
    pub fn count(&self, confidence: Confidence) -> usize {
        self.correspondences
            .iter()
            .filter(|c| c.confidence == confidence)
            .count()
    }
}

/// Solve the assignment for `cm` and classify every accepted pair.
pub fn solve_links(cm: &CostMatrix, config: &AssignmentConfig) -> FrameLinks {
    let (nr, nc) = (cm.nrows(), cm.ncols());
    let pairs = optimal_pairs(cm);

    let mut row_tier1 = vec![false; nr];
    let mut col_tier1 = vec![false; nc];
    let mut confidence: Vec<Option<Confidence>> = vec![None; pairs.len()];

    // ── tier 1: mutual best ──
    for (k, &(r, c)) in pairs.iter().enumerate() {
        let v = cm.cost(r, c);
        let row_best = cm.row_min(r).map_or(false, |m| v <= m);
        let col_best = cm.col_min(c).map_or(false, |m| v <= m);
        if row_best && col_best {
            confidence[k] = Some(Confidence::MutualBest);
            row_tier1[r] = true;
            col_tier1[c] = true;
        }
    }

    // ── tier 2: sole alternative, judged against the post-tier-1 state ──
    if config.enable_sole_alternative {
        for (k, &(r, c)) in pairs.iter().enumerate() {
            if confidence[k].is_some() {
                continue;
            }
            let row_alts = cm
                .row_candidates(r)
                .filter(|&(c2, _)| c2 != c && !col_tier1[c2])
                .count();
            let col_alts = cm
                .col_candidates(c)
                .filter(|&(r2, _)| r2 != r && !row_tier1[r2])
                .count();
            if row_alts + col_alts <= 1 {
                confidence[k] = Some(Confidence::SoleAlternative);
            }
        }
    }

    // ── tier 3: residual ──
    let correspondences: Vec<Correspondence> = pairs
        .iter()
        .zip(&confidence)
        .map(|(&(row, col), conf)| Correspondence {
            row,
            col,
            cost: cm.cost(row, col),
            confidence: conf.unwrap_or(Confidence::Residual),
        })
        .collect();

    let mut row_partner: Vec<Option<usize>> = vec![None; nr];
    let mut col_partner: Vec<Option<usize>> = vec![None; nc];
    for c in &correspondences {
        row_partner[c.row] = Some(c.col);
        col_partner[c.col] = Some(c.row);
    }
    let ended_rows: Vec<usize> = (0..nr).filter(|&r| row_partner[r].is_none()).collect();
    let started_cols: Vec<usize> = (0..nc).filter(|&c| col_partner[c].is_none()).collect();

    let mut merge_candidates = Vec::new();
    let mut emerge_candidates = Vec::new();
    if config.record_split_merge_candidates {
        let residual_rows: Vec<usize> = correspondences
            .iter()
            .filter(|c| c.confidence == Confidence::Residual)
            .map(|c| c.row)
            .chain(ended_rows.iter().copied())
            .collect();
        for r in residual_rows {
            merge_candidates.extend(
                cm.row_candidates(r)
                    .filter(|&(c, _)| row_partner[r] != Some(c))
                    .map(|(col, cost)| LinkCandidate { row: r, col, cost }),
            );
        }
        let residual_cols: Vec<usize> = correspondences
            .iter()
            .filter(|c| c.confidence == Confidence::Residual)
            .map(|c| c.col)
            .chain(started_cols.iter().copied())
            .collect();
        for c in residual_cols {
            emerge_candidates.extend(
                cm.col_candidates(c)
                    .filter(|&(r, _)| col_partner[c] != Some(r))
                    .map(|(row, cost)| LinkCandidate { row, col: c, cost }),
            );
        }
        sort_candidates(&mut merge_candidates);
        sort_candidates(&mut emerge_candidates);
    }

    let links = FrameLinks {
        correspondences,
        ended_rows,
        started_cols,
        merge_candidates,
        emerge_candidates,
    };
    tracing::debug!(
        tier1 = links.count(Confidence::MutualBest),
        tier2 = links.count(Confidence::SoleAlternative),
        tier3 = links.count(Confidence::Residual),
        ended = links.ended_rows.len(),
        started = links.started_cols.len(),
        "frame pair linked"
    );
    links
}

fn sort_candidates(v: &mut [LinkCandidate]) {
    v.sort_by(|a, b| {
        a.cost
            .total_cmp(&b.cost)
            .then(a.row.cmp(&b.row))
            .then(a.col.cmp(&b.col))
    });
}
