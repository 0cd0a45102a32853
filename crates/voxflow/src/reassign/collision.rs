//! One-to-one resolution of voxel matches.

use std::collections::BTreeSet;

use super::VoxelMatch;
use crate::spatial::KdTree;
use crate::volume::{Scaling, Voxel};

/// Combine forward and backward match lists.
///
/// `Union` keeps every match; `Agreement` keeps only forward matches whose
/// `(prev, next)` pair was also found backward.
pub fn combine(forward: Vec<VoxelMatch>, backward: Vec<VoxelMatch>, agreement: bool) -> Vec<VoxelMatch> {
    if agreement {
        let confirmed: BTreeSet<(usize, usize)> = backward.iter().map(|m| (m.prev, m.next)).collect();
        return forward
            .into_iter()
            .filter(|m| confirmed.contains(&(m.prev, m.next)))
            .collect();
    }
    let mut out = forward;
    out.extend(backward);
    out
}

/// Keep, for every next-frame voxel, the closest prev-frame claimant.
///
/// Ties go to the lowest prev index. Returns `(kept, rejected)`; `kept` is
/// sorted by next index. Duplicate claims of the same pair are merged and not
/// counted as rejections.
pub fn resolve_collisions(matches: Vec<VoxelMatch>, n_next: usize) -> (Vec<VoxelMatch>, Vec<VoxelMatch>) {
    let mut best: Vec<Option<VoxelMatch>> = vec![None; n_next];
    let mut rejected = Vec::new();
    for m in matches {
        match best[m.next] {
            None => best[m.next] = Some(m),
            Some(cur) if cur.prev == m.prev => {
                if m.distance < cur.distance {
                    best[m.next] = Some(m);
                }
            }
            Some(cur) => {
                let wins = m.distance < cur.distance
                    || (m.distance == cur.distance && m.prev < cur.prev);
                if wins {
                    best[m.next] = Some(m);
                    rejected.push(cur);
                } else {
                    rejected.push(m);
                }
            }
        }
    }
    let kept = best.into_iter().flatten().collect();
    (kept, rejected)
}

/// Give collision losers a second chance on next-frame voxels nobody holds.
///
/// Every pending prev voxel proposes its nearest free next voxel within
/// `max_distance_um` (real voxel distance); proposals go through
/// [`resolve_collisions`] and the losers propose again on the remaining free
/// voxels. Returns the accepted matches, sorted by next index, and the prev
/// indices that found nothing.
pub fn rematch_rejected(
    rejected: &[VoxelMatch],
    kept: &[VoxelMatch],
    prev_voxels: &[Voxel],
    next_voxels: &[Voxel],
    scaling: &Scaling,
    max_distance_um: f64,
) -> (Vec<VoxelMatch>, Vec<usize>) {
    let placed: BTreeSet<usize> = kept.iter().map(|m| m.prev).collect();
    let mut pending: Vec<usize> = rejected
        .iter()
        .map(|m| m.prev)
        .filter(|p| !placed.contains(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut taken = vec![false; next_voxels.len()];
    for m in kept {
        taken[m.next] = true;
    }

    let mut accepted = Vec::new();
    while !pending.is_empty() {
        let free: Vec<usize> = (0..next_voxels.len()).filter(|&i| !taken[i]).collect();
        if free.is_empty() {
            break;
        }
        let tree = KdTree::build(
            free.iter()
                .map(|&i| scaling.voxel_to_physical(next_voxels[i]))
                .collect(),
        );
        let proposals: Vec<VoxelMatch> = pending
            .iter()
            .filter_map(|&p| {
                let hit = tree.nearest(scaling.voxel_to_physical(prev_voxels[p]))?;
                (hit.distance <= max_distance_um).then_some(VoxelMatch {
                    prev: p,
                    next: free[hit.index],
                    distance: hit.distance,
                })
            })
            .collect();
        if proposals.is_empty() {
            break;
        }
        let (won, _) = resolve_collisions(proposals, next_voxels.len());
        let won_prev: BTreeSet<usize> = won.iter().map(|m| m.prev).collect();
        for m in &won {
            taken[m.next] = true;
        }
        pending.retain(|p| !won_prev.contains(p));
        accepted.extend(won);
    }
    accepted.sort_by_key(|m| m.next);
    (accepted, pending)
}
