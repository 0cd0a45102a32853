//! Static 3-D k-d tree over points in physical units.
//!
//! Queries are deterministic: equal distances are broken by the lowest point
//! index, and radius queries return neighbours sorted by `(distance, index)`.

use crate::volume::{Scaling, Vec3, Voxel};

/// Result of a spatial query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the point in the slice the tree was built from.
    pub index: usize,
    /// Euclidean distance to the query point.
    pub distance: f64,
}

#[derive(Debug, Clone)]
struct Node {
    point: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct KdTree {
    points: Vec<Vec3>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl KdTree {
    pub fn build(points: Vec<Vec3>) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        let root = build_recursive(&points, &mut order, 0, &mut nodes);
        Self {
            points,
            nodes,
            root,
        }
    }

    /// Tree over voxel coordinates scaled to physical units.
    pub fn from_voxels(voxels: &[Voxel], scaling: &Scaling) -> Self {
        Self::build(voxels.iter().map(|v| scaling.voxel_to_physical(*v)).collect())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Vec3 {
        self.points[index]
    }

    /// Closest point to `query`; ties go to the lowest index.
    pub fn nearest(&self, query: Vec3) -> Option<Neighbor> {
        let root = self.root?;
        let mut best = (f64::INFINITY, usize::MAX);
        self.nearest_recursive(root, &query, &mut best);
        (best.1 != usize::MAX).then(|| Neighbor {
            index: best.1,
            distance: best.0.sqrt(),
        })
    }

    /// All points within `radius` (inclusive), sorted by `(distance, index)`.
    pub fn within_radius(&self, query: Vec3, radius: f64) -> Vec<Neighbor> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        let mut out: Vec<(f64, usize)> = Vec::new();
        let r2 = radius * radius;
        let mut stack = vec![root];
        while let Some(ni) = stack.pop() {
            let node = &self.nodes[ni];
            let p = &self.points[node.point];
            let d2 = dist2(p, &query);
            if d2 <= r2 {
                out.push((d2, node.point));
            }
            let diff = query[node.axis] - p[node.axis];
            let (near, far) = if diff < 0.0 {
                (node.left, node.right)
            } else {
                (node.right, node.left)
            };
            if let Some(n) = near {
                stack.push(n);
            }
            if diff * diff <= r2 {
                if let Some(f) = far {
                    stack.push(f);
                }
            }
        }
        out.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        out.into_iter()
            .map(|(d2, index)| Neighbor {
                index,
                distance: d2.sqrt(),
            })
            .collect()
    }

    fn nearest_recursive(&self, ni: usize, query: &Vec3, best: &mut (f64, usize)) {
        let node = &self.nodes[ni];
        let p = &self.points[node.point];
        let d2 = dist2(p, query);
        if d2 < best.0 || (d2 == best.0 && node.point < best.1) {
            *best = (d2, node.point);
        }
        let diff = query[node.axis] - p[node.axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(n) = near {
            self.nearest_recursive(n, query, best);
        }
        // equality keeps the far side alive for index tie-breaking
        if diff * diff <= best.0 {
            if let Some(f) = far {
                self.nearest_recursive(f, query, best);
            }
        }
    }
}

fn build_recursive(
    points: &[Vec3],
    order: &mut [usize],
    depth: usize,
    nodes: &mut Vec<Node>,
) -> Option<usize> {
    if order.is_empty() {
        return None;
    }
    let axis = depth % 3;
    order.sort_by(|&a, &b| points[a][axis].total_cmp(&points[b][axis]).then(a.cmp(&b)));
    let mid = order.len() / 2;
    let point = order[mid];
    let ni = nodes.len();
    nodes.push(Node {
        point,
        axis,
        left: None,
        right: None,
    });
    let (lo, rest) = order.split_at_mut(mid);
    let left = build_recursive(points, lo, depth + 1, nodes);
    let right = build_recursive(points, &mut rest[1..], depth + 1, nodes);
    nodes[ni].left = left;
    nodes[ni].right = right;
    Some(ni)
}

#[inline]
fn dist2(a: &Vec3, b: &Vec3) -> f64 {
    let dz = a[0] - b[0];
    let dy = a[1] - b[1];
    let dx = a[2] - b[2];
    dz * dz + dy * dy + dx * dx
}
