//! Per-marker shape/appearance descriptors.
//!
//! For every marker a cube of side `2r + 1` is cropped around it, where `r`
//! comes from the distance-to-background map. Each channel of the crop
//! (intensity first, then the structure channels in input order) is reduced
//! to maximum-intensity projections: one for 2-D sequences, three (along z, y
//! and x) otherwise. Every projection contributes global statistics (mean and
//! variance of non-zero pixels) and six log-compressed Hu invariants.

pub mod moments;

use std::borrow::Cow;

use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::compute::ComputeBackend;
use crate::volume::{marker_voxels, shape_of, FrameInputs, Voxel};
use moments::{log_hu, nonzero_mean_variance, N_HU, N_STATS};

/// Descriptor extraction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Multiplier applied to the distance map value to get the crop radius.
    pub radius_scale: f64,
    /// Take the radius from the maximum distance in the 3×3×3 neighbourhood
    /// of the marker instead of the marker voxel alone.
    pub neighborhood_max_radius: bool,
    /// Log-compress structure channels before cropping.
    pub log_structure: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            radius_scale: 1.0,
            neighborhood_max_radius: false,
            log_structure: true,
        }
    }
}

/// Descriptor of one marker, split into feature groups.
///
/// Group layout is `[channel][projection][feature]`, flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorVector {
    /// Mean and variance per (channel, projection).
    pub stats: Vec<f64>,
    /// Six log-Hu invariants per (channel, projection).
    pub shape: Vec<f64>,
    /// False when the intensity crop holds no signal; such markers cannot be
    /// linked.
    pub defined: bool,
}

impl DescriptorVector {
    fn undefined(n_stats: usize, n_shape: usize) -> Self {
        Self {
            stats: vec![f64::NAN; n_stats],
            shape: vec![f64::NAN; n_shape],
            defined: false,
        }
    }
}

/// Markers of one frame together with their descriptors (same order).
#[derive(Debug, Clone)]
pub struct FrameDescriptors {
    pub frame: usize,
    pub markers: Vec<Voxel>,
    pub descriptors: Vec<DescriptorVector>,
}

impl FrameDescriptors {
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn n_defined(&self) -> usize {
        self.descriptors.iter().filter(|d| d.defined).count()
    }
}

/// Number of projections taken per channel for a volume of this shape.
pub fn projection_count(shape: [usize; 3]) -> usize {
    if shape[0] == 1 {
        1
    } else {
        3
    }
}

/// Extract descriptors for every marker of `inputs`.
///
/// Markers are enumerated in C order; the result is independent of the
/// backend.
pub fn extract_frame_descriptors(
    frame: usize,
    inputs: &FrameInputs,
    config: &FeatureConfig,
    backend: &ComputeBackend,
) -> FrameDescriptors {
    let markers = marker_voxels(&inputs.markers);
    let shape = inputs.shape();

    let mut channels: Vec<Cow<'_, Array3<f32>>> = Vec::with_capacity(1 + inputs.structure.len());
    channels.push(Cow::Borrowed(&inputs.intensity));
    for ch in &inputs.structure {
        if config.log_structure {
            channels.push(Cow::Owned(log_compress_structure(ch)));
        } else {
            channels.push(Cow::Borrowed(ch));
        }
    }

    let n_proj = projection_count(shape);
    let n_stats = channels.len() * n_proj * N_STATS;
    let n_shape = channels.len() * n_proj * N_HU;
    let flat_z = shape[0] == 1;
    let max_radius = shape.iter().copied().max().unwrap_or(0);

    let descriptors = backend.map_slice(&markers, |&voxel| {
        let radius = marker_radius(&inputs.distance, voxel, config).min(max_radius);
        let mut stats = Vec::with_capacity(n_stats);
        let mut shape_feats = Vec::with_capacity(n_shape);
        for (ci, ch) in channels.iter().enumerate() {
            let crop = crop_cube(ch, voxel, radius, flat_z);
            if ci == 0 && !crop.iter().any(|v| *v != 0.0) {
                return DescriptorVector::undefined(n_stats, n_shape);
            }
            for proj in max_projections(&crop, flat_z) {
                stats.extend_from_slice(&nonzero_mean_variance(&proj));
                shape_feats.extend_from_slice(&log_hu(&proj));
            }
        }
        DescriptorVector {
            stats,
            shape: shape_feats,
            defined: true,
        }
    });

    let out = FrameDescriptors {
        frame,
        markers,
        descriptors,
    };
    tracing::debug!(
        frame,
        n_markers = out.len(),
        n_undefined = out.len() - out.n_defined(),
        "marker descriptors extracted"
    );
    out
}

/// Crop radius (in voxels) for the marker at `voxel`.
pub fn marker_radius(distance: &Array3<f32>, voxel: Voxel, config: &FeatureConfig) -> usize {
    let d = if config.neighborhood_max_radius {
        neighborhood_max(distance, voxel)
    } else {
        distance[voxel] as f64
    };
    let r = (d * config.radius_scale).ceil();
    if r.is_finite() && r > 0.0 {
        r as usize
    } else {
        0
    }
}

fn neighborhood_max(volume: &Array3<f32>, voxel: Voxel) -> f64 {
    let shape = shape_of(volume);
    let lo = |a: usize| voxel[a].saturating_sub(1);
    let hi = |a: usize| (voxel[a] + 2).min(shape[a]);
    volume
        .slice(s![lo(0)..hi(0), lo(1)..hi(1), lo(2)..hi(2)])
        .iter()
        .fold(0.0f64, |m, &v| m.max(v as f64))
}

/// Zero-padded cube crop of side `2r + 1` centered on `center`.
///
/// With `flat_z` the crop has depth 1 (2-D sequences).
pub fn crop_cube(volume: &Array3<f32>, center: Voxel, radius: usize, flat_z: bool) -> Array3<f64> {
    let shape = shape_of(volume);
    let radii = [if flat_z { 0 } else { radius }, radius, radius];
    let side = radii.map(|r| 2 * r + 1);
    let mut out = Array3::<f64>::zeros((side[0], side[1], side[2]));

    let mut src = [(0usize, 0usize); 3];
    let mut dst = [(0usize, 0usize); 3];
    for a in 0..3 {
        let start = center[a] as isize - radii[a] as isize;
        let end = center[a] as isize + radii[a] as isize + 1;
        let lo = start.max(0);
        let hi = end.min(shape[a] as isize);
        if hi <= lo {
            return out;
        }
        src[a] = (lo as usize, hi as usize);
        dst[a] = ((lo - start) as usize, (hi - start) as usize);
    }

    out.slice_mut(s![dst[0].0..dst[0].1, dst[1].0..dst[1].1, dst[2].0..dst[2].1])
        .assign(
            &volume
                .slice(s![src[0].0..src[0].1, src[1].0..src[1].1, src[2].0..src[2].1])
                .mapv(|v| v as f64),
        );
    out
}

/// Maximum-intensity projections of a crop.
///
/// 2-D: the single `[y, x]` plane. 3-D: projections along z, y and x.
pub fn max_projections(crop: &Array3<f64>, flat_z: bool) -> Vec<Array2<f64>> {
    let axes: &[usize] = if flat_z { &[0] } else { &[0, 1, 2] };
    axes.iter()
        .map(|&a| crop.fold_axis(Axis(a), f64::NEG_INFINITY, |m, &v| m.max(v)))
        .collect()
}

/// Log-compress a structure channel: positive values become `log10(v)`, then
/// all negative values are shifted up by the most negative one.
pub fn log_compress_structure(channel: &Array3<f32>) -> Array3<f32> {
    let mut out = channel.mapv(|v| if v > 0.0 { v.log10() } else { v });
    let min_neg = out
        .iter()
        .copied()
        .filter(|v| *v < 0.0)
        .fold(0.0f32, f32::min);
    if min_neg < 0.0 {
        out.mapv_inplace(|v| if v < 0.0 { v - min_neg } else { v });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{blob_frame, cube_voxels};
    use approx::assert_abs_diff_eq;

    #[test]
    fn crop_pads_with_zeros_at_border() {
        let vol = Array3::from_elem((1, 4, 4), 1.0f32);
        let crop = crop_cube(&vol, [0, 0, 0], 2, true);
        assert_eq!(crop.dim(), (1, 5, 5));
        assert_abs_diff_eq!(crop.sum(), 9.0);
        assert_abs_diff_eq!(crop[[0, 0, 0]], 0.0);
        assert_abs_diff_eq!(crop[[0, 2, 2]], 1.0);
    }

    #[test]
    fn crop_3d_has_cubic_side() {
        let vol = Array3::from_elem((6, 6, 6), 2.0f32);
        let crop = crop_cube(&vol, [3, 3, 3], 1, false);
        assert_eq!(crop.dim(), (3, 3, 3));
        assert_abs_diff_eq!(crop.sum(), 54.0);
    }

    #[test]
    fn projections_follow_dimensionality() {
        let crop = Array3::<f64>::zeros((3, 3, 3));
        assert_eq!(max_projections(&crop, false).len(), 3);
        let flat = Array3::<f64>::zeros((1, 3, 3));
        assert_eq!(max_projections(&flat, true).len(), 1);
    }

    #[test]
    fn structure_compression_is_non_negative() {
        let mut ch = Array3::<f32>::zeros((1, 1, 4));
        ch[[0, 0, 0]] = 100.0;
        ch[[0, 0, 1]] = 0.01;
        ch[[0, 0, 2]] = -3.0;
        let out = log_compress_structure(&ch);
        assert!(out.iter().all(|v| *v >= 0.0));
        assert_abs_diff_eq!(out[[0, 0, 0]], 2.0, epsilon = 1e-6);
        // log10(0.01) = -2, shifted by -3 -> 1
        assert_abs_diff_eq!(out[[0, 0, 1]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[0, 0, 2]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn radius_from_distance_map() {
        let mut dist = Array3::<f32>::zeros((3, 3, 3));
        dist[[1, 1, 1]] = 1.2;
        dist[[0, 1, 1]] = 2.5;
        let mut cfg = FeatureConfig::default();
        assert_eq!(marker_radius(&dist, [1, 1, 1], &cfg), 2);
        cfg.neighborhood_max_radius = true;
        assert_eq!(marker_radius(&dist, [1, 1, 1], &cfg), 3);
        assert_eq!(marker_radius(&dist, [2, 2, 2], &FeatureConfig::default()), 0);
    }

    #[test]
    fn descriptor_layout_3d() {
        let object = cube_voxels([2, 2, 2], 3);
        let frame = blob_frame([8, 8, 8], &[(object, 1)], &[[3, 3, 3]]);
        let d = extract_frame_descriptors(0, &frame, &FeatureConfig::default(), &ComputeBackend::serial());
        assert_eq!(d.len(), 1);
        let desc = &d.descriptors[0];
        assert!(desc.defined);
        assert_eq!(desc.stats.len(), 3 * N_STATS);
        assert_eq!(desc.shape.len(), 3 * N_HU);
    }

    #[test]
    fn marker_on_empty_intensity_is_undefined() {
        let mut frame = blob_frame([1, 6, 6], &[], &[[0, 3, 3]]);
        frame.distance[[0, 3, 3]] = 1.0;
        let d = extract_frame_descriptors(0, &frame, &FeatureConfig::default(), &ComputeBackend::serial());
        assert!(!d.descriptors[0].defined);
        assert_eq!(d.n_defined(), 0);
    }

    #[test]
    fn backends_produce_identical_descriptors() {
        let a = cube_voxels([1, 1, 1], 2);
        let b = cube_voxels([5, 5, 5], 3);
        let frame = blob_frame([9, 9, 9], &[(a, 1), (b, 2)], &[[1, 1, 1], [6, 6, 6]]);
        let cfg = FeatureConfig::default();
        let s = extract_frame_descriptors(0, &frame, &cfg, &ComputeBackend::serial());
        let p = extract_frame_descriptors(0, &frame, &cfg, &ComputeBackend::parallel());
        assert_eq!(s.markers, p.markers);
        for (x, y) in s.descriptors.iter().zip(&p.descriptors) {
            assert_eq!(x.defined, y.defined);
            for (u, v) in x.stats.iter().zip(&y.stats).chain(x.shape.iter().zip(&y.shape)) {
                assert!(u == v || (u.is_nan() && v.is_nan()));
            }
        }
    }
}
