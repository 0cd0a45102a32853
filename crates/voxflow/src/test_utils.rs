//! Shared synthetic-volume builders for unit tests.

use ndarray::Array3;

use crate::volume::{FrameInputs, Scaling, Sequence, Voxel};

/// Voxels of an axis-aligned cube with corner `origin` and side `size`.
pub(crate) fn cube_voxels(origin: Voxel, size: usize) -> Vec<Voxel> {
    let mut out = Vec::with_capacity(size * size * size);
    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                out.push([origin[0] + z, origin[1] + y, origin[2] + x]);
            }
        }
    }
    out
}

/// Translate voxels by a signed offset.
pub(crate) fn shifted(voxels: &[Voxel], by: [isize; 3]) -> Vec<Voxel> {
    voxels
        .iter()
        .map(|v| {
            [
                (v[0] as isize + by[0]) as usize,
                (v[1] as isize + by[1]) as usize,
                (v[2] as isize + by[2]) as usize,
            ]
        })
        .collect()
}

/// Paint labeled objects into a zero volume.
pub(crate) fn label_volume(shape: [usize; 3], objects: &[(Vec<Voxel>, u32)]) -> Array3<u32> {
    let mut labels = Array3::zeros((shape[0], shape[1], shape[2]));
    for (voxels, label) in objects {
        for v in voxels {
            labels[*v] = *label;
        }
    }
    labels
}

/// Brute-force Euclidean distance to the nearest background voxel; the
/// volume border counts as background.
pub(crate) fn distance_map(labels: &Array3<u32>) -> Array3<f32> {
    let (d, h, w) = labels.dim();
    let background: Vec<Voxel> = labels
        .indexed_iter()
        .filter(|(_, &l)| l == 0)
        .map(|((z, y, x), _)| [z, y, x])
        .collect();
    let mut out = Array3::<f32>::zeros((d, h, w));
    for ((z, y, x), &l) in labels.indexed_iter() {
        if l == 0 {
            continue;
        }
        let border = [z + 1, d - z, y + 1, h - y, x + 1, w - x]
            .into_iter()
            .min()
            .unwrap_or(0) as f64;
        let nearest = background
            .iter()
            .map(|b| {
                let dz = b[0] as f64 - z as f64;
                let dy = b[1] as f64 - y as f64;
                let dx = b[2] as f64 - x as f64;
                (dz * dz + dy * dy + dx * dx).sqrt()
            })
            .fold(border, f64::min);
        out[[z, y, x]] = nearest as f32;
    }
    out
}

/// Frame with uniform-intensity objects (`40 + 20 · label`), the matching
/// distance map and markers at the given voxels.
pub(crate) fn blob_frame(shape: [usize; 3], objects: &[(Vec<Voxel>, u32)], markers: &[Voxel]) -> FrameInputs {
    let labels = label_volume(shape, objects);
    let intensity = labels.mapv(|l| if l > 0 { 40.0 + 20.0 * l as f32 } else { 0.0 });
    let distance = distance_map(&labels);
    let mut marker_vol = Array3::from_elem(labels.raw_dim(), false);
    for m in markers {
        marker_vol[*m] = true;
    }
    FrameInputs::new(labels, intensity, marker_vol, distance)
}

/// A single cube (label 1) moving by `step` each frame, with one marker at
/// its center.
pub(crate) fn translating_cube_sequence(
    shape: [usize; 3],
    origin: Voxel,
    size: usize,
    step: [isize; 3],
    n_frames: usize,
) -> Sequence {
    let base = cube_voxels(origin, size);
    let center = [origin[0] + size / 2, origin[1] + size / 2, origin[2] + size / 2];
    let frames = (0..n_frames)
        .map(|t| {
            let by = step.map(|s| s * t as isize);
            let obj = shifted(&base, by);
            let marker = shifted(&[center], by)[0];
            blob_frame(shape, &[(obj, 1)], &[marker])
        })
        .collect();
    Sequence::new(frames, Scaling::default(), 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_map_peaks_in_the_middle() {
        let labels = label_volume([5, 5, 5], &[(cube_voxels([1, 1, 1], 3), 1)]);
        let d = distance_map(&labels);
        assert_eq!(d[[2, 2, 2]], 2.0);
        assert_eq!(d[[1, 1, 1]], 1.0);
        assert_eq!(d[[0, 0, 0]], 0.0);
    }
}
