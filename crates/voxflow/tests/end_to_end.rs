//! End-to-end tracking on small synthetic sequences.

use ndarray::Array3;
use voxflow::linking::{build_cost_matrix, solve_links};
use voxflow::{
    features, io, BackendKind, ComputeBackend, FeatureConfig, FrameInputs, Propagation, Scaling,
    Sequence, TrackConfig, Tracker, Voxel,
};

type Object = (Vec<Voxel>, u32);

fn cube(origin: Voxel, size: usize) -> Vec<Voxel> {
    let mut out = Vec::new();
    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                out.push([origin[0] + z, origin[1] + y, origin[2] + x]);
            }
        }
    }
    out
}

fn shift(voxels: &[Voxel], by: [usize; 3]) -> Vec<Voxel> {
    voxels
        .iter()
        .map(|v| [v[0] + by[0], v[1] + by[1], v[2] + by[2]])
        .collect()
}

/// Frame with uniform objects, a chessboard-style distance map (1 on every
/// foreground voxel, 2 deeper inside) and one structure channel.
fn frame(shape: [usize; 3], objects: &[Object], markers: &[Voxel]) -> FrameInputs {
    let dims = (shape[0], shape[1], shape[2]);
    let mut labels = Array3::<u32>::zeros(dims);
    for (voxels, label) in objects {
        for v in voxels {
            labels[*v] = *label;
        }
    }
    let intensity = labels.mapv(|l| if l > 0 { 30.0 + 15.0 * l as f32 } else { 0.0 });
    let mut distance = Array3::<f32>::zeros(dims);
    for ((z, y, x), &l) in labels.indexed_iter() {
        if l == 0 {
            continue;
        }
        let interior = [z, y, x].iter().zip(shape.iter()).all(|(&c, &n)| c > 0 && c + 1 < n)
            && [[1, 0, 0], [0, 1, 0], [0, 0, 1]].iter().all(|d: &[usize; 3]| {
                labels[[z + d[0], y + d[1], x + d[2]]] == l && labels[[z - d[0], y - d[1], x - d[2]]] == l
            });
        distance[[z, y, x]] = if interior { 2.0 } else { 1.0 };
    }
    let structure = labels.mapv(|l| if l > 0 { 0.5 * l as f32 } else { -0.1 });
    let mut marker_vol = Array3::from_elem(dims, false);
    for m in markers {
        marker_vol[*m] = true;
    }
    FrameInputs::new(labels, intensity, marker_vol, distance).with_structure(vec![structure])
}

/// Two objects drifting in different directions over three frames.
fn two_object_sequence() -> Sequence {
    let shape = [6, 14, 14];
    let a = cube([1, 1, 1], 3);
    let b = cube([1, 8, 6], 3);
    let frames = (0..3)
        .map(|t| {
            let oa = shift(&a, [0, 0, t]);
            let ob = shift(&b, [0, t, 0]);
            frame(
                shape,
                &[(oa, 1), (ob, 2)],
                &[[2, 2, 2 + t], [2, 9 + t, 7]],
            )
        })
        .collect();
    Sequence::new(frames, Scaling::default(), 1.0)
}

fn config(speed: f64) -> TrackConfig {
    let mut cfg = TrackConfig::default();
    cfg.max_link_speed_um_per_s = speed;
    cfg.interpolation.max_radius_um = 3.0;
    cfg
}

#[test]
fn single_voxel_scene_moves_one_step_in_x() {
    let f0 = frame([3, 3, 3], &[(vec![[1, 1, 1]], 4)], &[[1, 1, 1]]);
    let f1 = frame([3, 3, 3], &[(vec![[1, 1, 2]], 9)], &[[1, 1, 2]]);
    let seq = Sequence::new(vec![f0, f1], Scaling::default(), 1.0);

    let result = Tracker::new().track(&seq).unwrap();
    let recs = result.flow.table.records_for_frame(0);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].origin, [1.0, 1.0, 1.0]);
    assert_eq!(recs[0].displacement, [0.0, 0.0, 1.0]);
    assert_eq!(recs[0].cost, 0.0);

    let labels = &result.labels.labels[1];
    assert_eq!(labels[[1, 1, 2]], 4);
    assert_eq!(labels.iter().filter(|l| **l > 0).count(), 1);
    assert_eq!(result.labels.steps[0].stats.n_unmatched, 0);
}

#[test]
fn uniform_translation_conserves_every_voxel() {
    let seq = two_object_sequence();
    let result = Tracker::with_config(config(2.0)).track(&seq).unwrap();
    for t in 1..3 {
        let prev = &result.labels.labels[t - 1];
        let next = &result.labels.labels[t];
        let upstream = &seq.frames[t].labels;
        for ((idx, &l), &u) in next.indexed_iter().zip(upstream.iter()) {
            assert_eq!(l > 0, u > 0, "frame {t} voxel {idx:?}");
            if l == 0 {
                continue;
            }
            let (z, y, x) = idx;
            // object 1 moves +x, object 2 moves +y
            let src = if u == 1 { [z, y, x - 1] } else { [z, y - 1, x] };
            assert_eq!(l, prev[src], "frame {t} voxel {idx:?}");
        }
        assert_eq!(result.labels.steps[t - 1].stats.n_unmatched, 0);
    }
    assert_eq!(result.labels_in_frame(2), vec![1, 2]);
}

#[test]
fn runs_are_bit_identical_across_backends() {
    let seq = two_object_sequence();
    let mut serial = config(2.0);
    serial.backend = BackendKind::Serial;
    let parallel = config(2.0);

    let a = Tracker::with_config(serial).track(&seq).unwrap();
    let b = Tracker::with_config(parallel.clone()).track(&seq).unwrap();
    let c = Tracker::with_config(parallel).track(&seq).unwrap();

    assert_eq!(a.flow.table, b.flow.table);
    assert_eq!(b.flow.table, c.flow.table);
    assert_eq!(a.labels.labels, b.labels.labels);
    assert_eq!(b.labels.labels, c.labels.labels);
    for (x, y) in a.flow.pairs.iter().zip(&b.flow.pairs) {
        assert_eq!(x.links, y.links);
    }
}

#[test]
fn larger_gate_never_loses_correspondences() {
    let seq = two_object_sequence();
    let backend = ComputeBackend::serial();
    let cfg = FeatureConfig::default();
    let d0 = features::extract_frame_descriptors(0, &seq.frames[0], &cfg, &backend);
    let d1 = features::extract_frame_descriptors(1, &seq.frames[1], &cfg, &backend);
    let mut last = 0;
    for gate in [0.5, 1.0, 1.5, 3.0, 6.0, 12.0, 24.0] {
        let cm = build_cost_matrix(&d0, &d1, &seq.scaling, gate);
        let links = solve_links(&cm, &Default::default());
        let n = links.correspondences.len();
        assert!(n >= last, "gate {gate}: {n} < {last}");
        last = n;
    }
    assert_eq!(last, 2);
}

#[test]
fn backward_propagation_carries_last_frame_labels() {
    let mut seq = two_object_sequence();
    seq.frames[2].labels.mapv_inplace(|l| l * 10);
    let mut cfg = config(2.0);
    cfg.propagation = Propagation::Backward;
    let result = Tracker::with_config(cfg).track(&seq).unwrap();
    assert_eq!(result.labels_in_frame(0), vec![10, 20]);
}

#[test]
fn documents_reload_and_reproduce_labels() {
    let seq = two_object_sequence();
    let reloaded = io::sequence_from_json_str(&io::sequence_to_json_string(&seq).unwrap()).unwrap();
    let tracker = Tracker::with_config(config(2.0));

    let first = tracker.track(&seq).unwrap();
    let table =
        voxflow::SparseFlowTable::from_json_str(&first.flow.table.to_json_string().unwrap()).unwrap();
    let labels = tracker.propagate_labels(&reloaded, &table).unwrap();
    assert_eq!(labels.labels, first.labels.labels);

    let doc = io::labels_to_json_string(&labels).unwrap();
    let back = io::labels_from_json_str(&doc).unwrap();
    assert_eq!(back.labels, labels.labels);
    assert_eq!(back.steps.len(), 2);
}
