use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use voxflow::features::extract_frame_descriptors;
use voxflow::linking::{build_cost_matrix, solve_links, AssignmentConfig};
use voxflow::reassign::{FlowProjection, ReassignConfig, VoxelReassigner};
use voxflow::spatial::KdTree;
use voxflow::{
    ComputeBackend, DescriptorVector, FeatureConfig, FlowDirection, FlowRecord,
    FrameDescriptors, FrameFlowIndex, FrameInputs, InterpolationConfig, Scaling,
    SparseFlowTable, Vec3, Voxel,
};

fn make_marker_fixture(n: usize, seed: u64) -> (FrameDescriptors, FrameDescriptors) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut prev_markers = Vec::with_capacity(n);
    let mut next_markers = Vec::with_capacity(n);
    let mut prev_desc = Vec::with_capacity(n);
    let mut next_desc = Vec::with_capacity(n);
    for _ in 0..n {
        let p: Voxel = [rng.gen_range(2..30), rng.gen_range(2..126), rng.gen_range(2..126)];
        let q: Voxel = [
            p[0] + rng.gen_range(0..2),
            p[1] + rng.gen_range(0..3),
            p[2] + rng.gen_range(0..3),
        ];
        let stats: Vec<f64> = (0..12).map(|_| rng.gen_range(0.0..100.0)).collect();
        let shape: Vec<f64> = (0..36).map(|_| rng.gen_range(-5.0..5.0)).collect();
        let jitter = |v: &Vec<f64>, rng: &mut StdRng| -> Vec<f64> {
            v.iter().map(|x| x + rng.gen_range(-0.1..0.1)).collect()
        };
        next_desc.push(DescriptorVector {
            stats: jitter(&stats, &mut rng),
            shape: jitter(&shape, &mut rng),
            defined: true,
        });
        prev_desc.push(DescriptorVector {
            stats,
            shape,
            defined: true,
        });
        prev_markers.push(p);
        next_markers.push(q);
    }
    (
        FrameDescriptors {
            frame: 0,
            markers: prev_markers,
            descriptors: prev_desc,
        },
        FrameDescriptors {
            frame: 1,
            markers: next_markers,
            descriptors: next_desc,
        },
    )
}

fn bench_linking(c: &mut Criterion) {
    let (prev, next) = make_marker_fixture(300, 7);
    let scaling = Scaling::new(2.0, 0.5, 0.5);
    let cfg = AssignmentConfig::default();

    c.bench_function("cost_and_tiers_300x300", |b| {
        b.iter(|| {
            let cm = build_cost_matrix(black_box(&prev), black_box(&next), &scaling, 8.0);
            let links = solve_links(&cm, &cfg);
            black_box(links.correspondences.len())
        })
    });
}

fn make_frame_fixture(n_blobs: usize, seed: u64) -> FrameInputs {
    let mut rng = StdRng::seed_from_u64(seed);
    let dims = (24, 96, 96);
    let mut labels = Array3::<u32>::zeros(dims);
    let mut intensity = Array3::<f32>::zeros(dims);
    let mut distance = Array3::<f32>::zeros(dims);
    let mut markers = Array3::from_elem(dims, false);
    for label in 1..=n_blobs as u32 {
        let c: Voxel = [rng.gen_range(4..20), rng.gen_range(4..92), rng.gen_range(4..92)];
        let r: i64 = rng.gen_range(2..4);
        for dz in -r..=r {
            for dy in -r..=r {
                for dx in -r..=r {
                    let d2 = dz * dz + dy * dy + dx * dx;
                    if d2 > r * r {
                        continue;
                    }
                    let v = [
                        (c[0] as i64 + dz) as usize,
                        (c[1] as i64 + dy) as usize,
                        (c[2] as i64 + dx) as usize,
                    ];
                    labels[v] = label;
                    intensity[v] = rng.gen_range(50.0..200.0);
                    distance[v] = (r as f32 - (d2 as f32).sqrt()).max(1.0);
                }
            }
        }
        markers[c] = true;
    }
    let structure = intensity.mapv(|v| v * 0.01);
    FrameInputs::new(labels, intensity, markers, distance).with_structure(vec![structure])
}

fn bench_features(c: &mut Criterion) {
    let frame = make_frame_fixture(120, 5);
    let cfg = FeatureConfig::default();
    let backend = ComputeBackend::parallel();

    c.bench_function("descriptors_120_markers", |b| {
        b.iter(|| {
            let d = extract_frame_descriptors(0, black_box(&frame), &cfg, &backend);
            black_box(d.n_defined())
        })
    });
}

fn make_points(n: usize, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| [rng.gen_range(0.0..60.0), rng.gen_range(0.0..250.0), rng.gen_range(0.0..250.0)])
        .collect()
}

fn bench_kdtree(c: &mut Criterion) {
    let points = make_points(20_000, 11);
    let queries = make_points(2_000, 12);
    let tree = KdTree::build(points.clone());

    c.bench_function("kdtree_build_20k", |b| {
        b.iter(|| black_box(KdTree::build(black_box(points.clone())).len()))
    });

    c.bench_function("kdtree_nearest_2k", |b| {
        b.iter(|| {
            let mut acc = 0usize;
            for q in &queries {
                acc += tree.nearest(*q).map_or(0, |n| n.index);
            }
            black_box(acc)
        })
    });
}

fn make_flow_fixture(n: usize, seed: u64) -> SparseFlowTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let records = (0..n)
        .map(|_| FlowRecord {
            frame: 0,
            origin: [rng.gen_range(0.0..32.0), rng.gen_range(0.0..64.0), rng.gen_range(0.0..64.0)],
            displacement: [0.0, rng.gen_range(-1.0..1.0), 1.0],
            cost: rng.gen_range(0.0..3.0),
        })
        .collect();
    SparseFlowTable::from_records(records, Scaling::default()).expect("single-frame fixture is ordered")
}

fn bench_interpolation(c: &mut Criterion) {
    let table = make_flow_fixture(500, 21);
    let cfg = InterpolationConfig {
        max_radius_um: 6.0,
        ..Default::default()
    };
    let index = FrameFlowIndex::build(&table, 0, FlowDirection::Forward, &cfg);
    let queries = make_points(5_000, 22)
        .into_iter()
        .map(|p| [p[0] / 2.0, p[1] / 4.0, p[2] / 4.0])
        .collect::<Vec<_>>();
    let backend = ComputeBackend::parallel();

    c.bench_function("interpolate_5k_points", |b| {
        b.iter(|| {
            let out = backend.map_slice(&queries, |p| index.displacement_at(*p));
            black_box(out.iter().filter(|d| d.is_some()).count())
        })
    });
}

fn bench_reassign(c: &mut Criterion) {
    let shape = (16, 48, 48);
    let mut prev = Array3::<u32>::zeros(shape);
    let mut next = Array3::<u32>::zeros(shape);
    for z in 2..14 {
        for y in 4..40 {
            for x in 4..40 {
                let label = if x < 22 { 1 } else { 2 };
                prev[[z, y, x]] = label;
                next[[z, y, x + 1]] = label;
            }
        }
    }
    let records = (0..8)
        .flat_map(|i| {
            (0..8).map(move |j| FlowRecord {
                frame: 0,
                origin: [8.0, 4.0 + 4.5 * i as f64, 4.0 + 4.5 * j as f64],
                displacement: [0.0, 0.0, 1.0],
                cost: 0.0,
            })
        })
        .collect();
    let table = SparseFlowTable::from_records(records, Scaling::default()).expect("ordered fixture");
    let cfg = InterpolationConfig {
        max_radius_um: 8.0,
        ..Default::default()
    };
    let fw = FrameFlowIndex::build(&table, 0, FlowDirection::Forward, &cfg);
    let bw = FrameFlowIndex::build(&table, 1, FlowDirection::Backward, &cfg);
    let reassigner = VoxelReassigner::new(
        ReassignConfig::default(),
        Scaling::default(),
        2.0,
        ComputeBackend::parallel(),
    );

    c.bench_function("reassign_15k_voxels", |b| {
        b.iter(|| {
            let out = reassigner.reassign(
                black_box(&prev),
                black_box(&next),
                Some(FlowProjection::along(&fw)),
                Some(FlowProjection::against(&bw)),
            );
            black_box(out.stats.n_unmatched)
        })
    });
}

criterion_group!(
    hotpaths,
    bench_features,
    bench_linking,
    bench_kdtree,
    bench_interpolation,
    bench_reassign
);
criterion_main!(hotpaths);
