use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::Vec3A;
use rand::{thread_rng, Rng};
use strum::IntoEnumIterator;

use bvh4::*;

const TRIANGLES_NUM: usize = 20_000;

const CAM_POS: Vec3A = Vec3A::new(0.0, 0.0, -18.0);
const P0: Vec3A = Vec3A::new(-1.0, 1.0, -15.0);
const P1: Vec3A = Vec3A::new(1.0, 1.0, -15.0);
const P2: Vec3A = Vec3A::new(-1.0, -1.0, -15.0);

const RESOLUTION_X: usize = 256;
const RESOLUTION_Y: usize = 256;
/// Packets cover 4x4 pixel tiles
const TILE: usize = 4;

fn random_triangles() -> Vec<Triangle> {
    let mut rng = thread_rng();
    (0..TRIANGLES_NUM)
        .map(|_| {
            let v0 = rng.gen::<Vec3A>() * 9.0 - Vec3A::splat(5.0);
            let v1 = v0 + rng.gen::<Vec3A>() - Vec3A::splat(0.5);
            let v2 = v0 + rng.gen::<Vec3A>() - Vec3A::splat(0.5);
            Triangle::new(v0, v1, v2)
        })
        .collect()
}

fn camera_ray(x: usize, y: usize) -> Ray {
    let pixel_pos: Vec3A = P0
        + (P1 - P0) * (x as f32 / RESOLUTION_X as f32)
        + (P2 - P0) * (y as f32 / RESOLUTION_Y as f32);
    Ray::infinite_ray(CAM_POS, (pixel_pos - CAM_POS).normalize_or_zero())
}

fn camera_packets() -> Vec<RayPacket> {
    let mut packets = Vec::with_capacity(RESOLUTION_X * RESOLUTION_Y / (TILE * TILE));
    for y in (0..RESOLUTION_Y).step_by(TILE) {
        for x in (0..RESOLUTION_X).step_by(TILE) {
            packets.push(RayPacket::from_rays(
                (0..TILE * TILE).map(|i| camera_ray(x + i % TILE, y + i / TILE)),
            ));
        }
    }
    packets
}

fn create(scene: &Scene, config: &AccelConfig) -> AccelInstance {
    create_accel(
        scene,
        config,
        CpuFeatures::detect(),
        &IntersectorRegistry::with_default_kernels(),
    )
    .unwrap()
}

fn build(c: &mut Criterion) {
    let scene = Scene::from_triangles(random_triangles());
    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(TRIANGLES_NUM as u64));
    group.sample_size(20);

    for mode in BuildMode::iter().filter(|m| *m != BuildMode::VirtualGeometry) {
        let config = AccelConfig {
            build_mode: mode,
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(mode), &config, |b, config| {
            b.iter(|| create(&scene, config).destroy());
        });
    }
    group.finish();
}

fn intersect(c: &mut Criterion) {
    let scene = Scene::from_triangles(random_triangles());
    let packets = camera_packets();
    let mut group = c.benchmark_group("intersect");
    group.throughput(Throughput::Elements((RESOLUTION_X * RESOLUTION_Y) as u64));

    for mode in [BuildMode::BinnedSAH, BuildMode::Morton, BuildMode::MortonEnhanced] {
        let accel = create(
            &scene,
            &AccelConfig {
                build_mode: mode,
                ..Default::default()
            },
        );
        group.bench_function(BenchmarkId::new("single", mode), |b| {
            b.iter(|| {
                for packet in &packets {
                    for ray in &packet.rays {
                        let mut ray = *ray;
                        accel.intersect(&mut ray);
                        black_box(ray.hit);
                    }
                }
            });
        });
    }

    for traversal in [TraversalMode::Hybrid, TraversalMode::Chunk, TraversalMode::Single] {
        let accel = create(
            &scene,
            &AccelConfig {
                traversal_mode: traversal,
                ..Default::default()
            },
        );
        group.bench_function(BenchmarkId::new("packet", traversal), |b| {
            b.iter(|| {
                for packet in &packets {
                    let mut packet = *packet;
                    accel.intersect_packet(&mut packet);
                    black_box(packet.rays[0].hit);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, build, intersect);
criterion_main!(benches);
