use smallvec::{smallvec, SmallVec};

use crate::{
    assert_built, Bvh4, ChildHits, InnerNode, LeafIntersector, NodeIntersector, NodeRef, Ray,
    Scene, TraversalRay, BRANCHING_FACTOR,
};

type TraversalStack = SmallVec<[(NodeRef, f32); 64]>;

/// Push hit children so the nearest one is popped first
#[inline]
fn push_children(stack: &mut TraversalStack, node: &InnerNode, hits: &ChildHits) {
    let mut order: SmallVec<[(NodeRef, f32); BRANCHING_FACTOR]> = SmallVec::new();
    for slot in 0..BRANCHING_FACTOR {
        if let (true, Some(child)) = (hits.is_hit(slot), node.child(slot)) {
            order.push((child, hits.distances[slot]));
        }
    }
    order.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));
    stack.extend(order);
}

/// Nearest hit below `start`, updates `ray` in place
pub(crate) fn traverse_from<N, L>(bvh: &Bvh4, scene: &Scene, start: NodeRef, ray: &mut Ray)
where
    N: NodeIntersector,
    L: LeafIntersector,
{
    let mut tray = TraversalRay::new(ray);
    let mut stack: TraversalStack = smallvec![(start, ray.near)];

    while let Some((node, entry)) = stack.pop() {
        if entry > ray.distance {
            continue;
        }
        match node {
            NodeRef::Leaf { first, count } => {
                if L::intersect(bvh, scene, first, count, ray) {
                    tray.far = ray.distance;
                }
            }
            NodeRef::Inner(index) => {
                let inner = bvh.node(index);
                let hits = N::intersect(inner, &tray);
                push_children(&mut stack, inner, &hits);
            }
        }
    }
}

/// Single ray nearest hit query
pub fn intersect1<N, L>(bvh: &Bvh4, scene: &Scene, ray: &mut Ray)
where
    N: NodeIntersector,
    L: LeafIntersector,
{
    assert_built(bvh);
    traverse_from::<N, L>(bvh, scene, bvh.root(), ray);
}

/// Single ray any hit query, stops at the first primitive in range
pub fn occluded1<N, L>(bvh: &Bvh4, scene: &Scene, ray: &Ray) -> bool
where
    N: NodeIntersector,
    L: LeafIntersector,
{
    assert_built(bvh);
    let tray = TraversalRay::new(ray);
    let mut stack: SmallVec<[NodeRef; 64]> = smallvec![bvh.root()];

    while let Some(node) = stack.pop() {
        match node {
            NodeRef::Leaf { first, count } => {
                if L::occluded(bvh, scene, first, count, ray) {
                    return true;
                }
            }
            NodeRef::Inner(index) => {
                let inner = bvh.node(index);
                let hits = N::intersect(inner, &tray);
                stack.extend(
                    (0..BRANCHING_FACTOR)
                        .filter(|&slot| hits.is_hit(slot))
                        .filter_map(|slot| inner.child(slot)),
                );
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::*;

    fn built(triangles: &[Triangle]) -> Bvh4 {
        let mut bvh = Bvh4::new(GeometryType::Triangle1);
        BinnedSAHBuilder::new(BuildSettings {
            max_leaf_size: 1,
            ..Default::default()
        })
        .build(&TriangleSource::new(triangles), &mut bvh)
        .unwrap();
        bvh
    }

    fn wall(z: f32) -> Triangle {
        Triangle::new(
            Vec3A::new(-1.0, -1.0, z),
            Vec3A::new(3.0, -1.0, z),
            Vec3A::new(-1.0, 3.0, z),
        )
    }

    #[test]
    fn nearest_of_stacked_triangles() {
        let triangles = vec![wall(5.0), wall(2.0), wall(8.0)];
        let bvh = built(&triangles);
        let scene = Scene::default();

        let mut ray = Ray::infinite_ray(Vec3A::ZERO, Vec3A::Z);
        intersect1::<Simd4Nodes, Triangle1Leaves>(&bvh, &scene, &mut ray);

        approx::assert_abs_diff_eq!(ray.distance, 2.0, epsilon = 1e-5);
        assert_eq!(ray.hit.map(|h| h.prim), Some(PrimRef::new(0, 1)));
        assert!(!occluded1::<ScalarNodes, Triangle1Leaves>(&bvh, &scene, &ray));
    }

    #[test]
    fn occlusion_respects_the_segment() {
        let triangles = vec![wall(5.0)];
        let bvh = built(&triangles);
        let scene = Scene::default();

        let short = Ray::new(Vec3A::ZERO, Vec3A::Z, 4.0);
        let long = Ray::new(Vec3A::ZERO, Vec3A::Z, 6.0);
        assert!(!occluded1::<Simd4Nodes, Triangle1Leaves>(&bvh, &scene, &short));
        assert!(occluded1::<Simd4Nodes, Triangle1Leaves>(&bvh, &scene, &long));
    }

    #[test]
    fn empty_scene_misses() {
        let bvh = built(&[]);
        let mut ray = Ray::infinite_ray(Vec3A::ZERO, Vec3A::Z);
        intersect1::<ScalarNodes, Triangle1Leaves>(&bvh, &Scene::default(), &mut ray);
        assert!(ray.hit.is_none());
        assert_eq!(ray.distance, f32::INFINITY);
    }

    #[test]
    #[should_panic(expected = "built accelerator")]
    fn unbuilt_accelerator_panics() {
        let bvh = Bvh4::new(GeometryType::Triangle1);
        let mut ray = Ray::infinite_ray(Vec3A::ZERO, Vec3A::Z);
        intersect1::<ScalarNodes, Triangle1Leaves>(&bvh, &Scene::default(), &mut ray);
    }
}
