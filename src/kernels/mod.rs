extern crate glam;
use glam::{Vec3A, Vec4};

use crate::{
    ray_triangle_intersect, safe_reciprocal, Bvh4, InPlaceRayIntersect, InnerNode, Ray, Scene,
    BRANCHING_FACTOR,
};

pub mod single;
pub use single::*;

pub mod packet;
pub use packet::*;

/// Ray with the reciprocal direction cached for slab tests
#[derive(Debug, Clone, Copy)]
pub struct TraversalRay {
    pub origin: Vec3A,
    pub inv_direction: Vec3A,
    pub near: f32,
    pub far: f32,
}

impl TraversalRay {
    #[inline]
    pub fn new(ray: &Ray) -> Self {
        Self {
            origin: ray.origin,
            inv_direction: safe_reciprocal(ray.direction),
            near: ray.near,
            far: ray.distance,
        }
    }
}

/// Children of a node hit by a ray and their entry distances
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildHits {
    /// Bit `i` is set when slot `i` was hit
    pub mask: u32,
    pub distances: [f32; BRANCHING_FACTOR],
}

impl ChildHits {
    pub const NONE: Self = Self {
        mask: 0,
        distances: [f32::INFINITY; BRANCHING_FACTOR],
    };

    #[inline]
    pub fn is_hit(&self, slot: usize) -> bool {
        self.mask & 1 << slot != 0
    }
}

/// Ray versus the four child boxes of a node. Empty slots are never reported.
pub trait NodeIntersector {
    fn intersect(node: &InnerNode, ray: &TraversalRay) -> ChildHits;
}

/// One child box at a time
pub struct ScalarNodes;

impl NodeIntersector for ScalarNodes {
    #[inline]
    fn intersect(node: &InnerNode, ray: &TraversalRay) -> ChildHits {
        let mut hits = ChildHits::NONE;
        for slot in 0..BRANCHING_FACTOR {
            if node.is_slot_empty(slot) {
                continue;
            }
            let lower = Vec3A::new(node.lower_x[slot], node.lower_y[slot], node.lower_z[slot]);
            let upper = Vec3A::new(node.upper_x[slot], node.upper_y[slot], node.upper_z[slot]);

            let t1 = (lower - ray.origin) * ray.inv_direction;
            let t2 = (upper - ray.origin) * ray.inv_direction;
            let tnear = t1.min(t2).max_element().max(ray.near);
            let tfar = t1.max(t2).min_element().min(ray.far);
            if tnear <= tfar {
                hits.mask |= 1 << slot;
                hits.distances[slot] = tnear;
            }
        }
        hits
    }
}

/// All four child boxes at once, near and far planes picked by the direction signs
pub struct Simd4Nodes;

impl NodeIntersector for Simd4Nodes {
    #[inline]
    fn intersect(node: &InnerNode, ray: &TraversalRay) -> ChildHits {
        let slab = |lower: Vec4, upper: Vec4, origin: f32, inv: f32| {
            let (near, far) = if inv >= 0.0 {
                (lower, upper)
            } else {
                (upper, lower)
            };
            let origin = Vec4::splat(origin);
            let inv = Vec4::splat(inv);
            ((near - origin) * inv, (far - origin) * inv)
        };

        let (near_x, far_x) = slab(node.lower_x, node.upper_x, ray.origin.x, ray.inv_direction.x);
        let (near_y, far_y) = slab(node.lower_y, node.upper_y, ray.origin.y, ray.inv_direction.y);
        let (near_z, far_z) = slab(node.lower_z, node.upper_z, ray.origin.z, ray.inv_direction.z);

        let tnear = near_x.max(near_y).max(near_z).max(Vec4::splat(ray.near));
        let tfar = far_x.min(far_y).min(far_z).min(Vec4::splat(ray.far));

        ChildHits {
            mask: tnear.cmple(tfar).bitmask() & node.valid_mask(),
            distances: tnear.to_array(),
        }
    }
}

/// Primitive tests for the leaves of one geometry type
pub trait LeafIntersector {
    /// Nearest hit in the leaf, true if the ray was updated
    fn intersect(bvh: &Bvh4, scene: &Scene, first: u32, count: u32, ray: &mut Ray) -> bool;

    /// Any hit in the leaf inside the ray range
    fn occluded(bvh: &Bvh4, scene: &Scene, first: u32, count: u32, ray: &Ray) -> bool;
}

/// Leaves with packed triangles
pub struct Triangle1Leaves;

impl LeafIntersector for Triangle1Leaves {
    #[inline]
    fn intersect(bvh: &Bvh4, _scene: &Scene, first: u32, count: u32, ray: &mut Ray) -> bool {
        let mut hit = false;
        for (prim, tri) in bvh
            .leaf_prims(first, count)
            .iter()
            .zip(bvh.leaf_triangles(first, count))
        {
            hit |= tri.inplace_ray_intersect(ray, *prim);
        }
        hit
    }

    #[inline]
    fn occluded(bvh: &Bvh4, _scene: &Scene, first: u32, count: u32, ray: &Ray) -> bool {
        bvh.leaf_triangles(first, count).iter().any(|tri| {
            ray_triangle_intersect(tri, ray).is_some_and(|isect| ray.in_range(&isect))
        })
    }
}

/// Leaves resolved through the user geometry callbacks
pub struct VirtualGeometryLeaves;

impl LeafIntersector for VirtualGeometryLeaves {
    fn intersect(bvh: &Bvh4, scene: &Scene, first: u32, count: u32, ray: &mut Ray) -> bool {
        let mut hit = false;
        for prim in bvh.leaf_prims(first, count) {
            let Some(geometry) = scene.geometry(prim.geom_id) else {
                panic!("{prim:?} refers to a geometry missing from the scene");
            };
            if let Some(isect) = geometry.intersect(prim.prim_id, ray) {
                hit |= ray.commit(isect, *prim);
            }
        }
        hit
    }

    fn occluded(bvh: &Bvh4, scene: &Scene, first: u32, count: u32, ray: &Ray) -> bool {
        bvh.leaf_prims(first, count).iter().any(|prim| {
            let Some(geometry) = scene.geometry(prim.geom_id) else {
                panic!("{prim:?} refers to a geometry missing from the scene");
            };
            geometry
                .intersect(prim.prim_id, ray)
                .is_some_and(|isect| ray.in_range(&isect))
        })
    }
}

#[inline]
pub(crate) fn assert_built(bvh: &Bvh4) {
    assert!(bvh.is_built(), "Queries need a built accelerator");
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;
    use rand::{thread_rng, Rng};

    use super::*;
    use crate::*;

    fn node_with(boxes: &[AABB]) -> InnerNode {
        let mut node = InnerNode::EMPTY;
        for (slot, aabb) in boxes.iter().enumerate() {
            node.set_child(slot, aabb, NodeRef::Inner(slot as u32));
        }
        node
    }

    #[test]
    fn empty_slots_are_never_hit() {
        let node = node_with(&[AABB::new(Vec3A::splat(-1.0), Vec3A::ONE)]);
        for direction in [Vec3A::X, -Vec3A::X, Vec3A::new(1.0, -1.0, 0.5)] {
            let ray = TraversalRay::new(&Ray::infinite_ray(Vec3A::ZERO, direction));
            assert_eq!(ScalarNodes::intersect(&node, &ray).mask, 1);
            assert_eq!(Simd4Nodes::intersect(&node, &ray).mask, 1);
        }
    }

    #[test]
    fn scalar_and_simd_agree() {
        let mut rng = thread_rng();
        for _ in 0..200 {
            let boxes: Vec<AABB> = (0..rng.gen_range(1..=4))
                .map(|_| {
                    let a: Vec3A = rng.gen::<Vec3A>() * 4.0 - Vec3A::splat(2.0);
                    let b: Vec3A = rng.gen::<Vec3A>() * 4.0 - Vec3A::splat(2.0);
                    AABB::new(a.min(b), a.max(b))
                })
                .collect();
            let node = node_with(&boxes);
            let origin: Vec3A = rng.gen::<Vec3A>() * 8.0 - Vec3A::splat(4.0);
            let direction = (rng.gen::<Vec3A>() - Vec3A::splat(0.5)).normalize_or_zero();
            let ray = TraversalRay::new(&Ray::infinite_ray(origin, direction));

            let scalar = ScalarNodes::intersect(&node, &ray);
            let simd = Simd4Nodes::intersect(&node, &ray);
            assert_eq!(scalar.mask, simd.mask);
            for slot in 0..BRANCHING_FACTOR {
                if scalar.is_hit(slot) {
                    approx::assert_relative_eq!(
                        scalar.distances[slot],
                        simd.distances[slot],
                        max_relative = 1e-5
                    );
                }
            }
        }
    }

    #[test]
    fn axis_parallel_ray_on_a_face() {
        let node = node_with(&[AABB::new(Vec3A::ZERO, Vec3A::ONE)]);
        let ray = TraversalRay::new(&Ray::infinite_ray(Vec3A::new(-1.0, 0.0, 0.5), Vec3A::X));
        assert_eq!(Simd4Nodes::intersect(&node, &ray).mask, 1);
        assert_eq!(ScalarNodes::intersect(&node, &ray).mask, 1);
    }
}
