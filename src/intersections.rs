use glam::Vec3A;

use crate::{Primitive, PrimRef, Ray, Triangle, AABB};

/// Epsilon used for ray intersections
pub const RAY_INTERSECT_EPSILON: f32 = 0.0001;

/// Candidate hit reported by a primitive, not yet checked against the ray range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub distance: f32,
    pub u: f32,
    pub v: f32,
}

impl Intersection {
    #[inline]
    pub fn new(distance: f32, u: f32, v: f32) -> Self {
        Self { distance, u, v }
    }
}

/// Objects capable of being intersected by a ray in place
pub trait InPlaceRayIntersect {
    /// Intersect and store the result in the ray if it is the nearest so far
    fn inplace_ray_intersect(&self, ray: &mut Ray, prim: PrimRef) -> bool;
}

impl<P> InPlaceRayIntersect for P
where
    P: Primitive + ?Sized,
{
    #[inline]
    fn inplace_ray_intersect(&self, ray: &mut Ray, prim: PrimRef) -> bool {
        match self.intersect(ray) {
            Some(isect) => ray.commit(isect, prim),
            None => false,
        }
    }
}

/// Intersect a triangle with a ray (Moller-Trumbore)
pub fn ray_triangle_intersect(tri: &Triangle, ray: &Ray) -> Option<Intersection> {
    let edge1 = tri.vertex1 - tri.vertex0;
    let edge2 = tri.vertex2 - tri.vertex0;
    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);
    if a > -RAY_INTERSECT_EPSILON && a < RAY_INTERSECT_EPSILON {
        // ray parallel to triangle
        return None;
    }
    let f = 1.0 / a;
    let s = ray.origin - tri.vertex0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = f * edge2.dot(q);
    if t > RAY_INTERSECT_EPSILON {
        Some(Intersection::new(t, u, v))
    } else {
        None
    }
}

/// Reciprocal that never produces infinities, keeps slab tests free of NaNs
#[inline]
pub fn safe_reciprocal(v: Vec3A) -> Vec3A {
    const MIN_COMPONENT: f32 = 1e-18;
    let clamp = |x: f32| {
        if x.abs() < MIN_COMPONENT {
            MIN_COMPONENT.copysign(x)
        } else {
            x
        }
    };
    Vec3A::new(clamp(v.x), clamp(v.y), clamp(v.z)).recip()
}

/// Boxes that report the entry distance of a ray
pub trait RayIntersect {
    /// Entry distance, infinity on a miss
    fn ray_intersect(&self, ray: &Ray) -> f32;
}

/// Boxes that answer if a ray hits them
pub trait FastRayIntersect {
    fn fast_ray_intersect(&self, ray: &Ray) -> bool;
}

impl RayIntersect for AABB {
    #[inline]
    fn ray_intersect(&self, ray: &Ray) -> f32 {
        let inv_dir = safe_reciprocal(ray.direction);
        let t1 = (self.min - ray.origin) * inv_dir;
        let t2 = (self.max - ray.origin) * inv_dir;
        let tnear = t1.min(t2).max_element().max(ray.near);
        let tfar = t1.max(t2).min_element().min(ray.distance);
        if self.is_valid() && tnear <= tfar {
            tnear
        } else {
            f32::INFINITY
        }
    }
}

impl FastRayIntersect for AABB {
    #[inline]
    fn fast_ray_intersect(&self, ray: &Ray) -> bool {
        self.ray_intersect(ray).is_finite()
    }
}
