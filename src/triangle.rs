extern crate glam;

use rand::{
    distributions::{Distribution, Standard},
    Rng,
};
use smallvec::{smallvec, SmallVec};
use strum::IntoEnumIterator;

use crate::{Axis, Grow, AABB};

/// Polygon produced while clipping a triangle against a box (3 + 6 planes)
type ClipPolygon = SmallVec<[glam::Vec3A; 9]>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub vertex0: glam::Vec3A,
    pub vertex1: glam::Vec3A,
    pub vertex2: glam::Vec3A,
    pub centroid: glam::Vec3A,
}

impl Triangle {
    /// Zeroed Triangle
    pub const ZERO: Self = Triangle {
        vertex0: glam::Vec3A::ZERO,
        vertex1: glam::Vec3A::ZERO,
        vertex2: glam::Vec3A::ZERO,
        centroid: glam::Vec3A::ZERO,
    };

    #[inline]
    pub fn new(vertex0: glam::Vec3A, vertex1: glam::Vec3A, vertex2: glam::Vec3A) -> Triangle {
        let mut tri = Triangle {
            vertex0,
            vertex1,
            vertex2,
            centroid: glam::Vec3A::ZERO,
        };
        tri.compute_centroid();
        tri
    }

    #[inline]
    pub fn compute_centroid(&mut self) {
        self.centroid = (self.vertex0 + self.vertex1 + self.vertex2) / 3.0;
    }

    #[inline]
    pub fn vertices(&self) -> [glam::Vec3A; 3] {
        [self.vertex0, self.vertex1, self.vertex2]
    }

    /// Bounds of the part of the triangle inside `clip`
    pub fn clipped_bounds(&self, clip: &AABB) -> AABB {
        let mut poly: ClipPolygon = smallvec![self.vertex0, self.vertex1, self.vertex2];
        for axis in Axis::iter() {
            poly = clip_polygon(&poly, axis, clip.min[axis], true);
            poly = clip_polygon(&poly, axis, clip.max[axis], false);
            if poly.is_empty() {
                return AABB::EMPTY;
            }
        }

        AABB::from_points(poly).intersection(clip)
    }
}

/// Sutherland-Hodgman step against one axis aligned plane
fn clip_polygon(poly: &[glam::Vec3A], axis: Axis, plane: f32, keep_above: bool) -> ClipPolygon {
    let inside = |p: glam::Vec3A| {
        if keep_above {
            p[axis] >= plane
        } else {
            p[axis] <= plane
        }
    };

    let mut out = ClipPolygon::new();
    for (i, &current) in poly.iter().enumerate() {
        let next = poly[(i + 1) % poly.len()];
        let current_inside = inside(current);
        if current_inside {
            out.push(current);
        }
        if current_inside != inside(next) {
            let t = (plane - current[axis]) / (next[axis] - current[axis]);
            let mut p = current + (next - current) * t;
            p[axis] = plane;
            out.push(p);
        }
    }
    out
}

impl Grow<&Triangle> for AABB {
    #[inline]
    fn grow(&mut self, tri: &Triangle) {
        self.grow(tri.vertex0);
        self.grow(tri.vertex1);
        self.grow(tri.vertex2);
    }
}

impl Default for Triangle {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Distribution<Triangle> for Standard {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Triangle {
        Triangle::new(rng.gen(), rng.gen(), rng.gen())
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    use glam::Vec3A;
    use rand::{thread_rng, Rng};

    use approx::*;

    #[test]
    fn compute_centroid() {
        let mut rng = thread_rng();
        let tri: Triangle = rng.gen();
        assert_relative_eq!(
            tri.centroid,
            (tri.vertex0 + tri.vertex1 + tri.vertex2) / 3.0
        );
    }

    #[test]
    fn clipped_bounds_are_tighter_than_box_overlap() {
        let tri = Triangle::new(
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(4.0, 0.0, 0.0),
            Vec3A::new(0.0, 4.0, 0.0),
        );
        let clip = AABB::new(Vec3A::new(3.0, -1.0, -1.0), Vec3A::new(5.0, 5.0, 1.0));

        let bounds = tri.clipped_bounds(&clip);

        assert_relative_eq!(bounds.min, Vec3A::new(3.0, 0.0, 0.0));
        assert_relative_eq!(bounds.max, Vec3A::new(4.0, 1.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn clipped_bounds_outside_is_empty() {
        let tri = Triangle::new(
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(1.0, 0.0, 0.0),
            Vec3A::new(0.0, 1.0, 0.0),
        );
        let clip = AABB::new(Vec3A::splat(0.8), Vec3A::splat(2.0));
        assert!(tri.clipped_bounds(&clip).is_empty());
    }
}
