use glam::Vec3A;

use crate::Axis;

/// Axis aligned bounding box. `AABB::EMPTY` (min = +inf, max = -inf) is the empty box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    pub min: Vec3A,
    pub max: Vec3A,
}

impl Default for AABB {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Objects that can enlarge a box to contain themselves
pub trait Grow<T> {
    fn grow(&mut self, value: T);
}

impl Grow<Vec3A> for AABB {
    /// Grow the box to contain a new point
    #[inline]
    fn grow(&mut self, point: Vec3A) {
        self.max = self.max.max(point);
        self.min = self.min.min(point);
    }
}

impl Grow<&AABB> for AABB {
    /// Grow the box to contain another box
    #[inline]
    fn grow(&mut self, other: &AABB) {
        self.max = self.max.max(other.max);
        self.min = self.min.min(other.min);
    }
}

impl AABB {
    pub const EMPTY: Self = Self {
        min: Vec3A::INFINITY,
        max: Vec3A::NEG_INFINITY,
    };

    #[inline]
    pub fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all the points
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Vec3A>,
    {
        let mut aabb = Self::EMPTY;
        for p in points {
            aabb.grow(p);
        }
        aabb
    }

    /// If the AABB is valid (min <= max)
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.is_valid()
    }

    /// Both corners are finite numbers
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    #[inline]
    pub fn union(&self, other: &AABB) -> AABB {
        let mut aabb = *self;
        aabb.grow(other);
        aabb
    }

    /// Overlap of both boxes, `EMPTY` if they are disjoint
    #[inline]
    pub fn intersection(&self, other: &AABB) -> AABB {
        let aabb = AABB {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        };
        if aabb.is_valid() {
            aabb
        } else {
            AABB::EMPTY
        }
    }

    pub fn extent(&self) -> Vec3A {
        if self.is_empty() {
            return Vec3A::ZERO;
        }
        self.max - self.min
    }

    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// Surface area, zero for the empty box
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.max - self.min;
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    pub fn largest_axis(&self) -> Axis {
        Axis::largest(self.extent())
    }

    #[inline]
    pub fn contains(&self, other: &AABB) -> bool {
        other.is_empty() || (self.min.cmple(other.min).all() && other.max.cmple(self.max).all())
    }
}
