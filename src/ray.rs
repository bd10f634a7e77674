use bitvec::prelude::*;

use crate::{Intersection, PrimRef};

/// Number of rays in a packet
pub const PACKET_WIDTH: usize = 16;

/// One bit per packet lane
pub type LaneMask = BitArr!(for PACKET_WIDTH, in u16, Lsb0);

/// Nearest hit found so far
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub prim: PrimRef,
    /// Barycentric (or user defined) hit coordinates
    pub u: f32,
    pub v: f32,
}

/// Ray object. Might be a proper ray (distance = infinity) or a line segment (distance is finite).
/// Queries shrink `distance` to the nearest hit and record it in `hit`.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: glam::Vec3A,
    pub direction: glam::Vec3A,
    pub near: f32,
    pub distance: f32,
    pub hit: Option<Hit>,
}

impl Default for Ray {
    fn default() -> Self {
        Self {
            origin: Default::default(),
            direction: glam::Vec3A::new(1.0, 0.0, 0.0),
            near: 0.0,
            distance: 1.0,
            hit: None,
        }
    }
}

impl Ray {
    #[inline]
    pub fn new(origin: glam::Vec3A, direction: glam::Vec3A, distance: f32) -> Self {
        Self {
            origin,
            direction,
            near: 0.0,
            distance,
            hit: None,
        }
    }

    /// Create a ray with infinite length (a proper ray)
    #[inline]
    pub fn infinite_ray(origin: glam::Vec3A, direction: glam::Vec3A) -> Self {
        Self::new(origin, direction, f32::INFINITY)
    }

    /// Ray restricted to the `[near, far]` range
    #[inline]
    pub fn segment(origin: glam::Vec3A, direction: glam::Vec3A, near: f32, far: f32) -> Self {
        Self {
            near,
            ..Self::new(origin, direction, far)
        }
    }

    #[inline]
    pub fn direction(&self) -> glam::Vec3A {
        self.direction
    }

    #[inline]
    pub fn point_at(&self, t: f32) -> glam::Vec3A {
        self.origin + self.direction * t
    }

    /// Record an intersection if it is closer than the current one.
    /// Equal distances keep the lower primitive reference so the result
    /// does not depend on the order primitives are visited.
    #[inline]
    pub fn commit(&mut self, isect: Intersection, prim: PrimRef) -> bool {
        let closer = isect.distance < self.distance
            || matches!(self.hit, Some(hit) if isect.distance == self.distance && prim < hit.prim);
        if isect.distance <= self.near || !closer {
            return false;
        }

        self.distance = isect.distance;
        self.hit = Some(Hit {
            prim,
            u: isect.u,
            v: isect.v,
        });
        true
    }

    /// If an intersection lies inside the valid range of the ray
    #[inline]
    pub fn in_range(&self, isect: &Intersection) -> bool {
        isect.distance > self.near && isect.distance < self.distance
    }
}

/// Fixed width batch of rays, only lanes set in `valid` are traced
#[derive(Debug, Clone, Copy)]
pub struct RayPacket {
    pub rays: [Ray; PACKET_WIDTH],
    pub valid: LaneMask,
}

impl Default for RayPacket {
    fn default() -> Self {
        Self {
            rays: [Ray::default(); PACKET_WIDTH],
            valid: LaneMask::ZERO,
        }
    }
}

impl RayPacket {
    /// Fill lanes in order, at most `PACKET_WIDTH` rays are taken
    pub fn from_rays<I>(rays: I) -> Self
    where
        I: IntoIterator<Item = Ray>,
    {
        let mut packet = Self::default();
        for (lane, ray) in rays.into_iter().take(PACKET_WIDTH).enumerate() {
            packet.set(lane, ray);
        }
        packet
    }

    /// Place a ray in a lane and mark it active
    #[inline]
    pub fn set(&mut self, lane: usize, ray: Ray) {
        self.rays[lane] = ray;
        self.valid.set(lane, true);
    }

    #[inline]
    pub fn is_active(&self, lane: usize) -> bool {
        self.valid[lane]
    }

    /// Hit of a lane, `None` for inactive lanes or misses
    #[inline]
    pub fn hit(&self, lane: usize) -> Option<Hit> {
        if self.is_active(lane) {
            self.rays[lane].hit
        } else {
            None
        }
    }
}
