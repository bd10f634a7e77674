extern crate glam;
use glam::Vec3A;

use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{ray_triangle_intersect, Grow, Intersection, Ray, Triangle, AABB};

/// Geometry id used by the triangles of a scene
pub const TRIANGLE_GEOMETRY_ID: u32 = 0;

/// Opaque reference to a primitive, stored in the leaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimRef {
    pub geom_id: u32,
    pub prim_id: u32,
}

impl PrimRef {
    #[inline]
    pub const fn new(geom_id: u32, prim_id: u32) -> Self {
        Self { geom_id, prim_id }
    }
}

/// Anything with bounds that can resolve a ray intersection
pub trait Primitive {
    fn bounds(&self) -> AABB;

    fn centroid(&self) -> Vec3A {
        self.bounds().center()
    }

    fn intersect(&self, ray: &Ray) -> Option<Intersection>;
}

impl Primitive for Triangle {
    #[inline]
    fn bounds(&self) -> AABB {
        let mut aabb = AABB::default();

        aabb.grow(self);

        aabb
    }

    #[inline]
    fn centroid(&self) -> Vec3A {
        self.centroid
    }

    #[inline]
    fn intersect(&self, ray: &Ray) -> Option<Intersection> {
        ray_triangle_intersect(self, ray)
    }
}

/// User supplied geometry made of `prim_count` opaque primitives
pub trait VirtualGeometry: Send + Sync {
    fn prim_count(&self) -> usize;

    fn prim_bounds(&self, prim_id: u32) -> AABB;

    /// Intersection callback, the range check is done by the caller
    fn intersect(&self, prim_id: u32, ray: &Ray) -> Option<Intersection>;
}

impl<P> VirtualGeometry for Vec<P>
where
    P: Primitive + Send + Sync,
{
    fn prim_count(&self) -> usize {
        self.len()
    }

    fn prim_bounds(&self, prim_id: u32) -> AABB {
        self[prim_id as usize].bounds()
    }

    fn intersect(&self, prim_id: u32, ray: &Ray) -> Option<Intersection> {
        Primitive::intersect(&self[prim_id as usize], ray)
    }
}

/// Scene geometry shared with the accelerators built over it
#[derive(Clone, Default)]
pub struct Scene {
    triangles: Arc<RwLock<Vec<Triangle>>>,
    geometries: Vec<Arc<dyn VirtualGeometry>>,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("triangles", &self.triangles.read().len())
            .field("geometries", &self.geometries.len())
            .finish()
    }
}

impl Scene {
    pub fn from_triangles(triangles: Vec<Triangle>) -> Self {
        Self::with_shared_triangles(Arc::new(RwLock::new(triangles)))
    }

    pub fn with_shared_triangles(triangles: Arc<RwLock<Vec<Triangle>>>) -> Self {
        Self {
            triangles,
            geometries: Vec::new(),
        }
    }

    /// Register user geometry, returns its geometry id
    pub fn add_virtual_geometry(&mut self, geometry: Arc<dyn VirtualGeometry>) -> u32 {
        self.geometries.push(geometry);
        (self.geometries.len() - 1) as u32
    }

    pub fn triangles(&self) -> &Arc<RwLock<Vec<Triangle>>> {
        &self.triangles
    }

    pub fn geometries(&self) -> &[Arc<dyn VirtualGeometry>] {
        &self.geometries
    }

    #[inline]
    pub fn geometry(&self, geom_id: u32) -> Option<&dyn VirtualGeometry> {
        self.geometries.get(geom_id as usize).map(|g| g.as_ref())
    }
}

/// Primitives handed to a builder: bounds and an opaque reference for each
pub trait PrimitiveSource: Sync {
    fn prim_count(&self) -> usize;

    fn prim(&self, index: usize) -> (PrimRef, AABB);

    /// Bounds of the part of a primitive inside `clip`
    fn clipped_bounds(&self, index: usize, clip: &AABB) -> AABB {
        self.prim(index).1.intersection(clip)
    }

    /// Triangle data to pack into the leaves, if the source has any
    fn triangle(&self, _prim: PrimRef) -> Option<Triangle> {
        None
    }
}

/// Triangle soup, primitive ids are the triangle indices
pub struct TriangleSource<'a> {
    triangles: &'a [Triangle],
}

impl<'a> TriangleSource<'a> {
    pub fn new(triangles: &'a [Triangle]) -> Self {
        Self { triangles }
    }
}

impl PrimitiveSource for TriangleSource<'_> {
    #[inline]
    fn prim_count(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    fn prim(&self, index: usize) -> (PrimRef, AABB) {
        let tri = &self.triangles[index];
        (
            PrimRef::new(TRIANGLE_GEOMETRY_ID, index as u32),
            Primitive::bounds(tri),
        )
    }

    fn clipped_bounds(&self, index: usize, clip: &AABB) -> AABB {
        self.triangles[index].clipped_bounds(clip)
    }

    fn triangle(&self, prim: PrimRef) -> Option<Triangle> {
        self.triangles.get(prim.prim_id as usize).copied()
    }
}

/// All primitives of a list of user geometries, flattened
pub struct VirtualGeometrySource<'a> {
    geometries: &'a [Arc<dyn VirtualGeometry>],
    /// First flattened index of every geometry
    starts: Vec<usize>,
    total: usize,
}

impl<'a> VirtualGeometrySource<'a> {
    pub fn new(geometries: &'a [Arc<dyn VirtualGeometry>]) -> Self {
        let mut starts = Vec::with_capacity(geometries.len());
        let mut total = 0;
        for geometry in geometries {
            starts.push(total);
            total += geometry.prim_count();
        }
        Self {
            geometries,
            starts,
            total,
        }
    }
}

impl PrimitiveSource for VirtualGeometrySource<'_> {
    #[inline]
    fn prim_count(&self) -> usize {
        self.total
    }

    fn prim(&self, index: usize) -> (PrimRef, AABB) {
        let geom_id = self.starts.partition_point(|&start| start <= index) - 1;
        let prim_id = (index - self.starts[geom_id]) as u32;
        (
            PrimRef::new(geom_id as u32, prim_id),
            self.geometries[geom_id].prim_bounds(prim_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3A;

    use crate::*;

    #[test]
    fn virtual_source_flattens_geometries() {
        let tri = Triangle::new(Vec3A::ZERO, Vec3A::X, Vec3A::Y);
        let mut scene = Scene::default();
        scene.add_virtual_geometry(Arc::new(vec![tri; 2]));
        scene.add_virtual_geometry(Arc::new(Vec::<Triangle>::new()));
        scene.add_virtual_geometry(Arc::new(vec![tri; 3]));

        let source = VirtualGeometrySource::new(scene.geometries());
        assert_eq!(source.prim_count(), 5);
        assert_eq!(source.prim(0).0, PrimRef::new(0, 0));
        assert_eq!(source.prim(1).0, PrimRef::new(0, 1));
        assert_eq!(source.prim(2).0, PrimRef::new(2, 0));
        assert_eq!(source.prim(4).0, PrimRef::new(2, 2));
    }

    #[test]
    fn triangle_source_packs_triangles() {
        let tris = vec![Triangle::new(Vec3A::ZERO, Vec3A::X, Vec3A::Y)];
        let source = TriangleSource::new(&tris);
        let (prim, bounds) = source.prim(0);
        assert_eq!(source.triangle(prim), Some(tris[0]));
        assert_eq!(bounds, AABB::new(Vec3A::ZERO, Vec3A::new(1.0, 1.0, 0.0)));
    }
}
