use crate::{
    allocate_storage, collect_prims, finish, BinnedSAHStrategy, BuildOutput, BuildSettings,
    Builder, GeometryType, PrimitiveSource, Result, TreeBuilder,
};

/// Binned SAH over user geometry, leaves hold references only
#[derive(Debug, Clone, Default)]
pub struct VirtualGeometryBuilder {
    settings: BuildSettings,
}

impl VirtualGeometryBuilder {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }
}

impl Builder for VirtualGeometryBuilder {
    fn name(&self) -> &'static str {
        "virtual-geometry"
    }

    fn build_storage(
        &self,
        source: &dyn PrimitiveSource,
        geometry_type: GeometryType,
    ) -> Result<BuildOutput> {
        let storage = allocate_storage(
            source.prim_count(),
            self.extra_capacity(source.prim_count()),
            geometry_type,
            &self.settings,
        )?;

        let mut prims = collect_prims(source);
        let before = prims.len();
        prims.retain(|p| p.bounds.is_valid() && p.bounds.is_finite());
        if prims.len() < before {
            tracing::warn!(
                dropped = before - prims.len(),
                "primitives with empty or non-finite bounds are not indexed"
            );
        }

        let strategy = BinnedSAHStrategy::new(self.settings.bins);
        let subtree = TreeBuilder::new(&strategy, &self.settings).build(&mut prims);

        finish(storage, subtree, source, geometry_type)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3A;

    use crate::*;

    /// Unit spheres on a line, one of them broken
    struct Spheres {
        centers: Vec<Vec3A>,
    }

    impl VirtualGeometry for Spheres {
        fn prim_count(&self) -> usize {
            self.centers.len()
        }

        fn prim_bounds(&self, prim_id: u32) -> AABB {
            let c = self.centers[prim_id as usize];
            AABB::new(c - Vec3A::ONE, c + Vec3A::ONE)
        }

        fn intersect(&self, _prim_id: u32, _ray: &Ray) -> Option<Intersection> {
            None
        }
    }

    #[test]
    fn invalid_bounds_are_dropped() {
        let mut centers: Vec<Vec3A> = (0..10).map(|i| Vec3A::new(i as f32 * 3.0, 0.0, 0.0)).collect();
        centers.push(Vec3A::new(f32::NAN, 0.0, 0.0));
        let mut scene = Scene::default();
        scene.add_virtual_geometry(Arc::new(Spheres { centers }));

        let mut bvh = Bvh4::new(GeometryType::VirtualGeometry);
        VirtualGeometryBuilder::new(BuildSettings::default())
            .build(&VirtualGeometrySource::new(scene.geometries()), &mut bvh)
            .unwrap();

        assert!(bvh.validate().is_ok());
        assert_eq!(bvh.leaf_prim_count(), 10);
        assert!(bvh.storage().triangles().is_empty());
        assert!(bvh.bounds().is_finite());
    }

    #[test]
    fn prim_refs_name_their_geometry() {
        let tri = Triangle::new(Vec3A::ZERO, Vec3A::X, Vec3A::Y);
        let mut scene = Scene::default();
        scene.add_virtual_geometry(Arc::new(vec![tri; 3]));
        scene.add_virtual_geometry(Arc::new(vec![tri; 5]));

        let mut bvh = Bvh4::new(GeometryType::VirtualGeometry);
        VirtualGeometryBuilder::new(BuildSettings::default())
            .build(&VirtualGeometrySource::new(scene.geometries()), &mut bvh)
            .unwrap();

        let mut prims = bvh.storage().prims().to_vec();
        prims.sort();
        let expected: Vec<PrimRef> = (0..3)
            .map(|i| PrimRef::new(0, i))
            .chain((0..5).map(|i| PrimRef::new(1, i)))
            .collect();
        assert_eq!(prims, expected);
    }
}
