use crate::{
    allocate_storage, collect_prims, finish, BinnedSAHStrategy, BuildOutput, BuildSettings,
    Builder, GeometryType, PrimitiveSource, Result, TreeBuilder,
};

/// Object split hierarchy driven by the binned surface area heuristic
#[derive(Debug, Clone, Default)]
pub struct BinnedSAHBuilder {
    settings: BuildSettings,
}

impl BinnedSAHBuilder {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }
}

impl Builder for BinnedSAHBuilder {
    fn name(&self) -> &'static str {
        "default"
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
        let strategy = BinnedSAHStrategy::new(self.settings.bins);
        let subtree = TreeBuilder::new(&strategy, &self.settings).build(&mut prims);

        finish(storage, subtree, source, geometry_type)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::*;

    fn build(triangles: &[Triangle], settings: BuildSettings) -> Bvh4 {
        let mut bvh = Bvh4::new(GeometryType::Triangle1);
        BinnedSAHBuilder::new(settings)
            .build(&TriangleSource::new(triangles), &mut bvh)
            .unwrap();
        bvh
    }

    #[test]
    fn single_triangle_costs_one() {
        let bvh = build(
            &[Triangle::new(Vec3A::ZERO, Vec3A::X, Vec3A::Y)],
            BuildSettings::default(),
        );
        assert!(bvh.root().is_leaf());
        approx::assert_abs_diff_eq!(bvh.sah(), 1.0);
    }

    #[test]
    fn empty_scene_has_empty_leaf_root() {
        let bvh = build(&[], BuildSettings::default());
        assert!(bvh.is_built());
        assert_eq!(bvh.root(), NodeRef::EMPTY_LEAF);
        assert!(bvh.bounds().is_empty());
        assert_eq!(bvh.sah(), 0.0);
    }

    #[test]
    fn three_triangles_leave_one_slot_empty() {
        let triangles: Vec<Triangle> = (0..3)
            .map(|i| {
                let o = Vec3A::new(i as f32 * 4.0, 0.0, 0.0);
                Triangle::new(o, o + Vec3A::X, o + Vec3A::Y)
            })
            .collect();
        let bvh = build(
            &triangles,
            BuildSettings {
                max_leaf_size: 1,
                ..Default::default()
            },
        );

        let root = bvh.node(bvh.root().as_inner().unwrap());
        assert_eq!(root.child_count(), 3);
        assert_eq!(root.valid_mask(), 0b0111);
        assert!(root.bounds(3).is_empty());
        assert!(bvh.validate().is_ok());
    }

    #[test]
    fn leaves_cover_every_triangle_once() {
        let triangles: Vec<Triangle> = (0..300).map(|_| rand::random()).collect();
        let bvh = build(&triangles, BuildSettings::default());

        assert_eq!(bvh.leaf_prim_count(), triangles.len());
        let mut seen: Vec<u32> = bvh.storage().prims().iter().map(|p| p.prim_id).collect();
        seen.sort_unstable();
        assert!(seen.iter().copied().eq(0..300));
        assert!(bvh.validate().is_ok());
        assert!(bvh.sah() >= 1.0);
    }

    #[test]
    fn packed_triangles_follow_leaf_order() {
        let triangles: Vec<Triangle> = (0..50).map(|_| rand::random()).collect();
        let bvh = build(&triangles, BuildSettings::default());

        for (prim, tri) in bvh
            .storage()
            .prims()
            .iter()
            .zip(bvh.storage().triangles())
        {
            assert_eq!(triangles[prim.prim_id as usize], *tri);
        }
    }

    #[test]
    fn memory_limit_fails_the_build() {
        let triangles: Vec<Triangle> = (0..50).map(|_| rand::random()).collect();
        let mut bvh = Bvh4::new(GeometryType::Triangle1);
        let result = BinnedSAHBuilder::new(BuildSettings {
            memory_limit: Some(16),
            ..Default::default()
        })
        .build(&TriangleSource::new(&triangles), &mut bvh);

        assert!(matches!(result, Err(Bvh4Error::Allocation { .. })));
        assert_eq!(bvh.state(), AccelState::Empty);
    }
}
