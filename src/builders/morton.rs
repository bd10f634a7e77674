use rayon::prelude::*;

use crate::{
    allocate_storage, centroid_bounds_of, collect_prims, finish, morton_code, BuildOutput,
    BuildSettings, Builder, GeometryType, MortonStrategy, PrimInfo, PrimitiveSource, Result,
    TreeBuilder,
};

/// Primitive records keyed by the Morton code of their centroid, sorted by (key, reference)
pub(crate) fn morton_sorted_prims(source: &dyn PrimitiveSource) -> Vec<PrimInfo> {
    let mut prims = collect_prims(source);
    let centroid_bounds = centroid_bounds_of(&prims);

    prims
        .par_iter_mut()
        .for_each(|p| p.code = morton_code(p.centroid, &centroid_bounds));
    prims.par_sort_unstable_by(|a, b| a.code.cmp(&b.code).then_with(|| a.prim.cmp(&b.prim)));

    prims
}

/// Linear hierarchy read off the Morton curve, no cost evaluation
#[derive(Debug, Clone, Default)]
pub struct MortonBuilder {
    settings: BuildSettings,
}

impl MortonBuilder {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }
}

impl Builder for MortonBuilder {
    fn name(&self) -> &'static str {
        "morton"
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

        let mut prims = morton_sorted_prims(source);
        let subtree = TreeBuilder::new(&MortonStrategy, &self.settings).build(&mut prims);

        finish(storage, subtree, source, geometry_type)
    }
}
