use crate::{
    allocate_storage, finish, morton_sorted_prims, BuildOutput, BuildSettings, Builder,
    GeometryType, MortonStrategy, PrimitiveSource, Result, TreeBuilder,
};

/// Morton hierarchy whose small subtrees are rebuilt with binned SAH when that is cheaper
#[derive(Debug, Clone, Default)]
pub struct MortonEnhancedBuilder {
    settings: BuildSettings,
}

impl MortonEnhancedBuilder {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }
}

impl Builder for MortonEnhancedBuilder {
    fn name(&self) -> &'static str {
        "morton-enhanced"
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
        let subtree = TreeBuilder::new(&MortonStrategy, &self.settings)
            .refine_below(self.settings.morton_reopt_size)
            .build(&mut prims);

        finish(storage, subtree, source, geometry_type)
    }
}
