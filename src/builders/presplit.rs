use smallvec::{smallvec, SmallVec};

use crate::{
    allocate_storage, bounds_of, collect_prims, finish, Axis, BinnedSAHStrategy, BuildOutput,
    BuildSettings, Builder, GeometryType, PrimInfo, PrimitiveSource, Result, TreeBuilder, AABB,
};

/// Log2 of the cells per axis of the split grid
pub const PRESPLIT_GRID_BITS: u32 = 10;

type Fragments = SmallVec<[AABB; 8]>;

/// Binned SAH over primitives whose oversized boxes were cut into fragments first
#[derive(Debug, Clone, Default)]
pub struct PresplitBuilder {
    settings: BuildSettings,
}

impl PresplitBuilder {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }
}

impl Builder for PresplitBuilder {
    fn name(&self) -> &'static str {
        "presplits"
    }

    fn extra_capacity(&self, prim_count: usize) -> usize {
        fragment_budget(prim_count, self.settings.presplit_budget)
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

        let prims = collect_prims(source);
        let mut fragments = presplit(source, &prims, &self.settings);
        tracing::debug!(
            prims = prims.len(),
            fragments = fragments.len(),
            "presplit finished"
        );

        let strategy = BinnedSAHStrategy::new(self.settings.bins);
        let subtree = TreeBuilder::new(&strategy, &self.settings)
            .dedupe_leaves()
            .build(&mut fragments);

        finish(storage, subtree, source, geometry_type)
    }
}

/// Fragments `budget` allows beyond one per primitive
pub fn fragment_budget(prim_count: usize, budget: f32) -> usize {
    num::cast::<f64, usize>((prim_count as f64 * budget as f64).floor()).unwrap_or(usize::MAX)
}

/// Replace large primitives by fragments, largest first, within the fragment budget.
/// `prims[i]` must describe `source.prim(i)`.
pub fn presplit(
    source: &dyn PrimitiveSource,
    prims: &[PrimInfo],
    settings: &BuildSettings,
) -> Vec<PrimInfo> {
    if prims.is_empty() {
        return Vec::new();
    }

    let scene = bounds_of(prims);
    let mean_area = prims.iter().map(|p| p.bounds.area()).sum::<f32>() / prims.len() as f32;
    let threshold = mean_area * settings.presplit_area_factor;
    let mut budget = fragment_budget(prims.len(), settings.presplit_budget);

    let mut candidates: Vec<usize> = (0..prims.len())
        .filter(|&i| prims[i].bounds.area() > threshold)
        .collect();
    candidates.sort_by(|&a, &b| {
        prims[b]
            .bounds
            .area()
            .total_cmp(&prims[a].bounds.area())
            .then(a.cmp(&b))
    });

    let mut split: Vec<(usize, Fragments)> = Vec::new();
    for index in candidates {
        if budget == 0 {
            break;
        }
        let fragments = split_prim(
            source,
            index,
            &prims[index].bounds,
            &scene,
            threshold,
            settings.presplit_max_splits,
            &mut budget,
        );
        if fragments.len() > 1 {
            split.push((index, fragments));
        }
    }
    split.sort_unstable_by_key(|(index, _)| *index);

    let extra: usize = split.iter().map(|(_, f)| f.len() - 1).sum();
    let mut out = Vec::with_capacity(prims.len() + extra);
    let mut pending = split.into_iter().peekable();
    for (index, prim) in prims.iter().enumerate() {
        match pending.next_if(|(i, _)| *i == index) {
            Some((_, fragments)) => out.extend(
                fragments
                    .into_iter()
                    .map(|bounds| PrimInfo::new(prim.prim, bounds)),
            ),
            None => out.push(*prim),
        }
    }
    out
}

fn split_prim(
    source: &dyn PrimitiveSource,
    index: usize,
    bounds: &AABB,
    scene: &AABB,
    threshold: f32,
    max_splits: u32,
    budget: &mut usize,
) -> Fragments {
    let mut fragments: Fragments = smallvec![*bounds];

    for _ in 0..max_splits {
        let mut next = Fragments::new();
        for fragment in fragments {
            if *budget == 0 || fragment.area() <= threshold {
                next.push(fragment);
                continue;
            }
            let Some((axis, position)) = grid_split_plane(&fragment, scene) else {
                next.push(fragment);
                continue;
            };

            let mut left_clip = fragment;
            left_clip.max[axis] = position;
            let mut right_clip = fragment;
            right_clip.min[axis] = position;

            let left = source.clipped_bounds(index, &left_clip);
            let right = source.clipped_bounds(index, &right_clip);
            match (left.is_empty(), right.is_empty()) {
                (false, false) => {
                    *budget -= 1;
                    next.push(left);
                    next.push(right);
                }
                (false, true) => next.push(left),
                (true, false) => next.push(right),
                (true, true) => next.push(fragment),
            }
        }
        fragments = next;
    }

    fragments
}

/// Plane at the coarsest grid level crossed by the box along its largest axis
fn grid_split_plane(fragment: &AABB, scene: &AABB) -> Option<(Axis, f32)> {
    let axis = fragment.largest_axis();
    let extent = scene.extent()[axis];
    if extent <= 0.0 {
        return None;
    }

    let max_cell = (1u32 << PRESPLIT_GRID_BITS) - 1;
    let cell_size = extent / (1u32 << PRESPLIT_GRID_BITS) as f32;
    let to_cell = |v: f32| ((v - scene.min[axis]) / cell_size).clamp(0.0, max_cell as f32) as u32;

    let lo = to_cell(fragment.min[axis]);
    let hi = to_cell(fragment.max[axis]);
    if lo == hi {
        return None;
    }

    let level = 31 - (lo ^ hi).leading_zeros();
    let cell = hi >> level << level;
    let position = scene.min[axis] + cell as f32 * cell_size;
    if position <= fragment.min[axis] || position >= fragment.max[axis] {
        return None;
    }
    Some((axis, position))
}
