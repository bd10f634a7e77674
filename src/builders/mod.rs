use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use strum::{Display, EnumIter, EnumString};

use crate::{
    bounds_of, BinnedSAHStrategy, Bvh4, Bvh4Error, Bvh4Storage, BuildOutput, GeometryType,
    InnerNode, NodeRef, PrimInfo, PrimRef, PrimitiveSource, Result, SplitPlaneStrategy, Subtree,
    AABB, BRANCHING_FACTOR, MAX_BINS,
};

pub mod binned_sah;
pub use binned_sah::*;

pub mod presplit;
pub use presplit::*;

pub mod morton;
pub use morton::*;

pub mod morton_enhanced;
pub use morton_enhanced::*;

pub mod virtual_geometry;
pub use virtual_geometry::*;

/// Tuning knobs shared by all builders
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    /// Ranges with at most this many primitives become leaves
    pub max_leaf_size: usize,
    /// Depth at which a leaf is forced
    pub max_depth: usize,
    /// SAH bins per axis
    pub bins: usize,
    /// Ranges at least this large build their children in parallel
    pub parallel_threshold: usize,
    /// Primitives with more than this times the mean area get split
    pub presplit_area_factor: f32,
    /// Extra fragments allowed, as a fraction of the primitive count
    pub presplit_budget: f32,
    /// Split rounds per primitive
    pub presplit_max_splits: u32,
    /// Subtrees up to this size get a binned SAH second opinion
    pub morton_reopt_size: usize,
    /// Upper bound in bytes for the peak footprint of a build: the node and
    /// leaf storage plus the scratch arena it is assembled in
    pub memory_limit: Option<usize>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            max_depth: 48,
            bins: 16,
            parallel_threshold: 4096,
            presplit_area_factor: 4.0,
            presplit_budget: 0.5,
            presplit_max_splits: 3,
            morton_reopt_size: 32,
            memory_limit: None,
        }
    }
}

impl BuildSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_leaf_size == 0 || self.max_leaf_size > NodeRef::MAX_LEAF_COUNT as usize {
            return Err(Bvh4Error::configuration(
                "leaf size",
                self.max_leaf_size.to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(Bvh4Error::configuration(
                "max depth",
                self.max_depth.to_string(),
            ));
        }
        if !(2..=MAX_BINS).contains(&self.bins) {
            return Err(Bvh4Error::configuration("bin count", self.bins.to_string()));
        }
        if !(self.presplit_area_factor.is_finite() && self.presplit_area_factor > 0.0) {
            return Err(Bvh4Error::configuration(
                "presplit area factor",
                self.presplit_area_factor.to_string(),
            ));
        }
        if !(self.presplit_budget.is_finite() && self.presplit_budget >= 0.0) {
            return Err(Bvh4Error::configuration(
                "presplit budget",
                self.presplit_budget.to_string(),
            ));
        }
        Ok(())
    }
}

/// Construction strategy of a `Bvh4`
pub trait Builder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Leaf entries reserved beyond one per input primitive
    fn extra_capacity(&self, _prim_count: usize) -> usize {
        0
    }

    /// Build fresh storage for the primitives of `source`
    fn build_storage(
        &self,
        source: &dyn PrimitiveSource,
        geometry_type: GeometryType,
    ) -> Result<BuildOutput>;

    /// Populate an empty accelerator. On error it stays `Empty`.
    #[tracing::instrument(skip_all, fields(builder = self.name(), prims = source.prim_count()))]
    fn build(&self, source: &dyn PrimitiveSource, bvh: &mut Bvh4) -> Result<()> {
        bvh.build_with(|geometry_type| self.build_storage(source, geometry_type))?;
        tracing::debug!(
            nodes = bvh.storage().nodes().len(),
            leaf_refs = bvh.storage().prims().len(),
            sah = bvh.sah(),
            "build finished"
        );
        Ok(())
    }
}

/// Construction mode selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
pub enum BuildMode {
    #[default]
    #[strum(serialize = "default")]
    BinnedSAH,
    #[strum(serialize = "presplits")]
    Presplits,
    #[strum(serialize = "morton")]
    Morton,
    #[strum(serialize = "morton-enhanced")]
    MortonEnhanced,
    #[strum(serialize = "virtual-geometry")]
    VirtualGeometry,
}

impl BuildMode {
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Bvh4Error::configuration("build mode", name))
    }

    /// Kind of leaves the mode produces
    pub fn geometry_type(self) -> GeometryType {
        match self {
            BuildMode::VirtualGeometry => GeometryType::VirtualGeometry,
            _ => GeometryType::Triangle1,
        }
    }

    pub fn builder(self, settings: &BuildSettings) -> Box<dyn Builder> {
        let settings = settings.clone();
        match self {
            BuildMode::BinnedSAH => Box::new(BinnedSAHBuilder::new(settings)),
            BuildMode::Presplits => Box::new(PresplitBuilder::new(settings)),
            BuildMode::Morton => Box::new(MortonBuilder::new(settings)),
            BuildMode::MortonEnhanced => Box::new(MortonEnhancedBuilder::new(settings)),
            BuildMode::VirtualGeometry => Box::new(VirtualGeometryBuilder::new(settings)),
        }
    }
}

/// Bounds and per primitive records of a source, gathered in parallel
pub(crate) fn collect_prims(source: &dyn PrimitiveSource) -> Vec<PrimInfo> {
    (0..source.prim_count())
        .into_par_iter()
        .map(|index| {
            let (prim, bounds) = source.prim(index);
            PrimInfo::new(prim, bounds)
        })
        .collect()
}

/// Reserve node and leaf storage for `prim_count` primitives plus `extra` leaf entries
pub(crate) fn allocate_storage(
    prim_count: usize,
    extra: usize,
    geometry_type: GeometryType,
    settings: &BuildSettings,
) -> Result<Bvh4Storage> {
    let capacity = prim_count
        .checked_add(extra)
        .ok_or_else(|| Bvh4Error::allocation(prim_count, "capacity estimate overflows"))?;
    // every inner node has two or more children, so nodes < leaves <= leaf entries
    Bvh4Storage::with_capacity(
        capacity,
        capacity,
        geometry_type == GeometryType::Triangle1,
        settings.memory_limit,
    )
}

/// Splice the finished tree into the storage and pack the leaf triangles
pub(crate) fn finish(
    mut storage: Bvh4Storage,
    subtree: Subtree,
    source: &dyn PrimitiveSource,
    geometry_type: GeometryType,
) -> Result<BuildOutput> {
    let bounds = subtree.bounds;
    let root = storage.append(subtree)?;
    if geometry_type == GeometryType::Triangle1 {
        storage.pack_triangles(source)?;
    }
    Ok(BuildOutput {
        storage,
        root,
        bounds,
    })
}

#[derive(Debug, Clone, Copy)]
struct ChildRange {
    start: usize,
    len: usize,
    bounds: AABB,
}

/// Top-down 4-wide construction around a binary split strategy
pub(crate) struct TreeBuilder<'a, S> {
    strategy: &'a S,
    settings: &'a BuildSettings,
    dedupe_leaves: bool,
    refine_below: Option<usize>,
}

impl<S> Clone for TreeBuilder<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for TreeBuilder<'_, S> {}

impl<'a, S: SplitPlaneStrategy> TreeBuilder<'a, S> {
    pub fn new(strategy: &'a S, settings: &'a BuildSettings) -> Self {
        Self {
            strategy,
            settings,
            dedupe_leaves: false,
            refine_below: None,
        }
    }

    /// Collapse repeated references to one primitive inside a leaf
    pub fn dedupe_leaves(mut self) -> Self {
        self.dedupe_leaves = true;
        self
    }

    /// Rebuild ranges of at most `size` primitives with binned SAH and keep the cheaper tree
    pub fn refine_below(mut self, size: usize) -> Self {
        self.refine_below = Some(size);
        self
    }

    pub fn build(&self, prims: &mut [PrimInfo]) -> Subtree {
        self.build_subtree(prims, 0)
    }

    fn build_subtree(&self, prims: &mut [PrimInfo], depth: usize) -> Subtree {
        let mut subtree = Subtree::default();
        let (root, bounds) = self.build_node(prims, depth, &mut subtree);
        subtree.root = root;
        subtree.bounds = bounds;
        subtree
    }

    fn build_node(
        &self,
        prims: &mut [PrimInfo],
        depth: usize,
        out: &mut Subtree,
    ) -> (NodeRef, AABB) {
        let bounds = bounds_of(prims);
        let prim_count = prims.len();

        if prim_count <= self.settings.max_leaf_size || depth >= self.settings.max_depth {
            return (self.emit_leaf(prims, out), bounds);
        }

        if let Some(limit) = self.refine_below {
            if prim_count <= limit {
                let refined = self.build_refined(prims, depth);
                return (out.append(refined), bounds);
            }
        }

        let children = self.split_children(prims, bounds);
        let index = out.reserve_inner();
        let mut node = InnerNode::EMPTY;

        let mut slices: SmallVec<[&mut [PrimInfo]; BRANCHING_FACTOR]> = SmallVec::new();
        let mut rest = prims;
        for child in &children {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(child.len);
            slices.push(head);
            rest = tail;
        }

        if prim_count >= self.settings.parallel_threshold {
            let subtrees: Vec<Subtree> = slices
                .into_vec()
                .into_par_iter()
                .map(|slice| self.build_subtree(slice, depth + 1))
                .collect();
            for (slot, subtree) in subtrees.into_iter().enumerate() {
                let child_bounds = subtree.bounds;
                let child = out.append(subtree);
                node.set_child(slot, &child_bounds, child);
            }
        } else {
            for (slot, slice) in slices.into_iter().enumerate() {
                let (child, child_bounds) = self.build_node(slice, depth + 1, out);
                node.set_child(slot, &child_bounds, child);
            }
        }

        out.nodes[index as usize] = node;
        (NodeRef::Inner(index), bounds)
    }

    /// Split the range in two, then keep splitting the largest child that is
    /// still above the leaf size until there are four
    fn split_children(
        &self,
        prims: &mut [PrimInfo],
        bounds: AABB,
    ) -> SmallVec<[ChildRange; BRANCHING_FACTOR]> {
        let mut children: SmallVec<[ChildRange; BRANCHING_FACTOR]> = smallvec![ChildRange {
            start: 0,
            len: prims.len(),
            bounds,
        }];

        while children.len() < BRANCHING_FACTOR {
            let mut best: Option<usize> = None;
            let mut best_area = f32::NEG_INFINITY;
            for (i, child) in children.iter().enumerate() {
                if child.len > self.settings.max_leaf_size && child.bounds.area() > best_area {
                    best = Some(i);
                    best_area = child.bounds.area();
                }
            }
            let Some(i) = best else {
                break;
            };

            let child = children[i];
            let range = &mut prims[child.start..child.start + child.len];
            let mid = self.strategy.partition(range).clamp(1, child.len - 1);

            children[i] = ChildRange {
                start: child.start,
                len: mid,
                bounds: bounds_of(&range[..mid]),
            };
            children.insert(
                i + 1,
                ChildRange {
                    start: child.start + mid,
                    len: child.len - mid,
                    bounds: bounds_of(&range[mid..]),
                },
            );
        }

        children
    }

    fn emit_leaf(&self, prims: &[PrimInfo], out: &mut Subtree) -> NodeRef {
        if self.dedupe_leaves {
            let mut refs: SmallVec<[PrimRef; 8]> = prims.iter().map(|p| p.prim).collect();
            refs.sort_unstable();
            refs.dedup();
            out.push_leaf(refs)
        } else {
            out.push_leaf(prims.iter().map(|p| p.prim))
        }
    }

    fn build_refined(&self, prims: &mut [PrimInfo], depth: usize) -> Subtree {
        let plain = TreeBuilder {
            refine_below: None,
            ..*self
        };
        let linear = plain.build_subtree(prims, depth);

        let sah_strategy = BinnedSAHStrategy::new(self.settings.bins);
        let mut reordered = prims.to_vec();
        let binned = TreeBuilder {
            strategy: &sah_strategy,
            settings: self.settings,
            dedupe_leaves: self.dedupe_leaves,
            refine_below: None,
        }
        .build_subtree(&mut reordered, depth);

        if binned.sah_cost() < linear.sah_cost() {
            binned
        } else {
            linear
        }
    }
}
