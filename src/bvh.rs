use std::mem::size_of;

use strum::{Display, EnumString};

use crate::{
    Bvh4Error, InnerNode, NodeRef, PrimInfo, PrimRef, PrimitiveSource, Result, Triangle, AABB,
};

/// Kind of primitives stored in the leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum GeometryType {
    /// Leaves hold a packed copy of each triangle
    Triangle1,
    /// Leaves hold references resolved through `VirtualGeometry`
    VirtualGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelState {
    Empty,
    Building,
    Built,
}

/// Unbounded scratch arena a subtree is built into before it is spliced
/// into the final storage. Node indices and leaf offsets are local.
#[derive(Debug, Clone)]
pub struct Subtree {
    pub(crate) nodes: Vec<InnerNode>,
    pub(crate) prims: Vec<PrimRef>,
    pub(crate) root: NodeRef,
    pub(crate) bounds: AABB,
}

impl Default for Subtree {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            prims: Vec::new(),
            root: NodeRef::EMPTY_LEAF,
            bounds: AABB::EMPTY,
        }
    }
}

impl Subtree {
    #[inline]
    pub(crate) fn reserve_inner(&mut self) -> u32 {
        self.nodes.push(InnerNode::EMPTY);
        (self.nodes.len() - 1) as u32
    }

    #[inline]
    pub(crate) fn push_leaf<I>(&mut self, prims: I) -> NodeRef
    where
        I: IntoIterator<Item = PrimRef>,
    {
        let first = self.prims.len();
        self.prims.extend(prims);
        NodeRef::Leaf {
            first: first as u32,
            count: (self.prims.len() - first) as u32,
        }
    }

    /// Splice another subtree behind this one, returns its relocated root
    pub(crate) fn append(&mut self, other: Subtree) -> NodeRef {
        let node_base = self.nodes.len() as u32;
        let prim_base = self.prims.len() as u32;
        self.nodes.extend(other.nodes.into_iter().map(|mut node| {
            node.relocate(node_base, prim_base);
            node
        }));
        self.prims.extend(other.prims);
        other.root.offset(node_base, prim_base)
    }

    /// Unnormalized SAH cost of the subtree
    pub fn sah_cost(&self) -> f32 {
        sah_cost(&self.nodes, self.root, &self.bounds)
    }
}

/// Node and leaf arrays of an accelerator, allocated and released together
#[derive(Debug, Clone, Default)]
pub struct Bvh4Storage {
    nodes: Vec<InnerNode>,
    prims: Vec<PrimRef>,
    /// Packed triangles, index aligned with `prims` (triangle accelerators only)
    triangles: Vec<Triangle>,
    node_capacity: usize,
    prim_capacity: usize,
}

impl Bvh4Storage {
    /// Bytes needed for the given capacities
    pub fn required_bytes(node_capacity: usize, prim_capacity: usize, packs_triangles: bool) -> usize {
        let per_prim = size_of::<PrimRef>() + if packs_triangles { size_of::<Triangle>() } else { 0 };
        node_capacity
            .saturating_mul(size_of::<InnerNode>())
            .saturating_add(prim_capacity.saturating_mul(per_prim))
    }

    /// Bytes a build holds at its peak: the final arrays plus the `Subtree`
    /// arena and the primitive records it is built from
    pub fn peak_build_bytes(
        node_capacity: usize,
        prim_capacity: usize,
        packs_triangles: bool,
    ) -> usize {
        let per_prim = size_of::<PrimRef>() + size_of::<PrimInfo>();
        let scratch = node_capacity
            .saturating_mul(size_of::<InnerNode>())
            .saturating_add(prim_capacity.saturating_mul(per_prim));
        Self::required_bytes(node_capacity, prim_capacity, packs_triangles).saturating_add(scratch)
    }

    /// Allocate both arrays up front
    pub fn with_capacity(
        node_capacity: usize,
        prim_capacity: usize,
        packs_triangles: bool,
        memory_limit: Option<usize>,
    ) -> Result<Self> {
        let bytes = Self::peak_build_bytes(node_capacity, prim_capacity, packs_triangles);
        if let Some(limit) = memory_limit {
            if bytes > limit {
                return Err(Bvh4Error::allocation(
                    prim_capacity,
                    format!("{bytes} bytes exceed the {limit} byte limit"),
                ));
            }
        }
        if num::cast::<usize, u32>(node_capacity).is_none()
            || num::cast::<usize, u32>(prim_capacity).is_none()
        {
            return Err(Bvh4Error::allocation(
                prim_capacity,
                "indices do not fit in 32 bits",
            ));
        }

        let mut storage = Self {
            node_capacity,
            prim_capacity,
            ..Default::default()
        };
        let reserve_error = |e: std::collections::TryReserveError| {
            Bvh4Error::allocation(prim_capacity, e.to_string())
        };
        storage
            .nodes
            .try_reserve_exact(node_capacity)
            .map_err(reserve_error)?;
        storage
            .prims
            .try_reserve_exact(prim_capacity)
            .map_err(reserve_error)?;
        if packs_triangles {
            storage
                .triangles
                .try_reserve_exact(prim_capacity)
                .map_err(reserve_error)?;
        }
        Ok(storage)
    }

    /// Copy a finished subtree in, failing if it overruns the reserved capacity
    pub(crate) fn append(&mut self, subtree: Subtree) -> Result<NodeRef> {
        let nodes = self.nodes.len() + subtree.nodes.len();
        let prims = self.prims.len() + subtree.prims.len();
        if nodes > self.node_capacity || prims > self.prim_capacity {
            return Err(Bvh4Error::allocation(
                prims,
                format!(
                    "build needs {nodes} nodes and {prims} leaf entries, capacity is {} and {}",
                    self.node_capacity, self.prim_capacity
                ),
            ));
        }

        let node_base = self.nodes.len() as u32;
        let prim_base = self.prims.len() as u32;
        self.nodes.extend(subtree.nodes.into_iter().map(|mut node| {
            node.relocate(node_base, prim_base);
            node
        }));
        self.prims.extend(subtree.prims);
        Ok(subtree.root.offset(node_base, prim_base))
    }

    /// Fill the packed triangle array from the source
    pub(crate) fn pack_triangles(&mut self, source: &dyn PrimitiveSource) -> Result<()> {
        self.triangles.clear();
        for prim in &self.prims {
            let tri = source.triangle(*prim).ok_or_else(|| {
                Bvh4Error::StructuralInvariant(format!("{prim:?} has no triangle data"))
            })?;
            self.triangles.push(tri);
        }
        Ok(())
    }

    #[inline]
    pub fn nodes(&self) -> &[InnerNode] {
        &self.nodes
    }

    #[inline]
    pub fn prims(&self) -> &[PrimRef] {
        &self.prims
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn node_capacity(&self) -> usize {
        self.node_capacity
    }

    pub fn prim_capacity(&self) -> usize {
        self.prim_capacity
    }
}

/// What a builder hands back on success
#[derive(Debug)]
pub struct BuildOutput {
    pub storage: Bvh4Storage,
    pub root: NodeRef,
    pub bounds: AABB,
}

/// 4-wide bounding volume hierarchy
#[derive(Debug, Clone)]
pub struct Bvh4 {
    root: NodeRef,
    storage: Bvh4Storage,
    bounds: AABB,
    geometry_type: GeometryType,
    state: AccelState,
}

impl Bvh4 {
    pub fn new(geometry_type: GeometryType) -> Self {
        Self {
            root: NodeRef::EMPTY_LEAF,
            storage: Default::default(),
            bounds: AABB::EMPTY,
            geometry_type,
            state: AccelState::Empty,
        }
    }

    /// Run a build and publish its result. The accelerator only becomes
    /// `Built` on success and stays `Empty` on failure.
    pub(crate) fn build_with<F>(&mut self, build: F) -> Result<()>
    where
        F: FnOnce(GeometryType) -> Result<BuildOutput>,
    {
        assert_eq!(
            self.state,
            AccelState::Empty,
            "An accelerator is built exactly once"
        );
        self.state = AccelState::Building;

        match build(self.geometry_type) {
            Ok(BuildOutput {
                storage,
                root,
                bounds,
            }) => {
                self.storage = storage;
                self.root = root;
                self.bounds = bounds;
                self.state = AccelState::Built;
                Ok(())
            }
            Err(e) => {
                self.state = AccelState::Empty;
                Err(e)
            }
        }
    }

    #[inline]
    pub fn root(&self) -> NodeRef {
        self.root
    }

    #[inline]
    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    #[inline]
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    #[inline]
    pub fn state(&self) -> AccelState {
        self.state
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        self.state == AccelState::Built
    }

    #[inline]
    pub fn storage(&self) -> &Bvh4Storage {
        &self.storage
    }

    #[inline(always)]
    pub fn node(&self, index: u32) -> &InnerNode {
        &self.storage.nodes[index as usize]
    }

    #[inline(always)]
    pub fn leaf_prims(&self, first: u32, count: u32) -> &[PrimRef] {
        &self.storage.prims[first as usize..(first + count) as usize]
    }

    #[inline(always)]
    pub fn leaf_triangles(&self, first: u32, count: u32) -> &[Triangle] {
        &self.storage.triangles[first as usize..(first + count) as usize]
    }

    /// Normalized surface area heuristic cost, lower is better
    pub fn sah(&self) -> f32 {
        let area = self.bounds.area();
        if area <= 0.0 {
            return 0.0;
        }
        sah_cost(&self.storage.nodes, self.root, &self.bounds) / area
    }

    /// Every leaf reachable from the root as (first, count)
    pub fn leaves(&self) -> Vec<(u32, u32)> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            match node {
                NodeRef::Leaf { first, count } => leaves.push((first, count)),
                NodeRef::Inner(index) => {
                    stack.extend(self.node(index).children.iter().rev().flatten())
                }
            }
        }
        leaves
    }

    /// Sum of the primitive counts of all leaves
    pub fn leaf_prim_count(&self) -> usize {
        self.leaves()
            .iter()
            .map(|&(_, count)| count as usize)
            .sum()
    }

    /// Walk the tree and check bounds nesting, index ranges and acyclicity
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: String| Err(Bvh4Error::StructuralInvariant(msg));
        let mut visited = vec![false; self.storage.nodes.len()];
        let mut stack = vec![(self.root, self.bounds)];

        while let Some((node, bounds)) = stack.pop() {
            match node {
                NodeRef::Leaf { first, count } => {
                    if (first + count) as usize > self.storage.prims.len() {
                        return violation(format!("leaf {node:?} is out of range"));
                    }
                }
                NodeRef::Inner(index) => {
                    let Some(seen) = visited.get_mut(index as usize) else {
                        return violation(format!("inner node {index} is out of range"));
                    };
                    if *seen {
                        return violation(format!("inner node {index} is reachable twice"));
                    }
                    *seen = true;

                    let inner = self.node(index);
                    if inner.child_count() < 2 {
                        return violation(format!("inner node {index} has less than two children"));
                    }
                    for (child, child_bounds) in inner.iter_children() {
                        if !bounds.contains(&child_bounds) {
                            return violation(format!("child of node {index} escapes its parent"));
                        }
                        stack.push((child, child_bounds));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Recursive SAH cost: inner nodes add their area, leaves weigh it by their
/// primitive count, empty slots add nothing
pub fn sah_cost(nodes: &[InnerNode], node: NodeRef, bounds: &AABB) -> f32 {
    let area = if bounds.is_empty() { 0.0 } else { bounds.area() };

    match node {
        NodeRef::Inner(index) => {
            let inner = &nodes[index as usize];
            area + inner
                .iter_children()
                .map(|(child, child_bounds)| sah_cost(nodes, child, &child_bounds))
                .sum::<f32>()
        }
        NodeRef::Leaf { count, .. } => area * count as f32,
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::*;

    #[test]
    fn empty_accelerator() {
        let bvh = Bvh4::new(GeometryType::Triangle1);
        assert_eq!(bvh.state(), AccelState::Empty);
        assert_eq!(bvh.root(), NodeRef::EMPTY_LEAF);
        assert_eq!(bvh.sah(), 0.0);
        assert_eq!(bvh.leaf_prim_count(), 0);
    }

    #[test]
    fn failed_build_leaves_accelerator_empty() {
        let mut bvh = Bvh4::new(GeometryType::Triangle1);
        let result = bvh.build_with(|_| Err(Bvh4Error::allocation(1, "test")));
        assert!(matches!(result, Err(Bvh4Error::Allocation { .. })));
        assert_eq!(bvh.state(), AccelState::Empty);
    }

    #[test]
    #[should_panic(expected = "built exactly once")]
    fn rebuild_is_rejected() {
        let mut bvh = Bvh4::new(GeometryType::Triangle1);
        let empty = || {
            Ok(BuildOutput {
                storage: Bvh4Storage::default(),
                root: NodeRef::EMPTY_LEAF,
                bounds: AABB::EMPTY,
            })
        };
        bvh.build_with(|_| empty()).unwrap();
        let _ = bvh.build_with(|_| empty());
    }

    #[test]
    fn storage_respects_capacity() {
        let mut subtree = Subtree::default();
        subtree.root = subtree.push_leaf([PrimRef::new(0, 0), PrimRef::new(0, 1)]);

        let mut storage = Bvh4Storage::with_capacity(0, 1, false, None).unwrap();
        assert!(matches!(
            storage.append(subtree),
            Err(Bvh4Error::Allocation { .. })
        ));
    }

    #[test]
    fn memory_limit_is_enforced() {
        let result = Bvh4Storage::with_capacity(1000, 1000, true, Some(64));
        assert!(matches!(result, Err(Bvh4Error::Allocation { .. })));
    }

    #[test]
    fn memory_limit_counts_the_build_arena() {
        let final_size = Bvh4Storage::required_bytes(64, 64, true);
        let peak = Bvh4Storage::peak_build_bytes(64, 64, true);
        assert!(peak > final_size);

        let result = Bvh4Storage::with_capacity(64, 64, true, Some(final_size));
        assert!(matches!(result, Err(Bvh4Error::Allocation { .. })));
        assert!(Bvh4Storage::with_capacity(64, 64, true, Some(peak)).is_ok());
    }

    #[test]
    fn subtree_append_relocates() {
        let mut a = Subtree::default();
        a.push_leaf([PrimRef::new(0, 9)]);

        let mut b = Subtree::default();
        let index = b.reserve_inner();
        let left = b.push_leaf([PrimRef::new(0, 0)]);
        let right = b.push_leaf([PrimRef::new(0, 1)]);
        let bounds = AABB::new(Vec3A::ZERO, Vec3A::ONE);
        b.nodes[index as usize].set_child(0, &bounds, left);
        b.nodes[index as usize].set_child(1, &bounds, right);
        b.root = NodeRef::Inner(index);

        let root = a.append(b);
        assert_eq!(root, NodeRef::Inner(0));
        assert_eq!(
            a.nodes[0].child(1),
            Some(NodeRef::Leaf { first: 2, count: 1 })
        );
        assert_eq!(a.prims[2], PrimRef::new(0, 1));
    }
}
