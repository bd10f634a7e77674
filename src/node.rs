use glam::Vec4;

use crate::{Bvh4Error, Result, AABB};

/// Branching factor of the tree
pub const BRANCHING_FACTOR: usize = 4;

/// Reference to a child: an inner node in the node array or a run of the leaf array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Inner(u32),
    Leaf { first: u32, count: u32 },
}

impl NodeRef {
    /// Tag bit of the packed form
    pub const LEAF_TAG: u64 = 1 << 63;

    /// Largest primitive count a packed leaf can carry
    pub const MAX_LEAF_COUNT: u32 = (1 << 31) - 1;

    /// Root of an empty scene
    pub const EMPTY_LEAF: Self = NodeRef::Leaf { first: 0, count: 0 };

    #[inline(always)]
    pub fn is_inner(&self) -> bool {
        matches!(self, NodeRef::Inner(_))
    }

    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        !self.is_inner()
    }

    #[inline]
    pub fn as_inner(&self) -> Result<u32> {
        match *self {
            NodeRef::Inner(index) => Ok(index),
            NodeRef::Leaf { .. } => Err(Bvh4Error::StructuralInvariant(format!(
                "{self:?} decoded as an inner node"
            ))),
        }
    }

    /// (first, count) of a leaf
    #[inline]
    pub fn as_leaf(&self) -> Result<(u32, u32)> {
        match *self {
            NodeRef::Leaf { first, count } => Ok((first, count)),
            NodeRef::Inner(_) => Err(Bvh4Error::StructuralInvariant(format!(
                "{self:?} decoded as a leaf"
            ))),
        }
    }

    /// Packed form: bit 63 tags leaves, leaf count in bits 32..63, index in the low 32 bits
    #[inline]
    pub fn to_bits(self) -> u64 {
        match self {
            NodeRef::Inner(index) => index as u64,
            NodeRef::Leaf { first, count } => {
                assert!(count <= Self::MAX_LEAF_COUNT, "Leaf too large to pack");
                Self::LEAF_TAG | (count as u64) << 32 | first as u64
            }
        }
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Result<Self> {
        if bits & Self::LEAF_TAG != 0 {
            return Ok(NodeRef::Leaf {
                first: bits as u32,
                count: ((bits & !Self::LEAF_TAG) >> 32) as u32,
            });
        }
        if bits >> 32 != 0 {
            return Err(Bvh4Error::StructuralInvariant(format!(
                "untagged reference {bits:#x} has bits above the node index"
            )));
        }
        Ok(NodeRef::Inner(bits as u32))
    }

    /// Move the reference when its subtree is appended behind existing storage
    #[inline]
    pub(crate) fn offset(self, node_base: u32, prim_base: u32) -> Self {
        match self {
            NodeRef::Inner(index) => NodeRef::Inner(index + node_base),
            NodeRef::Leaf { first, count } => NodeRef::Leaf {
                first: first + prim_base,
                count,
            },
        }
    }
}

/// Four child boxes stored one lane per child, plus the child references.
/// An empty slot has `None` as child and `AABB::EMPTY` as bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InnerNode {
    pub lower_x: Vec4,
    pub lower_y: Vec4,
    pub lower_z: Vec4,
    pub upper_x: Vec4,
    pub upper_y: Vec4,
    pub upper_z: Vec4,
    pub children: [Option<NodeRef>; BRANCHING_FACTOR],
}

impl Default for InnerNode {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl InnerNode {
    /// Node with all four slots empty
    pub const EMPTY: Self = Self {
        lower_x: Vec4::INFINITY,
        lower_y: Vec4::INFINITY,
        lower_z: Vec4::INFINITY,
        upper_x: Vec4::NEG_INFINITY,
        upper_y: Vec4::NEG_INFINITY,
        upper_z: Vec4::NEG_INFINITY,
        children: [None; BRANCHING_FACTOR],
    };

    #[inline]
    pub fn set_child(&mut self, slot: usize, bounds: &AABB, child: NodeRef) {
        self.lower_x[slot] = bounds.min.x;
        self.lower_y[slot] = bounds.min.y;
        self.lower_z[slot] = bounds.min.z;
        self.upper_x[slot] = bounds.max.x;
        self.upper_y[slot] = bounds.max.y;
        self.upper_z[slot] = bounds.max.z;
        self.children[slot] = Some(child);
    }

    #[inline]
    pub fn child(&self, slot: usize) -> Option<NodeRef> {
        self.children[slot]
    }

    #[inline]
    pub fn is_slot_empty(&self, slot: usize) -> bool {
        self.children[slot].is_none()
    }

    pub fn bounds(&self, slot: usize) -> AABB {
        if self.is_slot_empty(slot) {
            return AABB::EMPTY;
        }
        AABB::new(
            glam::Vec3A::new(self.lower_x[slot], self.lower_y[slot], self.lower_z[slot]),
            glam::Vec3A::new(self.upper_x[slot], self.upper_y[slot], self.upper_z[slot]),
        )
    }

    /// Bit `i` is set when slot `i` holds a child
    #[inline(always)]
    pub fn valid_mask(&self) -> u32 {
        self.children
            .iter()
            .enumerate()
            .fold(0, |mask, (slot, child)| {
                if child.is_some() {
                    mask | 1 << slot
                } else {
                    mask
                }
            })
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        self.valid_mask().count_ones() as usize
    }

    /// Populated slots with their bounds
    pub fn iter_children(&self) -> impl Iterator<Item = (NodeRef, AABB)> + '_ {
        (0..BRANCHING_FACTOR)
            .filter_map(move |slot| self.children[slot].map(|child| (child, self.bounds(slot))))
    }

    pub(crate) fn relocate(&mut self, node_base: u32, prim_base: u32) {
        for child in self.children.iter_mut().flatten() {
            *child = child.offset(node_base, prim_base);
        }
    }
}
