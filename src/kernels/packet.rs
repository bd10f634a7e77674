use std::array;

use smallvec::{smallvec, SmallVec};

use crate::{
    assert_built, traverse_from, Bvh4, LaneMask, LeafIntersector, NodeIntersector, NodeRef,
    RayPacket, Scene, TraversalRay, BRANCHING_FACTOR, PACKET_WIDTH,
};

/// Hybrid traversal continues lane by lane once this few lanes are left
pub const HYBRID_SWITCH_LANES: usize = 4;

/// Every active lane traced on its own from the root
pub fn intersect16_single<N, L>(bvh: &Bvh4, scene: &Scene, packet: &mut RayPacket)
where
    N: NodeIntersector,
    L: LeafIntersector,
{
    assert_built(bvh);
    let active = packet.valid;
    for lane in active.iter_ones() {
        traverse_from::<N, L>(bvh, scene, bvh.root(), &mut packet.rays[lane]);
    }
}

/// Whole packet traverses together, each node carries the mask of lanes that reached it
pub fn intersect16_chunk<N, L>(bvh: &Bvh4, scene: &Scene, packet: &mut RayPacket)
where
    N: NodeIntersector,
    L: LeafIntersector,
{
    assert_built(bvh);
    traverse_packet::<N, L>(bvh, scene, packet, 0);
}

/// Packet traversal until few lanes remain, then per lane from that node
pub fn intersect16_hybrid<N, L>(bvh: &Bvh4, scene: &Scene, packet: &mut RayPacket)
where
    N: NodeIntersector,
    L: LeafIntersector,
{
    assert_built(bvh);
    traverse_packet::<N, L>(bvh, scene, packet, HYBRID_SWITCH_LANES);
}

fn traverse_packet<N, L>(bvh: &Bvh4, scene: &Scene, packet: &mut RayPacket, switch_lanes: usize)
where
    N: NodeIntersector,
    L: LeafIntersector,
{
    let mut rays: [TraversalRay; PACKET_WIDTH] =
        array::from_fn(|lane| TraversalRay::new(&packet.rays[lane]));
    let mut stack: SmallVec<[(NodeRef, LaneMask); 64]> = smallvec![(bvh.root(), packet.valid)];

    while let Some((node, active)) = stack.pop() {
        if active.count_ones() <= switch_lanes {
            for lane in active.iter_ones() {
                let ray = &mut packet.rays[lane];
                traverse_from::<N, L>(bvh, scene, node, ray);
                rays[lane].far = ray.distance;
            }
            continue;
        }

        match node {
            NodeRef::Leaf { first, count } => {
                for lane in active.iter_ones() {
                    let ray = &mut packet.rays[lane];
                    if L::intersect(bvh, scene, first, count, ray) {
                        rays[lane].far = ray.distance;
                    }
                }
            }
            NodeRef::Inner(index) => {
                let inner = bvh.node(index);
                let mut child_lanes = [LaneMask::ZERO; BRANCHING_FACTOR];
                for lane in active.iter_ones() {
                    let hits = N::intersect(inner, &rays[lane]);
                    for (slot, lanes) in child_lanes.iter_mut().enumerate() {
                        if hits.is_hit(slot) {
                            lanes.set(lane, true);
                        }
                    }
                }
                for slot in (0..BRANCHING_FACTOR).rev() {
                    if let (true, Some(child)) = (child_lanes[slot].any(), inner.child(slot)) {
                        stack.push((child, child_lanes[slot]));
                    }
                }
            }
        }
    }
}
