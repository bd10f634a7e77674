use glam::Vec3A;
use smallvec::{smallvec, SmallVec};
use strum::IntoEnumIterator;

use crate::{Axis, Grow, PrimRef, AABB};

/// Largest number of SAH bins a strategy accepts
pub const MAX_BINS: usize = 32;

/// Per primitive build record
#[derive(Debug, Clone, Copy)]
pub struct PrimInfo {
    pub bounds: AABB,
    pub centroid: Vec3A,
    pub prim: PrimRef,
    /// Morton key, zero unless a Morton builder assigned one
    pub code: u64,
}

impl PrimInfo {
    #[inline]
    pub fn new(prim: PrimRef, bounds: AABB) -> Self {
        Self {
            bounds,
            centroid: bounds.center(),
            prim,
            code: 0,
        }
    }
}

/// Union of the primitive bounds
pub fn bounds_of(prims: &[PrimInfo]) -> AABB {
    prims.iter().fold(AABB::EMPTY, |mut aabb, p| {
        aabb.grow(&p.bounds);
        aabb
    })
}

/// Bounds of the primitive centroids
pub fn centroid_bounds_of(prims: &[PrimInfo]) -> AABB {
    prims.iter().fold(AABB::EMPTY, |mut aabb, p| {
        aabb.grow(p.centroid);
        aabb
    })
}

/// Reorder `prims` so `pred` holds for a prefix, returns the prefix length
fn partition_in_place<F>(prims: &mut [PrimInfo], pred: F) -> usize
where
    F: Fn(&PrimInfo) -> bool,
{
    // Quick partition
    let mut i = 0;
    let mut j = prims.len();
    while i < j {
        if pred(&prims[i]) {
            i += 1;
        } else {
            j -= 1;
            prims.swap(i, j);
        }
    }
    i
}

#[derive(Debug, Clone, Copy)]
pub struct SplitPlane {
    pub axis: Axis,
    /// Bins `0..=bin` go left
    pub bin: usize,
    pub split_position: f32,
    pub cost: f32,
    pub should_split: bool,
}

impl Default for SplitPlane {
    fn default() -> Self {
        Self {
            axis: Axis::X,
            bin: 0,
            split_position: f32::INFINITY,
            cost: f32::INFINITY,
            should_split: false,
        }
    }
}

pub trait SplitPlaneStrategy: Sync {
    /// Reorder `prims` into two halves and return the size of the first one.
    /// For two or more primitives the result is in `1..prims.len()`.
    fn partition(&self, prims: &mut [PrimInfo]) -> usize;
}

/// Split at the median centroid along the largest centroid axis, ties by reference
pub fn median_partition(prims: &mut [PrimInfo]) -> usize {
    let axis = centroid_bounds_of(prims).largest_axis();
    let mid = prims.len() / 2;
    prims.select_nth_unstable_by(mid, |a, b| {
        a.centroid[axis]
            .total_cmp(&b.centroid[axis])
            .then_with(|| a.prim.cmp(&b.prim))
    });
    mid
}

#[derive(Debug, Clone, Copy, Default)]
struct Bin {
    pub bounds: AABB,
    pub prim_count: u32,
}

/// Binned surface area heuristic over centroid bins
#[derive(Debug, Clone, Copy)]
pub struct BinnedSAHStrategy {
    bins: usize,
}

impl Default for BinnedSAHStrategy {
    fn default() -> Self {
        Self { bins: 16 }
    }
}

impl BinnedSAHStrategy {
    pub fn new(bins: usize) -> Self {
        assert!(
            (2..=MAX_BINS).contains(&bins),
            "Between 2 and {MAX_BINS} bins are needed"
        );
        Self { bins }
    }

    #[inline(always)]
    fn bin_index(&self, value: f32, bounds_min: f32, scale: f32) -> usize {
        (((value - bounds_min) * scale) as usize).min(self.bins - 1)
    }

    /// Cheapest bin boundary over all three axes.
    /// Ties keep the earlier axis (x, y, z) and then the lower bin.
    pub fn find_split_plane(&self, prims: &[PrimInfo], centroid_bounds: &AABB) -> SplitPlane {
        let mut best = SplitPlane::default();
        let bin_count = self.bins;

        for axis in Axis::iter() {
            let bounds_min = centroid_bounds.min[axis];
            let bounds_max = centroid_bounds.max[axis];

            if approx::abs_diff_eq!(bounds_min, bounds_max, epsilon = f32::EPSILON) {
                continue;
            }

            let mut bins: SmallVec<[Bin; MAX_BINS]> = smallvec![Bin::default(); bin_count];

            let scale = bin_count as f32 / (bounds_max - bounds_min);

            for prim in prims {
                let bin = &mut bins[self.bin_index(prim.centroid[axis], bounds_min, scale)];
                bin.prim_count += 1;
                bin.bounds.grow(&prim.bounds);
            }

            let bins = bins;

            let mut right_area: SmallVec<[f32; MAX_BINS]> = smallvec![0.0; bin_count];
            let mut right_count: SmallVec<[u32; MAX_BINS]> = smallvec![0; bin_count];

            let mut right_box = AABB::EMPTY;
            let mut right_sum: u32 = 0;
            for i in (1..bin_count).rev() {
                right_sum += bins[i].prim_count;
                right_box.grow(&bins[i].bounds);
                right_count[i] = right_sum;
                right_area[i] = right_box.area();
            }

            let mut left_box = AABB::EMPTY;
            let mut left_sum: u32 = 0;
            for i in 0..(bin_count - 1) {
                left_sum += bins[i].prim_count;
                left_box.grow(&bins[i].bounds);

                if left_sum == 0 || right_count[i + 1] == 0 {
                    continue;
                }

                let plane_cost = left_sum as f32 * left_box.area()
                    + right_count[i + 1] as f32 * right_area[i + 1];
                if plane_cost < best.cost {
                    best = SplitPlane {
                        axis,
                        bin: i,
                        split_position: bounds_min + (i + 1) as f32 / scale,
                        cost: plane_cost,
                        should_split: true,
                    };
                }
            }
        }

        best
    }
}

impl SplitPlaneStrategy for BinnedSAHStrategy {
    fn partition(&self, prims: &mut [PrimInfo]) -> usize {
        let centroid_bounds = centroid_bounds_of(prims);
        let plane = self.find_split_plane(prims, &centroid_bounds);

        if plane.should_split {
            let axis = plane.axis;
            let bounds_min = centroid_bounds.min[axis];
            let scale = self.bins as f32 / (centroid_bounds.max[axis] - bounds_min);
            let mid = partition_in_place(prims, |p| {
                self.bin_index(p.centroid[axis], bounds_min, scale) <= plane.bin
            });
            if mid > 0 && mid < prims.len() {
                return mid;
            }
        }

        // All centroids in one spot
        median_partition(prims)
    }
}

/// Bits per axis of a Morton key
pub const MORTON_BITS: u32 = 21;

/// Spread the low 21 bits of `v` so there are two zero bits between each
#[inline]
pub fn spread_bits(v: u64) -> u64 {
    let mut x = v & 0x1f_ffff;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// 63 bit Morton key of a point quantized inside `bounds`
#[inline]
pub fn morton_code(point: Vec3A, bounds: &AABB) -> u64 {
    let max_cell = ((1u32 << MORTON_BITS) - 1) as f32;
    let extent = bounds.extent();
    let quantize = |axis: Axis| -> u64 {
        if extent[axis] <= 0.0 {
            return 0;
        }
        let cell = (point[axis] - bounds.min[axis]) / extent[axis] * max_cell;
        cell.clamp(0.0, max_cell) as u64
    };
    spread_bits(quantize(Axis::X)) << 2 | spread_bits(quantize(Axis::Y)) << 1 | spread_bits(quantize(Axis::Z))
}

/// Split ranges of Morton sorted primitives at the highest differing key bit
#[derive(Debug, Clone, Copy, Default)]
pub struct MortonStrategy;

impl SplitPlaneStrategy for MortonStrategy {
    fn partition(&self, prims: &mut [PrimInfo]) -> usize {
        let (Some(first), Some(last)) = (prims.first(), prims.last()) else {
            return 0;
        };

        let diff = first.code ^ last.code;
        if diff == 0 {
            return prims.len() / 2;
        }

        let bit = 63 - diff.leading_zeros();
        prims.partition_point(|p| (p.code >> bit) & 1 == 0)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::*;

    fn prim_at(id: u32, center: Vec3A) -> PrimInfo {
        PrimInfo::new(
            PrimRef::new(0, id),
            AABB::new(center - Vec3A::splat(0.1), center + Vec3A::splat(0.1)),
        )
    }

    #[test]
    fn binned_sah_separates_clusters() {
        let mut prims: Vec<PrimInfo> = (0..8)
            .map(|i| {
                let x = if i % 2 == 0 { 0.0 } else { 10.0 };
                prim_at(i, Vec3A::new(x, i as f32 * 0.01, 0.0))
            })
            .collect();

        let mid = BinnedSAHStrategy::default().partition(&mut prims);

        assert_eq!(mid, 4);
        assert!(prims[..mid].iter().all(|p| p.centroid.x < 5.0));
        assert!(prims[mid..].iter().all(|p| p.centroid.x > 5.0));
    }

    #[test]
    fn binned_sah_ties_prefer_x_axis() {
        // symmetric along x and y
        let prims = vec![
            prim_at(0, Vec3A::new(0.0, 0.0, 0.0)),
            prim_at(1, Vec3A::new(1.0, 1.0, 0.0)),
        ];
        let strategy = BinnedSAHStrategy::default();
        let plane = strategy.find_split_plane(&prims, &centroid_bounds_of(&prims));

        assert!(plane.should_split);
        assert_eq!(plane.axis, Axis::X);
        assert_eq!(plane.bin, 0);
    }

    #[test]
    fn coincident_centroids_fall_back_to_median() {
        let mut prims: Vec<PrimInfo> = (0..5).map(|i| prim_at(i, Vec3A::ONE)).collect();
        let mid = BinnedSAHStrategy::default().partition(&mut prims);
        assert_eq!(mid, 2);
    }

    #[test]
    fn spread_bits_interleaves() {
        assert_eq!(spread_bits(0b1), 0b1);
        assert_eq!(spread_bits(0b11), 0b1001);
        assert_eq!(spread_bits(0b101), 0b1000001);
    }

    #[test]
    fn morton_code_orders_axes() {
        let bounds = AABB::new(Vec3A::ZERO, Vec3A::ONE);
        let x = morton_code(Vec3A::new(1.0, 0.0, 0.0), &bounds);
        let y = morton_code(Vec3A::new(0.0, 1.0, 0.0), &bounds);
        let z = morton_code(Vec3A::new(0.0, 0.0, 1.0), &bounds);
        assert_eq!(morton_code(Vec3A::ZERO, &bounds), 0);
        assert!(x > y && y > z);
        assert_eq!(x, z << 2);
    }

    #[test]
    fn morton_partition_uses_highest_bit() {
        let mut prims: Vec<PrimInfo> = [0b000u64, 0b001, 0b011, 0b100, 0b110]
            .iter()
            .enumerate()
            .map(|(i, &code)| PrimInfo {
                code,
                ..prim_at(i as u32, Vec3A::ZERO)
            })
            .collect();

        assert_eq!(MortonStrategy.partition(&mut prims), 3);
        assert_eq!(MortonStrategy.partition(&mut prims[..3]), 2);
    }
}
