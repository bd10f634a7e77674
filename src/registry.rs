use std::fmt;

use strum::{Display, EnumIter, EnumString};

use crate::{
    intersect1, intersect16_chunk, intersect16_hybrid, intersect16_single, occluded1, Bvh4,
    Bvh4Error, CpuFeatures, GeometryType, LeafIntersector, NodeIntersector, Ray, RayPacket,
    Result, ScalarNodes, Scene, Simd4Nodes, Triangle1Leaves, VirtualGeometryLeaves,
};

/// Nearest hit query for one ray
pub type SingleRayKernel = fn(&Bvh4, &Scene, &mut Ray);

/// Any hit query for one ray
pub type OcclusionKernel = fn(&Bvh4, &Scene, &Ray) -> bool;

/// Nearest hit query for a 16 ray packet
pub type PacketKernel = fn(&Bvh4, &Scene, &mut RayPacket);

/// How packets are traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum TraversalMode {
    /// Same as `Hybrid`
    #[default]
    Default,
    Hybrid,
    Chunk,
    Single,
}

impl TraversalMode {
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Bvh4Error::configuration("traversal mode", name))
    }
}

/// Packet kernels of one registry entry, one per algorithm
#[derive(Clone, Copy)]
pub struct PacketKernels {
    pub chunk: PacketKernel,
    pub single: PacketKernel,
    pub hybrid: PacketKernel,
}

/// Kernels for one geometry type on one instruction set
#[derive(Clone)]
pub struct KernelEntry {
    pub name: &'static str,
    pub geometry_type: GeometryType,
    pub requires: CpuFeatures,
    pub single: SingleRayKernel,
    pub occluded: OcclusionKernel,
    pub packet: PacketKernels,
}

impl KernelEntry {
    /// Entry whose kernels all use the given node and leaf tests
    pub fn with<N, L>(
        name: &'static str,
        geometry_type: GeometryType,
        requires: CpuFeatures,
    ) -> Self
    where
        N: NodeIntersector,
        L: LeafIntersector,
    {
        Self {
            name,
            geometry_type,
            requires,
            single: intersect1::<N, L>,
            occluded: occluded1::<N, L>,
            packet: PacketKernels {
                chunk: intersect16_chunk::<N, L>,
                single: intersect16_single::<N, L>,
                hybrid: intersect16_hybrid::<N, L>,
            },
        }
    }
}

impl fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelEntry")
            .field("name", &self.name)
            .field("geometry_type", &self.geometry_type)
            .field("requires", &self.requires)
            .finish()
    }
}

/// The kernels an accelerator instance queries with
#[derive(Clone, Copy)]
pub struct Intersectors {
    pub name: &'static str,
    pub packet_algorithm: TraversalMode,
    pub single: SingleRayKernel,
    pub occluded: OcclusionKernel,
    pub packet: PacketKernel,
}

impl fmt::Debug for Intersectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intersectors")
            .field("name", &self.name)
            .field("packet_algorithm", &self.packet_algorithm)
            .finish()
    }
}

/// Kernel table in preference order
#[derive(Debug, Clone, Default)]
pub struct IntersectorRegistry {
    entries: Vec<KernelEntry>,
}

impl IntersectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries registered first are preferred
    pub fn register(&mut self, entry: KernelEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[KernelEntry] {
        &self.entries
    }

    /// 4-wide kernels where the target has them, then the scalar fallback
    pub fn with_default_kernels() -> Self {
        let mut registry = Self::new();
        registry
            .register_simd::<Triangle1Leaves>(GeometryType::Triangle1)
            .register_simd::<VirtualGeometryLeaves>(GeometryType::VirtualGeometry)
            .register(KernelEntry::with::<ScalarNodes, Triangle1Leaves>(
                "scalar",
                GeometryType::Triangle1,
                CpuFeatures::empty(),
            ))
            .register(KernelEntry::with::<ScalarNodes, VirtualGeometryLeaves>(
                "scalar",
                GeometryType::VirtualGeometry,
                CpuFeatures::empty(),
            ));
        registry
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    fn register_simd<L: LeafIntersector>(&mut self, geometry_type: GeometryType) -> &mut Self {
        self.register(KernelEntry::with::<Simd4Nodes, L>(
            "simd4-sse2",
            geometry_type,
            CpuFeatures::SSE2,
        ))
    }

    #[cfg(target_arch = "aarch64")]
    fn register_simd<L: LeafIntersector>(&mut self, geometry_type: GeometryType) -> &mut Self {
        self.register(KernelEntry::with::<Simd4Nodes, L>(
            "simd4-neon",
            geometry_type,
            CpuFeatures::NEON,
        ))
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    fn register_simd<L: LeafIntersector>(&mut self, _geometry_type: GeometryType) -> &mut Self {
        self
    }

    /// First entry for the geometry type that runs on `features`, with the
    /// packet kernel picked by `mode`
    pub fn select(
        &self,
        geometry_type: GeometryType,
        features: CpuFeatures,
        mode: TraversalMode,
    ) -> Result<Intersectors> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.geometry_type == geometry_type && features.contains(e.requires))
            .ok_or_else(|| Bvh4Error::UnsupportedCpu {
                geometry: geometry_type.to_string(),
                features: features.to_string(),
            })?;

        let packet_algorithm = match mode {
            TraversalMode::Default | TraversalMode::Hybrid => TraversalMode::Hybrid,
            mode => mode,
        };
        let packet = match packet_algorithm {
            TraversalMode::Chunk => entry.packet.chunk,
            TraversalMode::Single => entry.packet.single,
            _ => entry.packet.hybrid,
        };

        tracing::debug!(
            kernel = entry.name,
            %geometry_type,
            %features,
            packet = %packet_algorithm,
            "selected intersectors"
        );

        Ok(Intersectors {
            name: entry.name,
            packet_algorithm,
            single: entry.single,
            occluded: entry.occluded,
            packet,
        })
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use crate::*;

    #[test]
    fn mode_names() {
        assert_eq!(TraversalMode::parse("default"), Ok(TraversalMode::Default));
        assert_eq!(TraversalMode::parse("chunk"), Ok(TraversalMode::Chunk));
        assert!(matches!(
            TraversalMode::parse("zigzag"),
            Err(Bvh4Error::Configuration { .. })
        ));
        for mode in TraversalMode::iter() {
            assert_eq!(TraversalMode::parse(&mode.to_string()), Ok(mode));
        }
    }

    #[test]
    fn default_is_hybrid() {
        let registry = IntersectorRegistry::with_default_kernels();
        let selected = registry
            .select(GeometryType::Triangle1, CpuFeatures::empty(), TraversalMode::Default)
            .unwrap();
        assert_eq!(selected.packet_algorithm, TraversalMode::Hybrid);
        assert_eq!(selected.name, "scalar");
    }

    #[test]
    fn best_supported_entry_wins() {
        let registry = IntersectorRegistry::with_default_kernels();
        let features = CpuFeatures::SSE2 | CpuFeatures::NEON;
        let selected = registry
            .select(GeometryType::VirtualGeometry, features, TraversalMode::Chunk)
            .unwrap();
        if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
            assert_eq!(selected.name, "simd4-sse2");
        } else if cfg!(target_arch = "aarch64") {
            assert_eq!(selected.name, "simd4-neon");
        }
    }

    #[test]
    fn modes_pick_different_packet_kernels() {
        let registry = IntersectorRegistry::with_default_kernels();
        let pick = |mode| {
            registry
                .select(GeometryType::Triangle1, CpuFeatures::detect(), mode)
                .unwrap()
        };
        let chunk = pick(TraversalMode::Chunk);
        let single = pick(TraversalMode::Single);
        let hybrid = pick(TraversalMode::Hybrid);

        assert_eq!(chunk.name, single.name);
        assert_ne!(chunk.packet as usize, single.packet as usize);
        assert_ne!(chunk.packet as usize, hybrid.packet as usize);
        assert_ne!(single.packet as usize, hybrid.packet as usize);
        assert_eq!(chunk.single as usize, single.single as usize);
    }

    #[test]
    fn no_entry_is_unsupported_cpu() {
        let mut registry = IntersectorRegistry::new();
        registry.register(KernelEntry::with::<Simd4Nodes, Triangle1Leaves>(
            "avx2-only",
            GeometryType::Triangle1,
            CpuFeatures::AVX2,
        ));

        let err = registry
            .select(GeometryType::Triangle1, CpuFeatures::SSE2, TraversalMode::Default)
            .unwrap_err();
        assert!(matches!(err, Bvh4Error::UnsupportedCpu { .. }));

        let err = registry
            .select(GeometryType::VirtualGeometry, CpuFeatures::AVX2, TraversalMode::Default)
            .unwrap_err();
        assert!(matches!(err, Bvh4Error::UnsupportedCpu { .. }));
    }
}
