use std::str::FromStr;

use crate::{
    Bvh4, Bvh4Error, BuildMode, BuildSettings, CpuFeatures, GeometryType, IntersectorRegistry,
    Intersectors, Ray, RayPacket, Result, Scene, TraversalMode, TriangleSource,
    VirtualGeometrySource,
};

/// Everything needed to assemble an accelerator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccelConfig {
    pub build_mode: BuildMode,
    pub traversal_mode: TraversalMode,
    pub build: BuildSettings,
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Bvh4Error::configuration(key, value))
}

impl AccelConfig {
    /// Config from a construction mode name and a traversal mode name
    pub fn from_names(builder: &str, traverser: &str) -> Result<Self> {
        Ok(Self {
            build_mode: BuildMode::parse(builder)?,
            traversal_mode: TraversalMode::parse(traverser)?,
            build: BuildSettings::default(),
        })
    }

    /// Comma separated `key=value` pairs, e.g. `"builder=morton,traverser=chunk,leaf_size=2"`.
    /// Keys not given keep their defaults.
    pub fn parse(config: &str) -> Result<Self> {
        let mut out = Self::default();

        for pair in config.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Bvh4Error::configuration("setting", pair))?;
            let value = value.trim();

            match key.trim() {
                "builder" => out.build_mode = BuildMode::parse(value)?,
                "traverser" => out.traversal_mode = TraversalMode::parse(value)?,
                "leaf_size" => out.build.max_leaf_size = parse_value("leaf_size", value)?,
                "max_depth" => out.build.max_depth = parse_value("max_depth", value)?,
                "bins" => out.build.bins = parse_value("bins", value)?,
                "threads_threshold" => {
                    out.build.parallel_threshold = parse_value("threads_threshold", value)?
                }
                "presplit_factor" => {
                    out.build.presplit_area_factor = parse_value("presplit_factor", value)?
                }
                "presplit_budget" => {
                    out.build.presplit_budget = parse_value("presplit_budget", value)?
                }
                "presplit_splits" => {
                    out.build.presplit_max_splits = parse_value("presplit_splits", value)?
                }
                "reopt_size" => out.build.morton_reopt_size = parse_value("reopt_size", value)?,
                "memory_limit" => {
                    out.build.memory_limit = Some(parse_value("memory_limit", value)?)
                }
                key => return Err(Bvh4Error::configuration("setting", key)),
            }
        }

        out.build.validate()?;
        Ok(out)
    }
}

impl FromStr for AccelConfig {
    type Err = Bvh4Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A built accelerator bundled with its scene and the kernels that query it.
///
/// Queries take `&self`, so an instance can be shared between threads once built.
#[derive(Debug)]
pub struct AccelInstance {
    scene: Scene,
    bvh: Bvh4,
    intersectors: Intersectors,
    build_mode: BuildMode,
}

/// Parse the configuration, pick the kernels and build the accelerator.
/// Configuration and CPU errors are reported before any build work.
#[tracing::instrument(skip_all, fields(builder = %config.build_mode, traverser = %config.traversal_mode))]
pub fn create_accel(
    scene: &Scene,
    config: &AccelConfig,
    features: CpuFeatures,
    registry: &IntersectorRegistry,
) -> Result<AccelInstance> {
    config.build.validate()?;
    let geometry_type = config.build_mode.geometry_type();
    let intersectors = registry.select(geometry_type, features, config.traversal_mode)?;

    let builder = config.build_mode.builder(&config.build);
    let mut bvh = Bvh4::new(geometry_type);
    match geometry_type {
        GeometryType::Triangle1 => {
            let triangles = scene.triangles().read();
            builder.build(&TriangleSource::new(&triangles), &mut bvh)?;
        }
        GeometryType::VirtualGeometry => {
            builder.build(&VirtualGeometrySource::new(scene.geometries()), &mut bvh)?;
        }
    }

    Ok(AccelInstance {
        scene: scene.clone(),
        bvh,
        intersectors,
        build_mode: config.build_mode,
    })
}

impl AccelInstance {
    /// Nearest hit, written into `ray`
    #[inline]
    pub fn intersect(&self, ray: &mut Ray) {
        (self.intersectors.single)(&self.bvh, &self.scene, ray)
    }

    /// True if anything lies inside the ray range
    #[inline]
    pub fn occluded(&self, ray: &Ray) -> bool {
        (self.intersectors.occluded)(&self.bvh, &self.scene, ray)
    }

    /// Nearest hit for every valid lane
    #[inline]
    pub fn intersect_packet(&self, packet: &mut RayPacket) {
        (self.intersectors.packet)(&self.bvh, &self.scene, packet)
    }

    pub fn sah(&self) -> f32 {
        self.bvh.sah()
    }

    pub fn bvh(&self) -> &Bvh4 {
        &self.bvh
    }

    pub fn intersectors(&self) -> &Intersectors {
        &self.intersectors
    }

    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Release the accelerator storage.
    ///
    /// ```
    /// use bvh4::*;
    ///
    /// let accel = create_accel(
    ///     &Scene::default(),
    ///     &AccelConfig::default(),
    ///     CpuFeatures::detect(),
    ///     &IntersectorRegistry::with_default_kernels(),
    /// )
    /// .unwrap();
    /// accel.destroy();
    /// ```
    ///
    /// The instance is consumed, so it can neither be queried nor destroyed
    /// again afterwards:
    ///
    /// ```compile_fail,E0382
    /// use bvh4::*;
    ///
    /// let accel = create_accel(
    ///     &Scene::default(),
    ///     &AccelConfig::default(),
    ///     CpuFeatures::detect(),
    ///     &IntersectorRegistry::with_default_kernels(),
    /// )
    /// .unwrap();
    /// accel.destroy();
    /// accel.destroy();
    /// ```
    ///
    /// ```compile_fail,E0382
    /// use bvh4::*;
    ///
    /// let accel = create_accel(
    ///     &Scene::default(),
    ///     &AccelConfig::default(),
    ///     CpuFeatures::detect(),
    ///     &IntersectorRegistry::with_default_kernels(),
    /// )
    /// .unwrap();
    /// accel.destroy();
    /// let _ = accel.sah();
    /// ```
    pub fn destroy(self) {
        tracing::debug!(
            nodes = self.bvh.storage().nodes().len(),
            leaf_refs = self.bvh.storage().prims().len(),
            "accelerator destroyed"
        );
    }
}
