pub mod error;
pub use error::*;

pub mod axis;
pub use axis::*;

pub mod triangle;
pub use triangle::*;

pub mod ray;
pub use ray::*;

pub mod aabb;
pub use aabb::*;

pub mod intersections;
pub use intersections::*;

pub mod scene;
pub use scene::*;

pub mod node;
pub use node::*;

pub mod bvh;
pub use bvh::*;

pub mod bvh_strategy;
pub use bvh_strategy::*;

pub mod builders;
pub use builders::*;

pub mod cpu;
pub use cpu::*;

pub mod kernels;
pub use kernels::*;

pub mod registry;
pub use registry::*;

pub mod accel;
pub use accel::*;
