extern crate glam;

use std::ops::{Index, IndexMut};

use strum::EnumIter;

/// 3D Axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    /// Axis with the largest component, x wins ties over y, y over z
    #[inline]
    pub fn largest(v: glam::Vec3A) -> Axis {
        let mut axis = Axis::X;
        if v.y > v.x {
            axis = Axis::Y;
        }
        if v.z > v[axis] {
            axis = Axis::Z;
        }
        axis
    }
}

impl Index<Axis> for glam::Vec3A {
    type Output = f32;

    fn index(&self, axis: Axis) -> &Self::Output {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl IndexMut<Axis> for glam::Vec3A {
    fn index_mut(&mut self, axis: Axis) -> &mut Self::Output {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::Axis;

    #[test]
    fn largest_axis_prefers_lower_on_ties() {
        assert_eq!(Axis::largest(Vec3A::new(1.0, 1.0, 1.0)), Axis::X);
        assert_eq!(Axis::largest(Vec3A::new(0.0, 2.0, 2.0)), Axis::Y);
        assert_eq!(Axis::largest(Vec3A::new(0.0, 1.0, 2.0)), Axis::Z);
    }
}
