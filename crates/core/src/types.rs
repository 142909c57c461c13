//! Auxiliary value types
//!
//! The host engine's math/string library is an external collaborator, so
//! the tree only needs small plain-data stand-ins with stable layouts and
//! tolerance-aware comparison where floats are involved.

use serde::{Deserialize, Serialize};

/// Absolute tolerance for "equal enough" float comparison. Values closer
/// than this are indistinguishable for change detection.
pub const FLOAT_EPSILON: f64 = 1e-4;
pub const FLOAT_EPSILON_F32: f32 = 1e-4;

pub fn nearly_equal_f64(a: f64, b: f64) -> bool {
    (a - b).abs() <= FLOAT_EPSILON
}

pub fn nearly_equal_f32(a: f32, b: f32) -> bool {
    (a - b).abs() <= FLOAT_EPSILON_F32
}

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color { r, g, b, a }
    }
}

/// Absolute time as a raw tick count; the host defines the epoch and the
/// tick length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateTime {
    pub ticks: i64,
}

impl DateTime {
    pub fn from_ticks(ticks: i64) -> Self {
        DateTime { ticks }
    }
}

/// Path of a class asset, e.g. `/Game/Items/Potion.Potion_C`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassPath(pub String);

/// Path of an object asset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectPath(pub String);

/// 3-axis rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl Rotator {
    pub fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Rotator { pitch, yaw, roll }
    }

    pub fn nearly_equals(&self, other: &Rotator) -> bool {
        nearly_equal_f64(self.pitch, other.pitch)
            && nearly_equal_f64(self.yaw, other.yaw)
            && nearly_equal_f64(self.roll, other.roll)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn nearly_equals(&self, other: &Vec2) -> bool {
        nearly_equal_f64(self.x, other.x) && nearly_equal_f64(self.y, other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    pub fn nearly_equals(&self, other: &Vec3) -> bool {
        nearly_equal_f64(self.x, other.x)
            && nearly_equal_f64(self.y, other.y)
            && nearly_equal_f64(self.z, other.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntVec2 {
    pub x: i32,
    pub y: i32,
}

impl IntVec2 {
    pub fn new(x: i32, y: i32) -> Self {
        IntVec2 { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntVec3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl IntVec3 {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        IntVec3 { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Int64Vec2 {
    pub x: i64,
    pub y: i64,
}

impl Int64Vec2 {
    pub fn new(x: i64, y: i64) -> Self {
        Int64Vec2 { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Int64Vec3 {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Int64Vec3 {
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Int64Vec3 { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_boundary() {
        assert!(nearly_equal_f64(1.0, 1.0 + 0.5e-4));
        assert!(!nearly_equal_f64(1.0, 1.0 + 2e-4));
        assert!(nearly_equal_f32(1.0, 1.00005));
    }

    #[test]
    fn rotator_tolerant_compare() {
        let a = Rotator::new(0.0, 90.0, 0.0);
        let b = Rotator::new(0.0, 90.00005, 0.0);
        assert!(a.nearly_equals(&b));
        assert_ne!(a, b);
    }
}
