//! Small 2D vector math used by both simulation sides.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: Vec2) -> f32 {
        (other - *self).length()
    }

    /// Unit vector in the same direction, or zero for a zero vector.
    pub fn normalized(&self) -> Vec2 {
        let len = self.length();
        if len > 0.0 {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::ZERO
        }
    }

    /// Heading vector for a rotation in degrees. 0 degrees points +Y,
    /// positive angles turn counter-clockwise.
    pub fn from_degrees(degrees: f32) -> Vec2 {
        let rad = degrees.to_radians();
        Vec2::new(-rad.sin(), rad.cos())
    }

    /// Inverse of [`Vec2::from_degrees`] for a non-zero vector.
    pub fn angle_degrees(&self) -> f32 {
        (-self.x).atan2(self.y).to_degrees()
    }

    pub fn clamped(&self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Vec2 {
        Vec2::new(self.x.clamp(min_x, max_x), self.y.clamp(min_y, max_y))
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_length_and_distance() {
        let v = Vec2::new(3.0, 4.0);
        assert_approx_eq!(v.length(), 5.0, 1e-6);
        assert_approx_eq!(Vec2::ZERO.distance(v), 5.0, 1e-6);
    }

    #[test]
    fn test_normalized_zero_safe() {
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);

        let unit = Vec2::new(10.0, 0.0).normalized();
        assert_approx_eq!(unit.x, 1.0, 1e-6);
        assert_approx_eq!(unit.y, 0.0, 1e-6);
    }

    #[test]
    fn test_heading_roundtrip() {
        for degrees in [0.0f32, 45.0, 90.0, 135.0, -60.0] {
            let heading = Vec2::from_degrees(degrees);
            assert_approx_eq!(heading.length(), 1.0, 1e-5);
            assert_approx_eq!(heading.angle_degrees(), degrees, 1e-3);
        }
    }

    #[test]
    fn test_zero_degrees_points_up() {
        let up = Vec2::from_degrees(0.0);
        assert_approx_eq!(up.x, 0.0, 1e-6);
        assert_approx_eq!(up.y, 1.0, 1e-6);
    }

    #[test]
    fn test_clamped() {
        let v = Vec2::new(-10.0, 700.0).clamped(0.0, 0.0, 800.0, 600.0);
        assert_eq!(v, Vec2::new(0.0, 600.0));
    }
}
