//! Arena geometry and angle helpers.

use glam::Vec2;
use rand::Rng;
use std::f32::consts::{PI, TAU};

use crate::config::ArenaConfig;

/// The rectangular playfield `[0, width] x [0, height]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    pub width: f32,
    pub height: f32,
}

impl Arena {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn from_config(config: &ArenaConfig) -> Self {
        Self::new(config.width, config.height)
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.size() * 0.5
    }

    /// Clamp a point so a circle of `radius` stays inside the arena.
    #[inline]
    pub fn clamp(&self, position: Vec2, radius: f32) -> Vec2 {
        let r = radius.min(self.width * 0.5).min(self.height * 0.5).max(0.0);
        Vec2::new(
            position.x.clamp(r, self.width - r),
            position.y.clamp(r, self.height - r),
        )
    }

    #[inline]
    pub fn contains(&self, position: Vec2) -> bool {
        position.x >= 0.0 && position.x <= self.width && position.y >= 0.0 && position.y <= self.height
    }

    /// Uniform random point with at least `margin` clearance from the edges.
    pub fn random_position<R: Rng + ?Sized>(&self, rng: &mut R, margin: f32) -> Vec2 {
        let mx = margin.min(self.width * 0.5).max(0.0);
        let my = margin.min(self.height * 0.5).max(0.0);
        let x = if self.width - mx > mx {
            rng.random_range(mx..self.width - mx)
        } else {
            self.width * 0.5
        };
        let y = if self.height - my > my {
            rng.random_range(my..self.height - my)
        } else {
            self.height * 0.5
        };
        Vec2::new(x, y)
    }
}

/// Unit vector pointing along `angle` (radians, 0 = +x).
#[inline]
pub fn direction(angle: f32) -> Vec2 {
    Vec2::from_angle(angle)
}

/// Angle of a vector in radians, in `(-PI, PI]`.
#[inline]
pub fn angle_of(v: Vec2) -> f32 {
    v.y.atan2(v.x)
}

/// Normalize an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle.rem_euclid(TAU);
    if a > PI {
        a -= TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_clamp_keeps_radius_inside() {
        let arena = Arena::new(100.0, 50.0);
        assert_eq!(arena.clamp(Vec2::new(-10.0, 60.0), 5.0), Vec2::new(5.0, 45.0));
        assert_eq!(arena.clamp(Vec2::new(30.0, 20.0), 5.0), Vec2::new(30.0, 20.0));
    }

    #[test]
    fn test_random_position_respects_margin() {
        let arena = Arena::new(200.0, 100.0);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let p = arena.random_position(&mut rng, 20.0);
            assert!(p.x >= 20.0 && p.x <= 180.0);
            assert!(p.y >= 20.0 && p.y <= 80.0);
        }
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(-0.5) + 0.5).abs() < 1e-6);
        assert!(wrap_angle(7.0).abs() <= PI);
    }
}
