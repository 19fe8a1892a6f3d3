//! Circle collision tests.
//!
//! Tanks, powerups and bullets are all circles. Bullets can move further than
//! a tank radius in one tick at high speed tiers, so bullet hits are tested
//! along the segment travelled during the tick rather than at the end point.

use glam::Vec2;

/// Result of checking two circles against each other.
#[derive(Debug, Clone, Copy)]
pub struct CollisionResult {
    /// Combined radius
    pub r: f32,
    /// Centre distance
    pub d: f32,
}

impl CollisionResult {
    /// Check if the circles actually overlap.
    #[inline]
    pub fn is_colliding(&self) -> bool {
        self.d < self.r
    }
}

#[inline]
pub fn check_circle_collision(a_pos: Vec2, a_radius: f32, b_pos: Vec2, b_radius: f32) -> CollisionResult {
    CollisionResult {
        r: a_radius + b_radius,
        d: a_pos.distance(b_pos),
    }
}

/// Closest point to `point` on the segment `start..end`.
#[inline]
pub fn closest_point_on_segment(start: Vec2, end: Vec2, point: Vec2) -> Vec2 {
    let seg = end - start;
    let len_sq = seg.length_squared();
    if len_sq <= f32::EPSILON {
        return start;
    }
    let t = ((point - start).dot(seg) / len_sq).clamp(0.0, 1.0);
    start + seg * t
}

/// Does a circle of `radius` moving from `start` to `end` touch the circle at
/// `center`?
#[inline]
pub fn swept_hit(start: Vec2, end: Vec2, radius: f32, center: Vec2, center_radius: f32) -> bool {
    let closest = closest_point_on_segment(start, end, center);
    closest.distance_squared(center) < (radius + center_radius).powi(2)
}
