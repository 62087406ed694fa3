//! Ship kinematics and circle collision helpers
//!
//! [`step_ship`] is the one movement function used by both the authoritative
//! engine and the client predictor.

use super::entities::ShipPose;
use super::math::{angle_to_vec, wrap_angle, Vec2};
use super::tuning::Tunables;
use super::InputSample;

/// Advance a ship pose by one step.
///
/// Order: turn, accelerate, brake, damp, clamp to max speed, integrate,
/// clamp to world bounds (zeroing velocity on a clamped axis).
/// A non-positive or non-finite `dt` leaves the pose untouched.
pub fn step_ship(
    pose: &mut ShipPose,
    input: &InputSample,
    tunables: &Tunables,
    half_extents: Vec2,
    dt: f64,
) {
    if !(dt.is_finite() && dt > 0.0) {
        return;
    }
    let stats = pose.tier.stats();

    pose.angle = wrap_angle(pose.angle + input.turn_axis() * tunables.ship_turn_rate * dt);

    let thrust = input.thrust_axis() * tunables.ship_thrust * stats.thrust_scale;
    pose.vel += angle_to_vec(pose.angle) * (thrust * dt);

    if input.down {
        pose.vel = pose.vel * (-tunables.ship_brake * dt).exp();
    }

    pose.vel = pose.vel * (-tunables.ship_linear_damping * dt).exp();

    let speed = pose.vel.length();
    if speed > tunables.ship_max_speed {
        pose.vel = pose.vel * (tunables.ship_max_speed / speed);
    }

    pose.pos += pose.vel * dt;

    let limit_x = (half_extents.x - pose.radius).max(0.0);
    let limit_y = (half_extents.y - pose.radius).max(0.0);
    if pose.pos.x < -limit_x || pose.pos.x > limit_x {
        pose.pos.x = pose.pos.x.clamp(-limit_x, limit_x);
        pose.vel.x = 0.0;
    }
    if pose.pos.y < -limit_y || pose.pos.y > limit_y {
        pose.pos.y = pose.pos.y.clamp(-limit_y, limit_y);
        pose.vel.y = 0.0;
    }
}

/// Circle-circle overlap test
pub fn circles_overlap(a: Vec2, radius_a: f64, b: Vec2, radius_b: f64) -> bool {
    let combined = radius_a + radius_b;
    a.distance_sq(b) <= combined * combined
}

/// Contact between two overlapping circles
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    /// Unit normal from the first circle toward the second
    pub normal: Vec2,
    pub overlap: f64,
}

/// Compute the contact for two circles, or `None` if they do not touch.
/// Coincident centers get an arbitrary +x normal.
pub fn circle_contact(a: Vec2, radius_a: f64, b: Vec2, radius_b: f64) -> Option<Contact> {
    let delta = b - a;
    let dist = delta.length();
    let overlap = radius_a + radius_b - dist;
    if overlap <= 0.0 {
        return None;
    }
    let normal = if dist < 1e-6 {
        Vec2::new(1.0, 0.0)
    } else {
        delta * (1.0 / dist)
    };
    Some(Contact { normal, overlap })
}

/// Wrap a position toroidally around the world bounds
pub fn wrap_position(pos: Vec2, half_extents: Vec2) -> Vec2 {
    let wrap = |v: f64, half: f64| {
        if v < -half {
            v + 2.0 * half
        } else if v > half {
            v - 2.0 * half
        } else {
            v
        }
    };
    Vec2::new(wrap(pos.x, half_extents.x), wrap(pos.y, half_extents.y))
}

/// Whether a point is outside the bounds expanded by `margin`
pub fn outside_bounds(pos: Vec2, half_extents: Vec2, margin: f64) -> bool {
    pos.x.abs() > half_extents.x + margin || pos.y.abs() > half_extents.y + margin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tuning::ShipTier;

    fn pose() -> ShipPose {
        ShipPose::new("p1", Vec2::ZERO, 0.0, ShipTier::Small)
    }

    const HALF: Vec2 = Vec2::new(1600.0, 1000.0);

    #[test]
    fn test_thrust_accelerates_along_heading() {
        let mut p = pose();
        let input = InputSample { up: true, ..Default::default() };
        step_ship(&mut p, &input, &Tunables::default(), HALF, 1.0 / 60.0);
        assert!(p.vel.x > 0.0);
        assert!(p.vel.y.abs() < 1e-9);
        assert!(p.pos.x > 0.0);
    }

    #[test]
    fn test_max_speed_clamped() {
        let t = Tunables::default();
        let mut p = pose();
        p.vel = Vec2::new(10_000.0, 0.0);
        step_ship(&mut p, &InputSample::default(), &t, HALF, 1.0 / 60.0);
        assert!(p.vel.length() <= t.ship_max_speed + 1e-9);
    }

    #[test]
    fn test_bounds_clamp_zeroes_axis_velocity() {
        let mut p = pose();
        p.pos = Vec2::new(HALF.x - p.radius - 0.5, 0.0);
        p.vel = Vec2::new(300.0, 50.0);
        step_ship(&mut p, &InputSample::default(), &Tunables::default(), HALF, 0.1);
        assert_eq!(p.pos.x, HALF.x - p.radius);
        assert_eq!(p.vel.x, 0.0);
        assert!(p.vel.y > 0.0);
    }

    #[test]
    fn test_same_inputs_same_result() {
        let t = Tunables::default();
        let input = InputSample { up: true, right: true, ..Default::default() };
        let mut a = pose();
        let mut b = pose();
        for _ in 0..120 {
            step_ship(&mut a, &input, &t, HALF, 1.0 / 60.0);
            step_ship(&mut b, &input, &t, HALF, 1.0 / 60.0);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_dt_is_noop() {
        let mut p = pose();
        let before = p.clone();
        let input = InputSample { up: true, ..Default::default() };
        step_ship(&mut p, &input, &Tunables::default(), HALF, f64::NAN);
        step_ship(&mut p, &input, &Tunables::default(), HALF, -1.0);
        assert_eq!(p, before);
    }

    #[test]
    fn test_circle_contact() {
        let c = circle_contact(Vec2::ZERO, 10.0, Vec2::new(15.0, 0.0), 10.0).unwrap();
        assert!((c.overlap - 5.0).abs() < 1e-12);
        assert_eq!(c.normal, Vec2::new(1.0, 0.0));
        assert!(circle_contact(Vec2::ZERO, 1.0, Vec2::new(5.0, 0.0), 1.0).is_none());
    }
}
