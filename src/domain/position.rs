//! Reduces a fused orientation to a scalar control position.
//!
//! Two extreme poses (forehand and backhand) span an arc. The current
//! forward direction is projected onto the chord between the extremes'
//! forward directions, giving 0 at backhand and 1 at forehand.

use crate::domain::settings::PositionSettings;
use crate::domain::smoothing::ACCEL_EPSILON;
use nalgebra::{Unit, UnitQuaternion, Vector3};

/// Center of the scalar range.
pub const CENTER: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct PositionMapper {
    forward: Vector3<f32>,
    forehand: UnitQuaternion<f32>,
    backhand: UnitQuaternion<f32>,
    dead_zone: f32,
}

impl PositionMapper {
    pub fn new(settings: &PositionSettings) -> Self {
        let forward = Vector3::from(settings.forward_axis)
            .try_normalize(ACCEL_EPSILON)
            .unwrap_or_else(Vector3::z);
        let arc_axis = Unit::try_new(Vector3::from(settings.arc_axis), ACCEL_EPSILON)
            .unwrap_or_else(Vector3::y_axis);

        Self {
            forward,
            forehand: UnitQuaternion::from_axis_angle(&arc_axis, settings.forehand_deg.to_radians()),
            backhand: UnitQuaternion::from_axis_angle(&arc_axis, settings.backhand_deg.to_radians()),
            dead_zone: settings.dead_zone.max(0.0),
        }
    }

    /// Mapper with explicit extreme poses.
    pub fn with_extremes(
        forward: Vector3<f32>,
        forehand: UnitQuaternion<f32>,
        backhand: UnitQuaternion<f32>,
        dead_zone: f32,
    ) -> Self {
        Self {
            forward: forward.try_normalize(ACCEL_EPSILON).unwrap_or_else(Vector3::z),
            forehand,
            backhand,
            dead_zone: dead_zone.max(0.0),
        }
    }

    pub fn forehand(&self) -> UnitQuaternion<f32> {
        self.forehand
    }

    pub fn backhand(&self) -> UnitQuaternion<f32> {
        self.backhand
    }

    /// Forward direction of an orientation.
    pub fn direction(&self, orientation: &UnitQuaternion<f32>) -> Vector3<f32> {
        orientation * self.forward
    }

    /// Scalar position in [0, 1], with the center dead-zone applied.
    pub fn position(&self, orientation: &UnitQuaternion<f32>) -> f32 {
        let start = self.direction(&self.backhand);
        let end = self.direction(&self.forehand);
        let chord = end - start;
        let length_squared = chord.norm_squared();
        if length_squared < ACCEL_EPSILON {
            return CENTER;
        }

        let t = (self.direction(orientation) - start).dot(&chord) / length_squared;
        if !t.is_finite() {
            return CENTER;
        }
        self.apply_dead_zone(t.clamp(0.0, 1.0))
    }

    fn apply_dead_zone(&self, t: f32) -> f32 {
        if (t - CENTER).abs() <= self.dead_zone {
            CENTER
        } else {
            t
        }
    }
}

impl Default for PositionMapper {
    fn default() -> Self {
        Self::new(&PositionSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn yaw(deg: f32) -> UnitQuaternion<f32> {
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), deg.to_radians())
    }

    #[test]
    fn test_extremes_and_center() {
        let mapper = PositionMapper::default();
        assert_relative_eq!(mapper.position(&mapper.forehand()), 1.0, epsilon = 1e-5);
        assert_relative_eq!(mapper.position(&mapper.backhand()), 0.0, epsilon = 1e-5);
        assert_eq!(mapper.position(&UnitQuaternion::identity()), 0.5);
    }

    #[test]
    fn test_beyond_extremes_is_clamped() {
        let mapper = PositionMapper::default();
        assert_eq!(mapper.position(&yaw(90.0)), 1.0);
        assert_eq!(mapper.position(&yaw(-90.0)), 0.0);
        for deg in (-180..=180).step_by(15) {
            for pitch in [-80.0f32, 0.0, 80.0] {
                let q = yaw(deg as f32)
                    * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), pitch.to_radians());
                let p = mapper.position(&q);
                assert!((0.0..=1.0).contains(&p), "{p} out of range");
            }
        }
    }

    #[test]
    fn test_dead_zone_snaps_to_center() {
        let mapper = PositionMapper::with_extremes(Vector3::z(), yaw(60.0), yaw(-60.0), 0.05);
        // 2 degrees of yaw moves the projection by well under 0.05
        assert_eq!(mapper.position(&yaw(2.0)), 0.5);
        assert_eq!(mapper.position(&yaw(-2.0)), 0.5);
        assert!(mapper.position(&yaw(20.0)) > 0.55);
    }

    #[test]
    fn test_monotonic_across_arc() {
        let mapper = PositionMapper::with_extremes(Vector3::z(), yaw(60.0), yaw(-60.0), 0.0);
        let mut last = -1.0;
        for deg in (-60..=60).step_by(10) {
            let p = mapper.position(&yaw(deg as f32));
            assert!(p > last);
            last = p;
        }
    }

    #[test]
    fn test_degenerate_extremes_return_center() {
        let mapper = PositionMapper::with_extremes(Vector3::z(), yaw(10.0), yaw(10.0), 0.0);
        assert_eq!(mapper.position(&yaw(45.0)), 0.5);
    }
}
