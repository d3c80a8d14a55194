//! Rotation helpers shared by the orientation engine: gravity alignment,
//! shortest-path blending and an adaptive low-pass stage.

use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};
use std::f32::consts::PI;

/// Accelerometer magnitudes below this are treated as "no reading".
pub const ACCEL_EPSILON: f32 = 1e-6;

/// World direction that measured gravity is aligned onto.
pub fn canonical_down() -> Vector3<f32> {
    Vector3::new(0.0, -1.0, 0.0)
}

/// Rotation mapping the measured (normalized) acceleration onto
/// [`canonical_down`]. `None` when the reading is too small to normalize.
pub fn gravity_alignment(accel: &Vector3<f32>) -> Option<UnitQuaternion<f32>> {
    let norm = accel.norm();
    if norm < ACCEL_EPSILON {
        return None;
    }
    let measured = accel / norm;
    let down = canonical_down();

    // rotation_between has no unique answer for opposite vectors
    Some(
        UnitQuaternion::rotation_between(&measured, &down)
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI)),
    )
}

/// Normalized linear interpolation along the shortest rotational path.
pub fn nlerp_shortest(
    from: &UnitQuaternion<f32>,
    to: &UnitQuaternion<f32>,
    t: f32,
) -> UnitQuaternion<f32> {
    let t = t.clamp(0.0, 1.0);
    let a = *from.quaternion();
    let mut b = *to.quaternion();
    if a.coords.dot(&b.coords) < 0.0 {
        b = -b;
    }
    let mixed: Quaternion<f32> = a * (1.0 - t) + b * t;
    if mixed.norm() < ACCEL_EPSILON {
        return *to;
    }
    Unit::new_normalize(mixed)
}

/// Fraction of the remaining distance covered by an exponential ease in
/// `elapsed` seconds.
pub fn ease_factor(rate: f32, elapsed: f32) -> f32 {
    if elapsed <= 0.0 || rate <= 0.0 {
        return 0.0;
    }
    1.0 - (-rate * elapsed).exp()
}

/// Low-pass filter on rotations whose cutoff rises with angular rate:
/// heavy smoothing at rest, little lag during fast swings.
#[derive(Debug, Clone)]
pub struct AdaptiveLowPass {
    min_cutoff_hz: f32,
    beta: f32,
    state: Option<UnitQuaternion<f32>>,
}

impl AdaptiveLowPass {
    pub fn new(min_cutoff_hz: f32, beta: f32) -> Self {
        Self {
            min_cutoff_hz: min_cutoff_hz.max(f32::EPSILON),
            beta: beta.max(0.0),
            state: None,
        }
    }

    pub fn reset(&mut self, rotation: UnitQuaternion<f32>) {
        self.state = Some(rotation);
    }

    /// Smoothing weight for a given angular rate (rad/s) and step (s).
    pub fn alpha(&self, rate: f32, dt: f32) -> f32 {
        let cutoff = self.min_cutoff_hz + self.beta * rate.abs();
        let tau = 1.0 / (2.0 * PI * cutoff);
        1.0 / (1.0 + tau / dt.max(f32::EPSILON))
    }

    pub fn apply(&mut self, input: UnitQuaternion<f32>, rate: f32, dt: f32) -> UnitQuaternion<f32> {
        let next = match self.state {
            Some(prev) => nlerp_shortest(&prev, &input, self.alpha(rate, dt)),
            None => input,
        };
        self.state = Some(next);
        next
    }
}
