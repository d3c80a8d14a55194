//! Gradient-descent orientation filter (Madgwick, IMU form).
//!
//! Integrates angular rate and pulls the estimate toward the attitude in
//! which the measured acceleration matches a fixed world reference
//! direction. There is no heading reference, so rotation about the
//! reference axis drifts freely.

use crate::domain::smoothing::ACCEL_EPSILON;
use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3, Vector4};

/// Gradient-descent filter state.
///
/// The quaternion maps sensor-frame vectors into the world frame.
#[derive(Debug, Clone)]
pub struct GradientDescentFilter {
    quaternion: UnitQuaternion<f32>,
    /// World direction the accelerometer is expected to read at rest
    reference: Vector3<f32>,
    /// Step size of the gradient correction
    gain: f32,
}

impl GradientDescentFilter {
    pub fn new(reference: Vector3<f32>, gain: f32) -> Self {
        Self {
            quaternion: UnitQuaternion::identity(),
            reference: reference.try_normalize(ACCEL_EPSILON).unwrap_or_else(Vector3::z),
            gain,
        }
    }

    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        self.quaternion
    }

    pub fn reset(&mut self, quaternion: UnitQuaternion<f32>) {
        self.quaternion = quaternion;
    }

    /// Advance by one sample.
    ///
    /// * `gyro` - angular rate in rad/s, sensor frame
    /// * `accel` - acceleration in any unit, sensor frame
    /// * `dt` - step in seconds
    ///
    /// A near-zero acceleration skips the step and leaves the estimate
    /// unchanged.
    pub fn update(&mut self, gyro: &Vector3<f32>, accel: &Vector3<f32>, dt: f32) {
        let Some(measured) = accel.try_normalize(ACCEL_EPSILON) else {
            return;
        };

        let q = *self.quaternion.quaternion();
        let rate_of_change = q * Quaternion::from_imag(*gyro) * 0.5;

        let gradient = self.objective_gradient(&q, &measured);
        let correction = match gradient.try_normalize(f32::EPSILON) {
            Some(step) => Quaternion::new(step[0], step[1], step[2], step[3]) * self.gain,
            None => Quaternion::new(0.0, 0.0, 0.0, 0.0),
        };

        let integrated = q + (rate_of_change - correction) * dt;
        self.quaternion = Unit::new_normalize(integrated);
    }

    /// J^T f for f(q) = q* d q - s, components ordered (w, x, y, z).
    fn objective_gradient(&self, q: &Quaternion<f32>, measured: &Vector3<f32>) -> Vector4<f32> {
        let (q1, q2, q3, q4) = (q.w, q.i, q.j, q.k);
        let (dx, dy, dz) = (self.reference.x, self.reference.y, self.reference.z);
        let (sx, sy, sz) = (measured.x, measured.y, measured.z);

        let f1 = 2.0 * dx * (0.5 - q3 * q3 - q4 * q4)
            + 2.0 * dy * (q1 * q4 + q2 * q3)
            + 2.0 * dz * (q2 * q4 - q1 * q3)
            - sx;
        let f2 = 2.0 * dx * (q2 * q3 - q1 * q4)
            + 2.0 * dy * (0.5 - q2 * q2 - q4 * q4)
            + 2.0 * dz * (q1 * q2 + q3 * q4)
            - sy;
        let f3 = 2.0 * dx * (q1 * q3 + q2 * q4)
            + 2.0 * dy * (q3 * q4 - q1 * q2)
            + 2.0 * dz * (0.5 - q2 * q2 - q3 * q3)
            - sz;

        // Jacobian rows, one per objective component
        let j1 = Vector4::new(
            2.0 * dy * q4 - 2.0 * dz * q3,
            2.0 * dy * q3 + 2.0 * dz * q4,
            -4.0 * dx * q3 + 2.0 * dy * q2 - 2.0 * dz * q1,
            -4.0 * dx * q4 + 2.0 * dy * q1 + 2.0 * dz * q2,
        );
        let j2 = Vector4::new(
            -2.0 * dx * q4 + 2.0 * dz * q2,
            2.0 * dx * q3 - 4.0 * dy * q2 + 2.0 * dz * q1,
            2.0 * dx * q2 + 2.0 * dz * q4,
            -2.0 * dx * q1 - 4.0 * dy * q4 + 2.0 * dz * q3,
        );
        let j3 = Vector4::new(
            2.0 * dx * q3 - 2.0 * dy * q2,
            2.0 * dx * q4 - 2.0 * dy * q1 - 4.0 * dz * q2,
            2.0 * dx * q1 + 2.0 * dy * q4 - 4.0 * dz * q3,
            2.0 * dx * q2 + 2.0 * dy * q3,
        );

        j1 * f1 + j2 * f2 + j3 * f3
    }
}
