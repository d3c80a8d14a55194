//! Orientation Engine
//!
//! Fuses accelerometer and gyroscope samples into a drift-corrected
//! orientation, independently per source.
//!
//! Each sample goes through:
//! 1. stability detection (and gyro bias tracking while still),
//! 2. either an automatic re-alignment to gravity, or integration of a pure
//!    gyro estimate and a gradient-descent estimate, blended and smoothed,
//! 3. composition with the neutral pose and an exponential ease toward the
//!    published orientation.

use crate::domain::error::EngineError;
use crate::domain::madgwick::GradientDescentFilter;
use crate::domain::models::{ImuSample, SourceId};
use crate::domain::settings::FusionSettings;
use crate::domain::smoothing::{
    canonical_down, ease_factor, gravity_alignment, nlerp_shortest, AdaptiveLowPass,
};
use nalgebra::{UnitQuaternion, Vector3};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-source rotation state.
#[derive(Debug, Clone)]
struct SourceState {
    started_at: Instant,
    last_sample_at: Instant,
    /// EMA of the sample interval, seconds
    smoothed_dt: f32,

    // Stability bookkeeping
    last_accel: Vector3<f32>,
    stable: bool,
    stable_since: Option<Instant>,
    last_realign_at: Instant,
    gyro_bias: Vector3<f32>,

    // Rotations
    gyro_rotation: UnitQuaternion<f32>,
    filter: GradientDescentFilter,
    low_pass: AdaptiveLowPass,
    drift: UnitQuaternion<f32>,
    working: UnitQuaternion<f32>,
    neutral: UnitQuaternion<f32>,
    output: UnitQuaternion<f32>,

    /// Deadline of a running manual calibration
    calibration_deadline: Option<Instant>,
    realignments: u32,
}

impl SourceState {
    /// First sample: align to gravity and make that pose neutral.
    fn initialise(sample: &ImuSample, now: Instant, settings: &FusionSettings) -> Option<Self> {
        let alignment = gravity_alignment(&sample.accel)?;

        let mut filter = GradientDescentFilter::new(canonical_down(), settings.filter_gain);
        filter.reset(alignment);
        let mut low_pass =
            AdaptiveLowPass::new(settings.low_pass_min_cutoff_hz, settings.low_pass_beta);
        low_pass.reset(alignment);

        Some(Self {
            started_at: now,
            last_sample_at: now,
            smoothed_dt: settings.nominal_dt,
            last_accel: sample.accel,
            stable: false,
            stable_since: None,
            last_realign_at: now,
            gyro_bias: Vector3::zeros(),
            gyro_rotation: alignment,
            filter,
            low_pass,
            drift: UnitQuaternion::identity(),
            working: alignment,
            neutral: alignment.inverse(),
            output: UnitQuaternion::identity(),
            calibration_deadline: None,
            realignments: 0,
        })
    }

    fn update(&mut self, sample: &ImuSample, now: Instant, settings: &FusionSettings) {
        let elapsed = now.saturating_duration_since(self.last_sample_at).as_secs_f32();
        self.last_sample_at = now;
        // A stall must not poison the average for the samples that follow it.
        let measured = elapsed.max(settings.min_dt).min(settings.max_dt);
        self.smoothed_dt += settings.dt_smoothing * (measured - self.smoothed_dt);
        let dt = self.smoothed_dt.max(settings.min_dt).min(settings.max_dt);

        self.track_stability(sample, now, settings);

        if self.should_realign(now, settings) {
            self.realign(&sample.accel, now);
        } else {
            self.integrate(sample, dt, settings);
        }

        self.advance_calibration(now);

        let target = self.neutral * self.working;
        self.output = nlerp_shortest(
            &self.output,
            &target,
            ease_factor(settings.output_ease_rate, elapsed),
        );
    }

    fn track_stability(&mut self, sample: &ImuSample, now: Instant, settings: &FusionSettings) {
        let accel_change = (sample.accel - self.last_accel).norm();
        let rate = sample.gyro.norm();
        self.last_accel = sample.accel;

        let stable = accel_change < settings.accel_stability_threshold
            && rate < settings.gyro_stability_threshold;

        if stable && !self.stable {
            self.stable_since = Some(now);
        } else if !stable {
            self.stable_since = None;
        }
        self.stable = stable;

        if stable {
            self.gyro_bias += (sample.gyro - self.gyro_bias) * settings.bias_smoothing;
        }
    }

    fn should_realign(&self, now: Instant, settings: &FusionSettings) -> bool {
        let Some(stable_since) = self.stable_since else {
            return false;
        };
        now.saturating_duration_since(self.started_at) >= secs(settings.warmup_secs)
            && now.saturating_duration_since(stable_since) >= secs(settings.min_stable_secs)
            && now.saturating_duration_since(self.last_realign_at)
                >= secs(settings.realign_cooldown_secs)
    }

    /// Throw away accumulated drift by re-deriving everything from gravity.
    fn realign(&mut self, accel: &Vector3<f32>, now: Instant) {
        let Some(alignment) = gravity_alignment(accel) else {
            return;
        };
        self.neutral = alignment.inverse();
        self.gyro_rotation = alignment;
        self.filter.reset(alignment);
        self.low_pass.reset(alignment);
        self.drift = UnitQuaternion::identity();
        self.working = alignment;
        self.last_realign_at = now;
        self.realignments += 1;
        debug!(count = self.realignments, "Auto-realigned to gravity");
    }

    fn integrate(&mut self, sample: &ImuSample, dt: f32, settings: &FusionSettings) {
        let corrected = if self.stable {
            sample.gyro - self.gyro_bias
        } else {
            sample.gyro
        };
        let omega = corrected.map(f32::to_radians);

        self.gyro_rotation *= UnitQuaternion::from_scaled_axis(omega * dt);
        self.gyro_rotation.renormalize();

        self.filter.update(&omega, &sample.accel, dt);

        let blended = nlerp_shortest(
            &self.filter.quaternion(),
            &self.gyro_rotation,
            settings.gyro_blend,
        );
        let smoothed = if settings.low_pass_enabled {
            self.low_pass.apply(blended, omega.norm(), dt)
        } else {
            blended
        };

        if self.stable {
            let target = self.gyro_rotation * smoothed.inverse();
            self.drift = nlerp_shortest(&self.drift, &target, settings.drift_adapt_rate * dt);
        }

        self.working = self.drift * smoothed;
        self.working.renormalize();
    }

    fn advance_calibration(&mut self, now: Instant) {
        let Some(deadline) = self.calibration_deadline else {
            return;
        };
        if !self.stable {
            self.calibration_deadline = None;
            warn!("Calibration cancelled: source moved");
        } else if now >= deadline {
            self.neutral = self.working.inverse();
            self.calibration_deadline = None;
            info!("Calibration complete, neutral pose updated");
        }
    }
}

fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Orientation engine for all tracked sources.
///
/// Sources are kept in a dense table indexed by [`SourceId`].
pub struct OrientationEngine {
    settings: FusionSettings,
    sources: Vec<Option<SourceState>>,
}

impl OrientationEngine {
    pub fn new(settings: FusionSettings) -> Self {
        Self {
            settings,
            sources: Vec::new(),
        }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Feed one sample. Returns the published orientation of its source, or
    /// `None` if the source could not be initialised from this sample.
    pub fn ingest(&mut self, sample: &ImuSample, now: Instant) -> Option<UnitQuaternion<f32>> {
        let index = sample.source.index();
        if index >= self.sources.len() {
            self.sources.resize_with(index + 1, || None);
        }

        if let Some(state) = self.sources[index].as_mut() {
            state.update(sample, now, &self.settings);
            return Some(state.output);
        }

        let state = SourceState::initialise(sample, now, &self.settings)?;
        info!(source = %sample.source, "Orientation initialised from gravity");
        let output = state.output;
        self.sources[index] = Some(state);
        Some(output)
    }

    /// Start a timed calibration window. The source must be holding still.
    pub fn request_calibration(&mut self, source: SourceId, now: Instant) -> Result<(), EngineError> {
        let window = secs(self.settings.calibration_secs);
        let state = self.state_mut(source)?;
        if !state.stable {
            return Err(EngineError::NotStable);
        }
        let deadline = now
            .checked_add(window)
            .ok_or(EngineError::WindowOutOfRange(window))?;
        state.calibration_deadline = Some(deadline);
        info!(%source, "Calibration started - keep controller still");
        Ok(())
    }

    pub fn remove_source(&mut self, source: SourceId) {
        if let Some(slot) = self.sources.get_mut(source.index()) {
            if slot.take().is_some() {
                info!(%source, "Orientation state removed");
            }
        }
    }

    /// Ids of all sources with live state.
    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| SourceId(i))
    }

    pub fn has_data(&self, source: SourceId) -> bool {
        self.state(source).is_ok()
    }

    /// Published (neutral-relative, eased) orientation.
    pub fn orientation(&self, source: SourceId) -> Option<UnitQuaternion<f32>> {
        self.state(source).ok().map(|s| s.output)
    }

    pub fn working_rotation(&self, source: SourceId) -> Option<UnitQuaternion<f32>> {
        self.state(source).ok().map(|s| s.working)
    }

    pub fn gyro_rotation(&self, source: SourceId) -> Option<UnitQuaternion<f32>> {
        self.state(source).ok().map(|s| s.gyro_rotation)
    }

    pub fn neutral(&self, source: SourceId) -> Option<UnitQuaternion<f32>> {
        self.state(source).ok().map(|s| s.neutral)
    }

    pub fn is_stable(&self, source: SourceId) -> bool {
        self.state(source).map(|s| s.stable).unwrap_or(false)
    }

    pub fn is_calibrating(&self, source: SourceId) -> bool {
        self.state(source)
            .map(|s| s.calibration_deadline.is_some())
            .unwrap_or(false)
    }

    pub fn realignment_count(&self, source: SourceId) -> u32 {
        self.state(source).map(|s| s.realignments).unwrap_or(0)
    }

    pub fn gyro_bias(&self, source: SourceId) -> Option<Vector3<f32>> {
        self.state(source).ok().map(|s| s.gyro_bias)
    }

    fn state(&self, source: SourceId) -> Result<&SourceState, EngineError> {
        self.sources
            .get(source.index())
            .and_then(Option::as_ref)
            .ok_or(EngineError::UnknownSource(source))
    }

    fn state_mut(&mut self, source: SourceId) -> Result<&mut SourceState, EngineError> {
        self.sources
            .get_mut(source.index())
            .and_then(Option::as_mut)
            .ok_or(EngineError::UnknownSource(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const STEP: Duration = Duration::from_millis(20);

    fn sample(accel: Vector3<f32>, gyro: Vector3<f32>) -> ImuSample {
        ImuSample {
            source: SourceId(0),
            accel,
            gyro,
        }
    }

    fn at_rest(accel: Vector3<f32>) -> ImuSample {
        sample(accel, Vector3::zeros())
    }

    fn settings() -> FusionSettings {
        FusionSettings {
            warmup_secs: 0.5,
            min_stable_secs: 1.0,
            realign_cooldown_secs: 3.0,
            ..FusionSettings::default()
        }
    }

    /// Feed `count` copies of `s` at 50 Hz, returning the time of the last one.
    fn feed(engine: &mut OrientationEngine, s: &ImuSample, start: Instant, count: u32) -> Instant {
        let mut now = start;
        for _ in 0..count {
            now += STEP;
            engine.ingest(s, now);
        }
        now
    }

    #[test]
    fn test_first_sample_aligns_to_gravity() {
        let mut engine = OrientationEngine::new(settings());
        let accel = Vector3::new(0.2, -0.9, 0.3);
        let t0 = Instant::now();

        let out = engine.ingest(&at_rest(accel), t0).unwrap();
        assert_eq!(out, UnitQuaternion::identity());
        assert!(engine.has_data(SourceId(0)));

        let alignment = gravity_alignment(&accel).unwrap();
        let neutral = engine.neutral(SourceId(0)).unwrap();
        assert!(neutral.angle_to(&alignment.inverse()) < 2e-3);
        assert_relative_eq!(
            engine.working_rotation(SourceId(0)).unwrap() * accel.normalize(),
            canonical_down(),
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_zero_accel_does_not_initialise() {
        let mut engine = OrientationEngine::new(settings());
        assert!(engine.ingest(&at_rest(Vector3::zeros()), Instant::now()).is_none());
        assert!(!engine.has_data(SourceId(0)));
    }

    #[test]
    fn test_unknown_source() {
        let mut engine = OrientationEngine::new(settings());
        assert_eq!(
            engine.request_calibration(SourceId(3), Instant::now()),
            Err(EngineError::UnknownSource(SourceId(3)))
        );
        assert!(engine.orientation(SourceId(3)).is_none());
    }

    #[test]
    fn test_realign_waits_for_stability_and_cooldown() {
        let mut engine = OrientationEngine::new(settings());
        let rest = at_rest(Vector3::new(0.0, -1.0, 0.0));
        let t0 = Instant::now();
        engine.ingest(&rest, t0);

        // Stable from the second sample on, but the cooldown counts from
        // the initial alignment at t0: 3 s = 150 samples.
        let now = feed(&mut engine, &rest, t0, 149);
        assert!(engine.is_stable(SourceId(0)));
        assert_eq!(engine.realignment_count(SourceId(0)), 0);

        feed(&mut engine, &rest, now, 1);
        assert_eq!(engine.realignment_count(SourceId(0)), 1);
    }

    #[test]
    fn test_motion_prevents_realign() {
        let mut engine = OrientationEngine::new(settings());
        let t0 = Instant::now();
        engine.ingest(&at_rest(Vector3::new(0.0, -1.0, 0.0)), t0);

        let mut now = t0;
        for k in 0..400 {
            now += STEP;
            // Stillness never lasts 1 s: every 40th sample jolts the source.
            let gyro = if k % 40 == 0 {
                Vector3::new(0.0, 50.0, 0.0)
            } else {
                Vector3::zeros()
            };
            engine.ingest(&sample(Vector3::new(0.0, -1.0, 0.0), gyro), now);
        }
        assert_eq!(engine.realignment_count(SourceId(0)), 0);
    }

    #[test]
    fn test_realign_resets_neutral_to_current_gravity() {
        let mut engine = OrientationEngine::new(settings());
        let t0 = Instant::now();
        engine.ingest(&at_rest(Vector3::new(0.0, -1.0, 0.0)), t0);

        // Tilt: a movement sample, then hold still in the new pose.
        let tilted = Vector3::new(0.5, -0.8, 0.2);
        let mut now = t0 + STEP;
        engine.ingest(&sample(tilted, Vector3::new(30.0, 0.0, 0.0)), now);
        now = feed(&mut engine, &at_rest(tilted), now, 200);
        assert_eq!(engine.realignment_count(SourceId(0)), 1);

        let expected = gravity_alignment(&tilted).unwrap().inverse();
        let neutral = engine.neutral(SourceId(0)).unwrap();
        assert!(neutral.angle_to(&expected) < 2e-3);

        // Output eases back to identity once re-zeroed.
        feed(&mut engine, &at_rest(tilted), now, 50);
        assert!(engine.orientation(SourceId(0)).unwrap().angle() < 1e-2);
    }

    #[test]
    fn test_gyro_integration_tracks_rotation() {
        let mut engine = OrientationEngine::new(FusionSettings {
            realign_cooldown_secs: 1_000.0,
            ..settings()
        });
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        engine.ingest(&at_rest(down), t0);
        let start = engine.gyro_rotation(SourceId(0)).unwrap();

        // 90 deg/s about the gravity axis for one second
        feed(&mut engine, &sample(down, Vector3::new(0.0, 90.0, 0.0)), t0, 50);
        let end = engine.gyro_rotation(SourceId(0)).unwrap();
        assert_relative_eq!(start.angle_to(&end), 90f32.to_radians(), epsilon = 0.02);
    }

    #[test]
    fn test_rotations_stay_unit_under_motion() {
        let mut engine = OrientationEngine::new(settings());
        let mut now = Instant::now();
        for k in 0..5_000 {
            let t = k as f32 * 0.02;
            let accel = Vector3::new(0.3 * t.sin(), -1.0 + 0.4 * (0.5 * t).cos(), 0.2 * t.cos());
            let gyro = Vector3::new(120.0 * t.sin(), 200.0 * (0.3 * t).cos(), -80.0 * t.sin());
            now += STEP;
            engine.ingest(&sample(accel, gyro), now);

            let id = SourceId(0);
            for q in [
                engine.orientation(id).unwrap(),
                engine.working_rotation(id).unwrap(),
                engine.gyro_rotation(id).unwrap(),
            ] {
                assert_relative_eq!(q.quaternion().norm(), 1.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_timing_glitch_is_clamped() {
        let mut engine = OrientationEngine::new(FusionSettings {
            realign_cooldown_secs: 1_000.0,
            low_pass_enabled: false,
            ..settings()
        });
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        engine.ingest(&at_rest(down), t0);
        let start = engine.gyro_rotation(SourceId(0)).unwrap();

        // One sample after a 10 s stall at 100 deg/s: max_dt bounds the step.
        let s = sample(down, Vector3::new(0.0, 100.0, 0.0));
        engine.ingest(&s, t0 + Duration::from_secs(10));
        let end = engine.gyro_rotation(SourceId(0)).unwrap();
        assert!(start.angle_to(&end) <= 100f32.to_radians() * 0.1 + 1e-3);
    }

    #[test]
    fn test_stall_does_not_inflate_following_steps() {
        let mut engine = OrientationEngine::new(FusionSettings {
            realign_cooldown_secs: 1_000.0,
            low_pass_enabled: false,
            ..settings()
        });
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        engine.ingest(&at_rest(down), t0);

        let resumed = t0 + Duration::from_secs(10);
        engine.ingest(&at_rest(down), resumed);
        let start = engine.gyro_rotation(SourceId(0)).unwrap();

        // 0.4 s at 90 deg/s is 36 degrees of real rotation.
        feed(&mut engine, &sample(down, Vector3::new(0.0, 90.0, 0.0)), resumed, 20);
        let end = engine.gyro_rotation(SourceId(0)).unwrap();
        assert_relative_eq!(start.angle_to(&end), 36f32.to_radians(), epsilon = 8f32.to_radians());
    }

    #[test]
    fn test_oversized_calibration_window_is_rejected() {
        let mut engine = OrientationEngine::new(FusionSettings {
            calibration_secs: 1e30,
            ..settings()
        });
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        engine.ingest(&at_rest(down), t0);
        let now = feed(&mut engine, &at_rest(down), t0, 3);

        assert_eq!(
            engine.request_calibration(SourceId(0), now),
            Err(EngineError::WindowOutOfRange(Duration::MAX))
        );
        assert!(!engine.is_calibrating(SourceId(0)));
        feed(&mut engine, &at_rest(down), now, 3);
        assert!(engine.has_data(SourceId(0)));
    }

    #[test]
    fn test_warmup_outlasts_cooldown() {
        let mut engine = OrientationEngine::new(FusionSettings {
            warmup_secs: 5.0,
            min_stable_secs: 0.5,
            realign_cooldown_secs: 1.0,
            ..FusionSettings::default()
        });
        let rest = at_rest(Vector3::new(0.0, -1.0, 0.0));
        let t0 = Instant::now();
        engine.ingest(&rest, t0);

        let now = feed(&mut engine, &rest, t0, 249);
        assert_eq!(engine.realignment_count(SourceId(0)), 0);

        feed(&mut engine, &rest, now, 1);
        assert_eq!(engine.realignment_count(SourceId(0)), 1);
    }

    #[test]
    fn test_drift_adapts_only_while_stable() {
        let fusion = |drift_adapt_rate| FusionSettings {
            realign_cooldown_secs: 1_000.0,
            drift_adapt_rate,
            ..settings()
        };
        let mut adapting = OrientationEngine::new(fusion(2.0));
        let mut fixed = OrientationEngine::new(fusion(0.0));
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        adapting.ingest(&at_rest(down), t0);
        fixed.ingest(&at_rest(down), t0);

        let swing = sample(down, Vector3::new(0.0, 20.0, 0.0));
        let swung = feed(&mut adapting, &swing, t0, 50);
        feed(&mut fixed, &swing, t0, 50);
        let a = adapting.working_rotation(SourceId(0)).unwrap();
        let b = fixed.working_rotation(SourceId(0)).unwrap();
        assert_relative_eq!(a.quaternion().coords, b.quaternion().coords, epsilon = 1e-6);

        // Gravity shifts with no rotation. Only the filter follows it, and
        // drift compensation pulls the working rotation back to the gyro path.
        let tilted = at_rest(Vector3::new(0.5, -0.8, 0.2));
        feed(&mut adapting, &tilted, swung, 1_500);
        feed(&mut fixed, &tilted, swung, 1_500);

        let id = SourceId(0);
        let gap = |engine: &OrientationEngine| {
            let working = engine.working_rotation(id).unwrap();
            working.angle_to(&engine.gyro_rotation(id).unwrap())
        };
        assert!(gap(&fixed) > 0.1);
        assert!(gap(&adapting) < 0.05);
    }

    #[test]
    fn test_low_pass_lags_then_settles() {
        let fusion = |low_pass_enabled| FusionSettings {
            realign_cooldown_secs: 1_000.0,
            low_pass_enabled,
            ..settings()
        };
        let mut filtered = OrientationEngine::new(fusion(true));
        let mut raw = OrientationEngine::new(fusion(false));
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        filtered.ingest(&at_rest(down), t0);
        raw.ingest(&at_rest(down), t0);

        let swing = sample(down, Vector3::new(0.0, 90.0, 0.0));
        let now = feed(&mut filtered, &swing, t0, 10);
        feed(&mut raw, &swing, t0, 10);

        let id = SourceId(0);
        let lagging = filtered.working_rotation(id).unwrap().angle();
        let leading = raw.working_rotation(id).unwrap().angle();
        assert!(lagging + 0.01 < leading);

        feed(&mut filtered, &at_rest(down), now, 100);
        feed(&mut raw, &at_rest(down), now, 100);
        let settled = filtered.working_rotation(id).unwrap();
        assert!(settled.angle_to(&raw.working_rotation(id).unwrap()) < 1e-2);
    }

    #[test]
    fn test_stable_samples_estimate_bias() {
        let mut engine = OrientationEngine::new(FusionSettings {
            realign_cooldown_secs: 1_000.0,
            ..settings()
        });
        let s = sample(Vector3::new(0.0, -1.0, 0.0), Vector3::new(0.5, -1.0, 0.25));
        let t0 = Instant::now();
        engine.ingest(&s, t0);
        feed(&mut engine, &s, t0, 1_000);

        let bias = engine.gyro_bias(SourceId(0)).unwrap();
        assert_relative_eq!(bias, Vector3::new(0.5, -1.0, 0.25), epsilon = 1e-3);
    }

    #[test]
    fn test_manual_calibration() {
        let mut engine = OrientationEngine::new(FusionSettings {
            realign_cooldown_secs: 1_000.0,
            calibration_secs: 0.5,
            ..settings()
        });
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        engine.ingest(&at_rest(down), t0);

        // Swing a quarter turn, then settle.
        let now = feed(&mut engine, &sample(down, Vector3::new(0.0, 90.0, 0.0)), t0, 50);
        let moving = now;
        assert_eq!(
            engine.request_calibration(SourceId(0), moving),
            Err(EngineError::NotStable)
        );

        let now = feed(&mut engine, &at_rest(down), now, 5);
        engine.request_calibration(SourceId(0), now).unwrap();
        assert!(engine.is_calibrating(SourceId(0)));

        let now = feed(&mut engine, &at_rest(down), now, 30);
        assert!(!engine.is_calibrating(SourceId(0)));
        let working = engine.working_rotation(SourceId(0)).unwrap();
        let neutral = engine.neutral(SourceId(0)).unwrap();
        assert!((neutral * working).angle() < 1e-2);

        feed(&mut engine, &at_rest(down), now, 50);
        assert!(engine.orientation(SourceId(0)).unwrap().angle() < 2e-2);
    }

    #[test]
    fn test_calibration_cancelled_by_motion() {
        let mut engine = OrientationEngine::new(settings());
        let down = Vector3::new(0.0, -1.0, 0.0);
        let t0 = Instant::now();
        engine.ingest(&at_rest(down), t0);
        let now = feed(&mut engine, &at_rest(down), t0, 3);
        engine.request_calibration(SourceId(0), now).unwrap();

        feed(&mut engine, &sample(down, Vector3::new(40.0, 0.0, 0.0)), now, 1);
        assert!(!engine.is_calibrating(SourceId(0)));
    }

    #[test]
    fn test_sources_are_independent_and_removable() {
        let mut engine = OrientationEngine::new(settings());
        let now = Instant::now();
        let mut second = at_rest(Vector3::new(1.0, 0.0, 0.0));
        second.source = SourceId(2);

        engine.ingest(&at_rest(Vector3::new(0.0, -1.0, 0.0)), now);
        engine.ingest(&second, now);
        assert_eq!(engine.sources().collect::<Vec<_>>(), vec![SourceId(0), SourceId(2)]);
        assert!(!engine.has_data(SourceId(1)));

        engine.remove_source(SourceId(0));
        assert!(!engine.has_data(SourceId(0)));
        assert!(engine.has_data(SourceId(2)));
    }
}
