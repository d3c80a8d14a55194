//! Tracker Service
//!
//! Tick driver that coordinates link acquisition, orientation fusion and
//! position mapping for every tracked paddle. All per-source state is owned
//! here and only mutated from [`TrackerService::tick`] and the explicit
//! control calls.

use super::link::{LinkAcquisition, LinkStatus};
use super::transport::Transport;
use crate::domain::error::EngineError;
use crate::domain::imu::OrientationEngine;
use crate::domain::models::{AppEvent, MessageSeverity, SourceId, StatusMessage};
use crate::domain::position::PositionMapper;
use crate::domain::settings::Settings;
use nalgebra::UnitQuaternion;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct TrackerService<T: Transport> {
    /// One slot per source; removed sources leave `None` so ids stay dense
    links: Vec<Option<LinkAcquisition<T>>>,
    engine: OrientationEngine,
    mapper: PositionMapper,
    event_rx: mpsc::UnboundedReceiver<AppEvent>,
    last_messages: Vec<Option<StatusMessage>>,
}

impl<T: Transport> TrackerService<T> {
    /// One source per transport, numbered in order.
    pub fn new(settings: &Settings, transports: impl IntoIterator<Item = T>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let links: Vec<_> = transports
            .into_iter()
            .enumerate()
            .map(|(index, transport)| {
                Some(LinkAcquisition::new(
                    SourceId(index),
                    transport,
                    settings.link.clone(),
                    event_tx.clone(),
                ))
            })
            .collect();
        let last_messages = vec![None; links.len()];

        Self {
            links,
            engine: OrientationEngine::new(settings.fusion.clone()),
            mapper: PositionMapper::new(&settings.position),
            event_rx,
            last_messages,
        }
    }

    /// Begin acquisition on every source.
    pub fn start(&mut self, now: Instant) {
        info!("Starting {} source(s)", self.source_ids().count());
        for link in self.links.iter_mut().flatten() {
            link.start(now);
        }
    }

    /// Advance every link, then feed what they produced into the engine.
    /// Returns the number of samples fused.
    pub fn tick(&mut self, now: Instant) -> usize {
        for link in self.links.iter_mut().flatten() {
            link.tick(now);
        }
        self.process_events(now)
    }

    fn process_events(&mut self, now: Instant) -> usize {
        let mut fused = 0;
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                AppEvent::Sample(sample) => {
                    // Late samples from a removed source are dropped
                    if self.link(sample.source).is_some() && self.engine.ingest(&sample, now).is_some() {
                        fused += 1;
                    }
                }
                AppEvent::SubscriptionConfirmed(source) => {
                    debug!(%source, "Data flowing");
                }
                AppEvent::LogMessage(source, message) => {
                    if message.severity == MessageSeverity::Error {
                        warn!(%source, "Link gave up: {}", message.message);
                    }
                    if let Some(slot) = self.last_messages.get_mut(source.index()) {
                        *slot = Some(message);
                    }
                }
            }
        }
        fused
    }

    /// Manual restart: full teardown and a fresh retry budget.
    pub fn restart(&mut self, source: SourceId, now: Instant) -> Result<(), EngineError> {
        let link = self.link_mut(source).ok_or(EngineError::UnknownSource(source))?;
        link.start(now);
        Ok(())
    }

    /// Start a timed calibration window on a source that is holding still.
    pub fn calibrate(&mut self, source: SourceId, now: Instant) -> Result<(), EngineError> {
        if self.link(source).is_none() {
            return Err(EngineError::UnknownSource(source));
        }
        if !self.engine.has_data(source) {
            return Err(EngineError::NotReady);
        }
        self.engine.request_calibration(source, now)
    }

    /// Stop tracking a source and discard all its state.
    pub fn remove_source(&mut self, source: SourceId) {
        if let Some(slot) = self.links.get_mut(source.index()) {
            if let Some(mut link) = slot.take() {
                link.shutdown();
                info!(%source, "Source removed");
            }
        }
        self.engine.remove_source(source);
        if let Some(slot) = self.last_messages.get_mut(source.index()) {
            *slot = None;
        }
    }

    /// Quiesce every transport.
    pub fn shutdown(&mut self) {
        for link in self.links.iter_mut().flatten() {
            link.shutdown();
        }
        // Anything still queued belongs to links that no longer exist
        while self.event_rx.try_recv().is_ok() {}
        info!("Tracker shut down");
    }

    pub fn source_ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, link)| link.is_some())
            .map(|(index, _)| SourceId(index))
    }

    /// Confirmed stream and fused orientation available.
    pub fn has_valid_data(&self, source: SourceId) -> bool {
        self.link(source).is_some_and(|link| link.is_confirmed()) && self.engine.has_data(source)
    }

    pub fn orientation(&self, source: SourceId) -> Option<UnitQuaternion<f32>> {
        self.link(source)?;
        self.engine.orientation(source)
    }

    /// Scalar control position in [0, 1].
    pub fn position(&self, source: SourceId) -> Option<f32> {
        self.orientation(source)
            .map(|orientation| self.mapper.position(&orientation))
    }

    pub fn status(&self, source: SourceId) -> Option<LinkStatus> {
        self.link(source).map(LinkAcquisition::status)
    }

    /// Most recent user-facing message from a source's link.
    pub fn last_message(&self, source: SourceId) -> Option<&StatusMessage> {
        self.last_messages.get(source.index())?.as_ref()
    }

    pub fn engine(&self) -> &OrientationEngine {
        &self.engine
    }

    pub fn link(&self, source: SourceId) -> Option<&LinkAcquisition<T>> {
        self.links.get(source.index())?.as_ref()
    }

    pub fn link_mut(&mut self, source: SourceId) -> Option<&mut LinkAcquisition<T>> {
        self.links.get_mut(source.index())?.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::link::LinkPhase;
    use crate::infrastructure::bluetooth::protocol::encode_frame;
    use crate::infrastructure::bluetooth::simulated::SimulatedTransport;
    use crate::infrastructure::bluetooth::transport::DeviceAdvert;
    use nalgebra::Vector3;
    use std::time::Duration;

    const STEP: Duration = Duration::from_millis(20);

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.link.scan_timeout_ms = 1_000;
        settings
    }

    fn paddle(settings: &Settings, device_id: &str) -> SimulatedTransport {
        SimulatedTransport::new()
            .with_advertisers([DeviceAdvert::new(device_id, "IMU-Paddle")])
            .with_services([settings.link.service_uuid.clone()])
            .with_characteristics([settings.link.characteristic_uuid.clone()])
    }

    fn frame(gyro_y: f32) -> Vec<u8> {
        encode_frame(&Vector3::new(0.0, -1.0, 0.0), &Vector3::new(0.0, gyro_y, 0.0))
    }

    /// Service with the given device ids, ticked until every link is subscribed.
    fn connected(device_ids: &[&str], t0: Instant) -> TrackerService<SimulatedTransport> {
        let settings = settings();
        let transports: Vec<_> = device_ids.iter().map(|id| paddle(&settings, id)).collect();
        let mut service = TrackerService::new(&settings, transports);
        service.start(t0);
        for _ in 0..3 {
            service.tick(t0);
        }
        for source in service.source_ids().collect::<Vec<_>>() {
            assert_eq!(service.status(source).unwrap().phase, LinkPhase::Subscribed);
        }
        service
    }

    fn push(service: &mut TrackerService<SimulatedTransport>, source: SourceId, bytes: Vec<u8>) {
        let device_id = service.status(source).unwrap().device_id.unwrap();
        service
            .link_mut(source)
            .unwrap()
            .transport_mut()
            .push_frame(&device_id, bytes);
    }

    #[test]
    fn test_first_sample_yields_centered_position() {
        let t0 = Instant::now();
        let mut service = connected(&["dev-0"], t0);
        let source = SourceId(0);
        assert!(!service.has_valid_data(source));
        assert_eq!(service.position(source), None);

        push(&mut service, source, frame(0.0));
        assert_eq!(service.tick(t0 + STEP), 1);

        assert!(service.has_valid_data(source));
        assert_eq!(service.position(source), Some(0.5));
        let message = service.last_message(source).unwrap();
        assert_eq!(message.severity, MessageSeverity::Success);
    }

    #[test]
    fn test_swing_moves_position_toward_forehand() {
        let t0 = Instant::now();
        let mut service = connected(&["dev-0"], t0);
        let source = SourceId(0);
        let mut now = t0;

        push(&mut service, source, frame(0.0));
        now += STEP;
        service.tick(now);

        // 90 deg/s for half a second
        for _ in 0..25 {
            push(&mut service, source, frame(90.0));
            now += STEP;
            service.tick(now);
        }
        let forehand = service.position(source).unwrap();
        assert!(forehand > 0.6, "position {forehand}");

        for _ in 0..50 {
            push(&mut service, source, frame(-90.0));
            now += STEP;
            service.tick(now);
        }
        let backhand = service.position(source).unwrap();
        assert!(backhand < 0.4, "position {backhand}");
    }

    #[test]
    fn test_sources_are_independent() {
        let t0 = Instant::now();
        let mut service = connected(&["dev-0", "dev-1"], t0);

        push(&mut service, SourceId(1), frame(0.0));
        service.tick(t0 + STEP);

        assert!(!service.has_valid_data(SourceId(0)));
        assert!(service.has_valid_data(SourceId(1)));
        assert_eq!(service.engine().sources().collect::<Vec<_>>(), vec![SourceId(1)]);
    }

    #[test]
    fn test_remove_source_discards_state() {
        let t0 = Instant::now();
        let mut service = connected(&["dev-0", "dev-1"], t0);
        push(&mut service, SourceId(0), frame(0.0));
        service.tick(t0 + STEP);
        assert!(service.has_valid_data(SourceId(0)));

        service.remove_source(SourceId(0));
        assert!(!service.has_valid_data(SourceId(0)));
        assert!(service.status(SourceId(0)).is_none());
        assert!(service.position(SourceId(0)).is_none());
        assert!(service.last_message(SourceId(0)).is_none());
        assert_eq!(service.source_ids().collect::<Vec<_>>(), vec![SourceId(1)]);
        assert_eq!(
            service.restart(SourceId(0), t0),
            Err(EngineError::UnknownSource(SourceId(0)))
        );
    }

    #[test]
    fn test_calibrate_requires_data() {
        let t0 = Instant::now();
        let mut service = connected(&["dev-0"], t0);
        assert_eq!(service.calibrate(SourceId(0), t0), Err(EngineError::NotReady));
        assert_eq!(
            service.calibrate(SourceId(7), t0),
            Err(EngineError::UnknownSource(SourceId(7)))
        );

        // A freshly initialised source has not proven stability yet
        push(&mut service, SourceId(0), frame(0.0));
        service.tick(t0 + STEP);
        assert_eq!(service.calibrate(SourceId(0), t0 + STEP), Err(EngineError::NotStable));
    }

    #[test]
    fn test_restart_after_exhaustion() {
        let settings = settings();
        let mut service = TrackerService::new(&settings, [SimulatedTransport::new()]);
        let source = SourceId(0);
        let t0 = Instant::now();
        service.start(t0);
        for k in 1..=3 {
            service.tick(t0 + Duration::from_secs(k));
        }

        let status = service.status(source).unwrap();
        assert_eq!(status.phase, LinkPhase::Error);
        assert_eq!(service.last_message(source).unwrap().severity, MessageSeverity::Error);

        service.restart(source, t0 + Duration::from_secs(4)).unwrap();
        let status = service.status(source).unwrap();
        assert_eq!(status.phase, LinkPhase::ScanningDevices);
        assert_eq!(status.retries, 0);
    }

    #[test]
    fn test_shutdown_quits_every_transport() {
        let t0 = Instant::now();
        let mut service = connected(&["dev-0", "dev-1"], t0);
        push(&mut service, SourceId(0), frame(0.0));

        service.shutdown();
        for source in [SourceId(0), SourceId(1)] {
            let link = service.link(source).unwrap();
            assert_eq!(link.phase(), LinkPhase::Idle);
            assert_eq!(link.transport().calls().quits, 1);
            assert_eq!(link.transport().pending_frames(), 0);
        }
        assert_eq!(service.tick(t0 + STEP), 0);
    }
}
