//! Link Acquisition
//!
//! Drives one peripheral from nothing to a confirmed data stream:
//! device scan, service discovery, characteristic discovery, subscribe,
//! then supervision of the live feed. Everything happens inside [`tick`],
//! which never blocks; timeouts are deadlines compared against the `now`
//! passed in.
//!
//! [`tick`]: LinkAcquisition::tick

use super::protocol;
use super::transport::{is_benign_error, DataPacket, ScanPoll, SubscribeAck, Transport};
use crate::domain::error::{FrameError, LinkError};
use crate::domain::models::{AppEvent, MessageSeverity, RawFrame, SourceId, StatusMessage};
use crate::domain::settings::LinkSettings;
use crate::domain::uuid;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    ScanningDevices,
    ScanningServices,
    ScanningCharacteristics,
    Subscribed,
    /// Retries exhausted; only a manual restart leaves this phase
    Error,
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ScanningDevices => "scanning devices",
            Self::ScanningServices => "scanning services",
            Self::ScanningCharacteristics => "scanning characteristics",
            Self::Subscribed => "subscribed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of a link for display and diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub phase: LinkPhase,
    pub device_id: Option<String>,
    /// Consecutive failed attempts
    pub retries: u32,
    pub max_retries: u32,
    /// A valid sample arrived since the last subscribe
    pub confirmed: bool,
    pub last_error: Option<LinkError>,
    pub samples: u64,
    pub malformed_frames: u64,
}

impl LinkStatus {
    pub fn is_streaming(&self) -> bool {
        self.phase == LinkPhase::Subscribed && self.confirmed
    }

    /// Status line for the user
    pub fn describe(&self) -> String {
        let device = self.device_id.as_deref().unwrap_or("device");
        match self.phase {
            LinkPhase::Idle => "Idle".to_string(),
            LinkPhase::ScanningDevices => format!(
                "Scanning for devices (attempt {}/{})",
                self.retries + 1,
                self.max_retries
            ),
            LinkPhase::ScanningServices => format!("Discovering services on {device}"),
            LinkPhase::ScanningCharacteristics => match &self.last_error {
                Some(err @ LinkError::SubscriptionFailed(_)) => format!("{err}, waiting for restart"),
                _ => format!("Discovering characteristics on {device}"),
            },
            LinkPhase::Subscribed if self.confirmed => {
                format!("Streaming from {device} ({} samples)", self.samples)
            }
            LinkPhase::Subscribed => format!("Subscribed to {device}, waiting for data"),
            LinkPhase::Error => match &self.last_error {
                Some(err) => format!("Error: {err}"),
                None => "Error".to_string(),
            },
        }
    }
}

/// State of the current attempt; reset on every (re)start.
#[derive(Debug, Default)]
struct LinkState {
    device_id: Option<String>,
    service_id: Option<String>,
    deadline: Option<Instant>,
    subscribe_rejected: bool,
    subscribed_at: Option<Instant>,
    last_sample_at: Option<Instant>,
    confirmed: bool,
}

pub struct LinkAcquisition<T: Transport> {
    source: SourceId,
    transport: T,
    settings: LinkSettings,
    phase: LinkPhase,
    state: LinkState,
    retries: u32,
    last_error: Option<LinkError>,
    /// Last side-channel message surfaced, for deduplication
    last_transport_error: Option<String>,
    samples: u64,
    malformed_frames: u64,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl<T: Transport> LinkAcquisition<T> {
    pub fn new(
        source: SourceId,
        transport: T,
        settings: LinkSettings,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            source,
            transport,
            settings,
            phase: LinkPhase::Idle,
            state: LinkState::default(),
            retries: 0,
            last_error: None,
            last_transport_error: None,
            samples: 0,
            malformed_frames: 0,
            event_sender,
        }
    }

    /// Start, or manually restart, acquisition. Clears the retry counter.
    pub fn start(&mut self, now: Instant) {
        if self.phase != LinkPhase::Idle {
            self.teardown();
        }
        info!(source = %self.source, "Starting link acquisition");
        self.retries = 0;
        self.last_error = None;
        self.last_transport_error = None;
        self.begin_scan(now);
    }

    /// Advance the state machine, draining everything the transport has.
    pub fn tick(&mut self, now: Instant) {
        if matches!(self.phase, LinkPhase::Idle | LinkPhase::Error) {
            return;
        }
        if self.poll_transport_error(now) {
            return;
        }

        match self.phase {
            LinkPhase::ScanningDevices => self.poll_devices(now),
            LinkPhase::ScanningServices => self.poll_services(now),
            LinkPhase::ScanningCharacteristics => self.poll_characteristics(now),
            LinkPhase::Subscribed => self.poll_data(now),
            LinkPhase::Idle | LinkPhase::Error => {}
        }
    }

    /// Quiesce the transport and go idle.
    pub fn shutdown(&mut self) {
        if self.phase == LinkPhase::Idle {
            return;
        }
        self.teardown();
        info!(source = %self.source, "Link shut down");
        self.report(MessageSeverity::Info, "Disconnected");
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            phase: self.phase,
            device_id: self.state.device_id.clone(),
            retries: self.retries,
            max_retries: self.max_retries(),
            confirmed: self.state.confirmed,
            last_error: self.last_error.clone(),
            samples: self.samples,
            malformed_frames: self.malformed_frames,
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_confirmed(&self) -> bool {
        self.phase == LinkPhase::Subscribed && self.state.confirmed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn max_retries(&self) -> u32 {
        self.settings.max_scan_retries.max(1)
    }

    fn deadline_passed(&self, now: Instant) -> bool {
        self.state.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// `None` when the timeout is too large for the clock: wait indefinitely.
    fn fresh_deadline(&self, now: Instant) -> Option<Instant> {
        now.checked_add(self.settings.scan_timeout())
    }

    fn begin_scan(&mut self, now: Instant) {
        self.state = LinkState {
            deadline: self.fresh_deadline(now),
            ..LinkState::default()
        };
        self.phase = LinkPhase::ScanningDevices;
        self.transport.start_device_scan();
        debug!(
            source = %self.source,
            attempt = self.retries + 1,
            max = self.max_retries(),
            "Scanning for devices"
        );
    }

    fn poll_devices(&mut self, now: Instant) {
        while let ScanPoll::Available(advert) = self.transport.poll_device() {
            if self.settings.device_names.iter().any(|name| *name == advert.name) {
                info!(source = %self.source, "Found {} ({})", advert.name, advert.id);
                self.transport.stop_device_scan();
                self.report(MessageSeverity::Info, format!("Found {}", advert.name));
                self.transport.scan_services(&advert.id);
                self.state.device_id = Some(advert.id);
                self.state.deadline = self.fresh_deadline(now);
                self.phase = LinkPhase::ScanningServices;
                return;
            }
            trace!(source = %self.source, "Ignoring device {:?}", advert.name);
        }

        if self.deadline_passed(now) {
            self.fail_attempt(now, LinkError::ScanTimeout(self.settings.scan_timeout()));
        }
    }

    fn poll_services(&mut self, now: Instant) {
        loop {
            match self.transport.poll_service() {
                ScanPoll::Available(service) if uuid::same_id(&service, &self.settings.service_uuid) => {
                    let Some(device_id) = self.state.device_id.clone() else {
                        self.fail_attempt(now, LinkError::ServiceNotFound);
                        return;
                    };
                    info!(source = %self.source, "Found service {}", service);
                    self.transport.scan_characteristics(&device_id, &service);
                    self.state.service_id = Some(service);
                    self.state.deadline = self.fresh_deadline(now);
                    self.phase = LinkPhase::ScanningCharacteristics;
                    return;
                }
                ScanPoll::Available(service) => {
                    trace!(source = %self.source, "Skipping service {}", service);
                }
                ScanPoll::Finished => {
                    self.fail_attempt(now, LinkError::ServiceNotFound);
                    return;
                }
                ScanPoll::Pending => break,
            }
        }

        if self.deadline_passed(now) {
            self.fail_attempt(now, LinkError::ServiceNotFound);
        }
    }

    fn poll_characteristics(&mut self, now: Instant) {
        // After an explicit rejection nothing more is requested until the
        // deadline or a manual restart
        while !self.state.subscribe_rejected {
            match self.transport.poll_characteristic() {
                ScanPoll::Available(characteristic)
                    if uuid::same_id(&characteristic, &self.settings.characteristic_uuid) =>
                {
                    if self.subscribe(&characteristic, now) {
                        return;
                    }
                }
                ScanPoll::Available(characteristic) => {
                    trace!(source = %self.source, "Skipping characteristic {}", characteristic);
                }
                ScanPoll::Finished => {
                    self.fail_attempt(now, LinkError::CharacteristicNotFound);
                    return;
                }
                ScanPoll::Pending => break,
            }
        }

        if self.deadline_passed(now) {
            let reason = match &self.last_error {
                Some(err @ LinkError::SubscriptionFailed(_)) if self.state.subscribe_rejected => {
                    err.clone()
                }
                _ => LinkError::CharacteristicNotFound,
            };
            self.fail_attempt(now, reason);
        }
    }

    /// Request notifications; `true` when the link moved to `Subscribed`.
    fn subscribe(&mut self, characteristic: &str, now: Instant) -> bool {
        let (Some(device_id), Some(service_id)) =
            (self.state.device_id.clone(), self.state.service_id.clone())
        else {
            return false;
        };

        info!(source = %self.source, "Enabling notifications on {}", characteristic);
        let accepted = self
            .transport
            .subscribe_characteristic(&device_id, &service_id, characteristic, true);
        let message = self.transport.get_error();
        if !is_benign_error(&message) {
            // Consumed here, so the side channel does not surface it again
            self.last_transport_error = Some(message.trim().to_string());
        }

        match SubscribeAck::classify(accepted, &message) {
            SubscribeAck::Acknowledged => {
                info!(source = %self.source, "Notifications enabled");
            }
            SubscribeAck::Ambiguous => {
                info!(source = %self.source, "{}", LinkError::SubscriptionAmbiguous);
            }
            SubscribeAck::Rejected(reason) => {
                let err = LinkError::SubscriptionFailed(reason);
                warn!(source = %self.source, "{}", err);
                self.report(MessageSeverity::Warning, err.to_string());
                self.last_error = Some(err);
                self.state.subscribe_rejected = true;
                return false;
            }
        }

        self.phase = LinkPhase::Subscribed;
        self.state.deadline = None;
        self.state.subscribed_at = Some(now);
        self.state.last_sample_at = None;
        self.state.confirmed = false;
        self.report(MessageSeverity::Info, "Subscribed, waiting for data");
        true
    }

    fn poll_data(&mut self, now: Instant) {
        while let Some(packet) = self.transport.poll_data() {
            self.handle_packet(packet, now);
        }

        let silence = self.settings.packet_silence_timeout();
        let last_activity = self
            .state
            .last_sample_at
            .or(self.state.subscribed_at)
            .unwrap_or(now);
        if now.saturating_duration_since(last_activity) > silence {
            self.restart_after_silence(now, silence);
        }
    }

    fn handle_packet(&mut self, packet: DataPacket, now: Instant) {
        if self.state.device_id.as_deref() != Some(packet.device_id.as_str()) {
            trace!(source = %self.source, "Ignoring packet from {}", packet.device_id);
            return;
        }

        let frame = RawFrame::new(self.source, packet.bytes);
        match protocol::decode_frame(&frame) {
            Ok(sample) => {
                self.samples += 1;
                self.state.last_sample_at = Some(now);
                if !self.state.confirmed {
                    self.confirm();
                }
                let _ = self.event_sender.send(AppEvent::Sample(sample));
            }
            Err(FrameError::WrongSize { len }) => {
                self.malformed_frames += 1;
                trace!(source = %self.source, "{}", LinkError::MalformedFrame { len });
            }
            Err(err) => {
                self.malformed_frames += 1;
                debug!(source = %self.source, "Dropping frame: {}", err);
            }
        }
    }

    fn confirm(&mut self) {
        self.state.confirmed = true;
        self.retries = 0;
        self.last_error = None;
        info!(source = %self.source, "Subscription confirmed by first sample");
        let _ = self
            .event_sender
            .send(AppEvent::SubscriptionConfirmed(self.source));
        self.report(MessageSeverity::Success, "Receiving data");
    }

    fn restart_after_silence(&mut self, now: Instant, silence: Duration) {
        let reason = LinkError::DataSilenceTimeout(silence);
        if !self.state.confirmed {
            self.fail_attempt(now, reason);
            return;
        }

        warn!(source = %self.source, "{}, restarting", reason);
        self.report(MessageSeverity::Warning, format!("{reason}, reconnecting"));
        self.last_error = Some(reason);
        self.teardown();
        self.begin_scan(now);
    }

    /// Surface a new side-channel error. Returns `true` if it aborted the
    /// current attempt.
    fn poll_transport_error(&mut self, now: Instant) -> bool {
        let message = self.transport.get_error();
        if is_benign_error(&message) {
            return false;
        }
        let message = message.trim().to_string();
        if self.last_transport_error.as_deref() == Some(message.as_str()) {
            return false;
        }

        warn!(source = %self.source, "Transport error: {}", message);
        self.report(MessageSeverity::Warning, format!("Transport error: {message}"));
        self.last_transport_error = Some(message.clone());

        if matches!(
            self.phase,
            LinkPhase::ScanningDevices | LinkPhase::ScanningServices | LinkPhase::ScanningCharacteristics
        ) {
            self.fail_attempt(now, LinkError::TransportError(message));
            return true;
        }
        false
    }

    /// Tear down and either retry from the device scan or give up.
    fn fail_attempt(&mut self, now: Instant, reason: LinkError) {
        self.teardown();
        self.retries += 1;
        let max = self.max_retries();

        if self.retries < max {
            warn!(
                source = %self.source,
                attempt = self.retries,
                max,
                "{}, retrying",
                reason
            );
            self.report(
                MessageSeverity::Warning,
                format!("{reason}, retrying ({}/{max})", self.retries),
            );
            self.last_error = Some(reason);
            self.begin_scan(now);
        } else {
            let err = LinkError::RetriesExhausted {
                attempts: self.retries,
                last: Box::new(reason),
            };
            error!(source = %self.source, "{}", err);
            self.report(MessageSeverity::Error, err.to_string());
            self.last_error = Some(err);
            self.phase = LinkPhase::Error;
        }
    }

    /// Stop any scan, discard buffered data and reset the transport.
    fn teardown(&mut self) {
        if self.phase == LinkPhase::ScanningDevices {
            self.transport.stop_device_scan();
        }
        let mut discarded = 0usize;
        while self.transport.poll_data().is_some() {
            discarded += 1;
        }
        self.transport.quit();
        if discarded > 0 {
            debug!(source = %self.source, "Discarded {} buffered packets", discarded);
        }
        debug!(source = %self.source, phase = %self.phase, "Link torn down");

        self.state = LinkState::default();
        self.phase = LinkPhase::Idle;
    }

    fn report(&self, severity: MessageSeverity, message: impl Into<String>) {
        let _ = self.event_sender.send(AppEvent::LogMessage(
            self.source,
            StatusMessage::new(message, severity),
        ));
    }
}
