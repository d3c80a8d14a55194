//! In-process peripheral
//!
//! Scriptable stand-in for a radio stack. Tests drive it by hand; the demo
//! binary attaches a [`SwingMotion`] so it streams frames once subscribed.

use super::protocol::encode_frame;
use super::transport::{is_benign_error, DataPacket, DeviceAdvert, ScanPoll, Transport};
use crate::domain::settings::LinkSettings;
use crate::domain::smoothing::canonical_down;
use nalgebra::Vector3;
use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::time::{Duration, Instant};

/// Calls observed by the transport, for assertions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallLog {
    pub device_scans: u32,
    pub stop_scans: u32,
    pub service_scans: Vec<String>,
    pub characteristic_scans: Vec<(String, String)>,
    pub subscribes: u32,
    pub quits: u32,
}

#[derive(Debug, Default)]
pub struct SimulatedTransport {
    /// Devices reported by every device scan, in order
    pub advertisers: Vec<DeviceAdvert>,
    /// Whether a scan reports `Finished` after the last advertiser
    pub scan_finishes: bool,
    pub services: Vec<String>,
    pub characteristics: Vec<String>,
    pub subscribe_result: bool,
    /// Error text reported right after a subscribe request
    pub subscribe_error: String,
    /// Side-channel error text
    pub error: String,

    scanning: bool,
    device_queue: VecDeque<DeviceAdvert>,
    service_queue: Option<VecDeque<String>>,
    characteristic_queue: Option<VecDeque<String>>,
    subscribed_to: Option<String>,
    inbox: VecDeque<DataPacket>,
    motion: Option<SwingMotion>,
    calls: CallLog,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            subscribe_result: true,
            ..Self::default()
        }
    }

    /// A well-behaved paddle matching `settings` that swings once subscribed.
    pub fn swinging(settings: &LinkSettings, index: usize) -> Self {
        let name = settings
            .device_names
            .get(index)
            .or_else(|| settings.device_names.first())
            .cloned()
            .unwrap_or_default();
        let mut transport = Self::new()
            .with_advertisers([
                DeviceAdvert::new(format!("AA:BB:CC:00:00:{index:02X}"), "Headphones"),
                DeviceAdvert::new(format!("AA:BB:CC:00:01:{index:02X}"), name),
            ])
            .with_services([
                "00001800-0000-1000-8000-00805f9b34fb".to_string(),
                // Stacks commonly report upper-case, braced GUIDs
                format!("{{{}}}", settings.service_uuid.to_uppercase()),
            ])
            .with_characteristics([format!("{{{}}}", settings.characteristic_uuid.to_uppercase())]);
        transport.motion = Some(SwingMotion::new(
            Instant::now(),
            Duration::from_millis(20),
            2.0 + index as f32,
            55.0,
        ));
        transport
    }

    pub fn with_advertisers(mut self, advertisers: impl IntoIterator<Item = DeviceAdvert>) -> Self {
        self.advertisers = advertisers.into_iter().collect();
        self
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = String>) -> Self {
        self.services = services.into_iter().collect();
        self
    }

    pub fn with_characteristics(mut self, characteristics: impl IntoIterator<Item = String>) -> Self {
        self.characteristics = characteristics.into_iter().collect();
        self
    }

    /// Queue a notification as if received from `device_id`.
    pub fn push_frame(&mut self, device_id: &str, bytes: Vec<u8>) {
        self.inbox.push_back(DataPacket {
            device_id: device_id.to_string(),
            bytes,
        });
    }

    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn subscribed_to(&self) -> Option<&str> {
        self.subscribed_to.as_deref()
    }

    pub fn pending_frames(&self) -> usize {
        self.inbox.len()
    }
}

impl Transport for SimulatedTransport {
    fn start_device_scan(&mut self) {
        self.calls.device_scans += 1;
        self.scanning = true;
        self.device_queue = self.advertisers.iter().cloned().collect();
    }

    fn stop_device_scan(&mut self) {
        self.calls.stop_scans += 1;
        self.scanning = false;
        self.device_queue.clear();
    }

    fn poll_device(&mut self) -> ScanPoll<DeviceAdvert> {
        if !self.scanning {
            return ScanPoll::Finished;
        }
        match self.device_queue.pop_front() {
            Some(advert) => ScanPoll::Available(advert),
            None if self.scan_finishes => ScanPoll::Finished,
            None => ScanPoll::Pending,
        }
    }

    fn scan_services(&mut self, device_id: &str) {
        self.calls.service_scans.push(device_id.to_string());
        self.service_queue = Some(self.services.iter().cloned().collect());
    }

    fn poll_service(&mut self) -> ScanPoll<String> {
        poll_queue(&mut self.service_queue)
    }

    fn scan_characteristics(&mut self, device_id: &str, service_id: &str) {
        self.calls
            .characteristic_scans
            .push((device_id.to_string(), service_id.to_string()));
        self.characteristic_queue = Some(self.characteristics.iter().cloned().collect());
    }

    fn poll_characteristic(&mut self) -> ScanPoll<String> {
        poll_queue(&mut self.characteristic_queue)
    }

    fn subscribe_characteristic(
        &mut self,
        device_id: &str,
        _service_id: &str,
        _characteristic_id: &str,
        notify: bool,
    ) -> bool {
        self.calls.subscribes += 1;
        self.error = self.subscribe_error.clone();
        if notify && (self.subscribe_result || is_benign_error(&self.subscribe_error)) {
            self.subscribed_to = Some(device_id.to_string());
        }
        self.subscribe_result
    }

    fn get_error(&mut self) -> String {
        self.error.clone()
    }

    fn poll_data(&mut self) -> Option<DataPacket> {
        if let Some(packet) = self.inbox.pop_front() {
            return Some(packet);
        }
        let device_id = self.subscribed_to.as_ref()?;
        let bytes = self.motion.as_mut()?.next_frame(Instant::now())?;
        Some(DataPacket {
            device_id: device_id.clone(),
            bytes,
        })
    }

    fn quit(&mut self) {
        self.calls.quits += 1;
        self.scanning = false;
        self.device_queue.clear();
        self.service_queue = None;
        self.characteristic_queue = None;
        self.subscribed_to = None;
        self.inbox.clear();
        self.error.clear();
    }
}

fn poll_queue(queue: &mut Option<VecDeque<String>>) -> ScanPoll<String> {
    match queue {
        Some(items) => match items.pop_front() {
            Some(item) => ScanPoll::Available(item),
            None => ScanPoll::Finished,
        },
        None => ScanPoll::Pending,
    }
}

/// Paddle swinging side to side about the vertical axis.
#[derive(Debug, Clone)]
pub struct SwingMotion {
    started_at: Instant,
    next_at: Instant,
    interval: Duration,
    period_secs: f32,
    amplitude_deg: f32,
}

impl SwingMotion {
    pub fn new(started_at: Instant, interval: Duration, period_secs: f32, amplitude_deg: f32) -> Self {
        Self {
            started_at,
            next_at: started_at,
            interval,
            period_secs: period_secs.max(0.1),
            amplitude_deg,
        }
    }

    /// Frame due at `now`, if any.
    pub fn next_frame(&mut self, now: Instant) -> Option<Vec<u8>> {
        if now < self.next_at {
            return None;
        }
        let t = self.next_at.duration_since(self.started_at).as_secs_f32();
        self.next_at += self.interval;
        // Skip ahead after a long stall instead of bursting
        if now.duration_since(self.next_at) > Duration::from_secs(1) {
            self.next_at = now;
        }

        let omega = TAU / self.period_secs;
        // Yaw about the gravity axis leaves the accelerometer reading constant
        let gyro = Vector3::new(0.0, self.amplitude_deg * omega * (omega * t).cos(), 0.0);
        Some(encode_frame(&canonical_down(), &gyro))
    }
}
