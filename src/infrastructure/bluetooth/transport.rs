//! Transport seam
//!
//! The radio stack is an external collaborator. The link drives it purely by
//! non-blocking polls from inside the tick, so every call here must return
//! immediately.

use crate::domain::uuid;

/// Result of polling an in-flight scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPoll<T> {
    /// Nothing new yet; the scan is still running
    Pending,
    Available(T),
    /// The scan ended and has nothing more to report
    Finished,
}

/// One device advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAdvert {
    pub id: String,
    pub name: String,
}

impl DeviceAdvert {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One notification received on the subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub device_id: String,
    pub bytes: Vec<u8>,
}

pub trait Transport {
    fn start_device_scan(&mut self);
    fn stop_device_scan(&mut self);
    fn poll_device(&mut self) -> ScanPoll<DeviceAdvert>;

    fn scan_services(&mut self, device_id: &str);
    fn poll_service(&mut self) -> ScanPoll<String>;

    fn scan_characteristics(&mut self, device_id: &str, service_id: &str);
    fn poll_characteristic(&mut self) -> ScanPoll<String>;

    /// Request notifications. The return value alone is not trustworthy,
    /// see [`SubscribeAck::classify`].
    fn subscribe_characteristic(
        &mut self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
        notify: bool,
    ) -> bool;

    /// Last error text reported by the stack; empty when there is none.
    fn get_error(&mut self) -> String;

    /// Next received packet, one per call.
    fn poll_data(&mut self) -> Option<DataPacket>;

    /// Force-disconnect and reset all transport state. Idempotent.
    fn quit(&mut self);
}

/// Whether an error message from the stack actually signals success.
pub fn is_benign_error(message: &str) -> bool {
    let canonical = uuid::normalize(message.trim());
    canonical.is_empty() || canonical == "ok"
}

/// How a subscribe request was acknowledged.
///
/// Neither accepted variant is final: the subscription is only confirmed
/// by the first valid sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeAck {
    /// The stack reported success
    Acknowledged,
    /// The stack reported failure, but with an empty or "ok" message
    Ambiguous,
    /// Explicit failure
    Rejected(String),
}

impl SubscribeAck {
    pub fn classify(accepted: bool, error: &str) -> Self {
        if accepted {
            Self::Acknowledged
        } else if is_benign_error(error) {
            Self::Ambiguous
        } else {
            Self::Rejected(error.trim().to_string())
        }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}
