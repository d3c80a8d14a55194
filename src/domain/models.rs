use nalgebra::Vector3;
use std::fmt;

/// Dense handle for one tracked peripheral.
///
/// Handles index straight into per-source tables; they stay stable for the
/// lifetime of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub usize);

impl SourceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// One packet as delivered by the transport, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub source: SourceId,
    pub bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(source: SourceId, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            bytes: bytes.into(),
        }
    }
}

/// Decoded physical-unit reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub source: SourceId,
    /// Acceleration in g.
    pub accel: Vector3<f32>,
    /// Angular rate in degrees per second.
    pub gyro: Vector3<f32>,
}

/// Events flowing from the link layer to the tick driver
#[derive(Debug, Clone)]
pub enum AppEvent {
    Sample(ImuSample),
    SubscriptionConfirmed(SourceId),
    LogMessage(SourceId, StatusMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
