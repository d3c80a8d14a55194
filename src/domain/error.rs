//! Error taxonomy for link acquisition, frame decoding and fusion.

use crate::domain::models::SourceId;
use std::time::Duration;
use thiserror::Error;

/// Failures observed while acquiring or supervising a peripheral link.
///
/// Everything except [`LinkError::RetriesExhausted`] is recovered inside the
/// link by a bounded retry or restart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("device not found within {0:?}")]
    ScanTimeout(Duration),
    #[error("service not found")]
    ServiceNotFound,
    #[error("characteristic not found")]
    CharacteristicNotFound,
    #[error("subscription acknowledgement was ambiguous, waiting for first sample")]
    SubscriptionAmbiguous,
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("no data received for {0:?}")]
    DataSilenceTimeout(Duration),
    #[error("malformed frame of {len} bytes")]
    MalformedFrame { len: usize },
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("{last} after {attempts} attempts")]
    RetriesExhausted { attempts: u32, last: Box<LinkError> },
}

impl LinkError {
    /// Whether this error ends acquisition until an external restart.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("wrong frame size: {len} bytes")]
    WrongSize { len: usize },
    #[error("frame truncated at offset {offset}")]
    Truncated { offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown source {0}")]
    UnknownSource(SourceId),
    #[error("source has not produced a sample yet")]
    NotReady,
    #[error("source is moving; hold it still to calibrate")]
    NotStable,
    #[error("calibration window of {0:?} is out of range")]
    WindowOutOfRange(Duration),
}
