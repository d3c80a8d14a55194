//! Bluetooth Module
//!
//! Acquires IMU paddles over BLE and turns their notifications into fused
//! orientations and scalar positions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    TrackerService                        │
//! │  (Tick driver - public API for the application)          │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ one per source
//!                       ▼
//! ┌─────────────────────────────┐   AppEvent   ┌───────────────────┐
//! │       LinkAcquisition       │ ───────────▶ │ OrientationEngine │
//! │                             │   (mpsc)     │ PositionMapper    │
//! │ - scan / discover / subscribe│             └───────────────────┘
//! │ - retries and silence watch │
//! │ - frame decoding (protocol) │
//! └──────────────┬──────────────┘
//!                │ non-blocking polls
//!                ▼
//! ┌─────────────────────────────┐
//! │      Transport (trait)      │
//! │  (radio stack, simulated)   │
//! └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Radio stack seam and subscription acknowledgement
//! - [`protocol`] - Frame layout and decoding
//! - [`link`] - Per-peripheral acquisition state machine
//! - [`simulated`] - In-process peripheral for tests and the demo
//! - [`service`] - Tick driver

pub mod link;
pub mod protocol;
pub mod service;
pub mod simulated;
pub mod transport;

// Re-export main service for convenience
pub use service::TrackerService;
