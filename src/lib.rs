//! IMU paddle tracking: BLE link acquisition, frame decoding, orientation
//! fusion and scalar position mapping.

pub mod domain;
pub mod infrastructure;
