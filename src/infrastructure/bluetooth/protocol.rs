//! IMU Paddle Protocol
//!
//! Frame layout and decoding for the notifications sent by the paddle's
//! data characteristic.

use crate::domain::error::FrameError;
use crate::domain::models::{ImuSample, RawFrame, SourceId};
use nalgebra::Vector3;
use tracing::trace;

/// Exact size of a data frame
pub const FRAME_SIZE: usize = 13;

/// Raw value layout: signed 16-bit little-endian integers
pub mod layout {
    pub const ACCEL_X: usize = 1;
    pub const ACCEL_Y: usize = 3;
    pub const ACCEL_Z: usize = 5;
    pub const GYRO_X: usize = 7;
    pub const GYRO_Y: usize = 9;
    pub const GYRO_Z: usize = 11;
}

/// Divisors from raw counts to physical units
pub mod scale {
    /// Counts per g
    pub const ACCEL: f32 = 1000.0;
    /// Counts per degree per second
    pub const GYRO: f32 = 10.0;
}

/// Decode one data frame
///
/// # Frame Structure (13 bytes)
///
/// ```text
/// [0]     : Reserved, ignored
/// [1-2]   : Accel X (i16 little-endian, milli-g)
/// [3-4]   : Accel Y
/// [5-6]   : Accel Z
/// [7-8]   : Gyro X (i16 little-endian, tenths of deg/s)
/// [9-10]  : Gyro Y
/// [11-12] : Gyro Z
/// ```
///
/// Frames of any other length are rejected without side effects.
pub fn decode_frame(frame: &RawFrame) -> Result<ImuSample, FrameError> {
    parse_raw_bytes(frame.source, &frame.bytes)
}

/// Decode raw bytes received for `source`
pub fn parse_raw_bytes(source: SourceId, bytes: &[u8]) -> Result<ImuSample, FrameError> {
    if bytes.len() != FRAME_SIZE {
        return Err(FrameError::WrongSize { len: bytes.len() });
    }

    #[cfg(debug_assertions)]
    trace!("Raw frame from {}: {:02X?}", source, bytes);

    let accel = Vector3::new(
        read_i16(bytes, layout::ACCEL_X)? as f32,
        read_i16(bytes, layout::ACCEL_Y)? as f32,
        read_i16(bytes, layout::ACCEL_Z)? as f32,
    ) / scale::ACCEL;
    let gyro = Vector3::new(
        read_i16(bytes, layout::GYRO_X)? as f32,
        read_i16(bytes, layout::GYRO_Y)? as f32,
        read_i16(bytes, layout::GYRO_Z)? as f32,
    ) / scale::GYRO;

    Ok(ImuSample {
        source,
        accel,
        gyro,
    })
}

/// Build a frame from physical values, saturating at the i16 range.
pub fn encode_frame(accel: &Vector3<f32>, gyro: &Vector3<f32>) -> Vec<u8> {
    let mut bytes = vec![0u8; FRAME_SIZE];
    let fields = [
        (layout::ACCEL_X, accel.x * scale::ACCEL),
        (layout::ACCEL_Y, accel.y * scale::ACCEL),
        (layout::ACCEL_Z, accel.z * scale::ACCEL),
        (layout::GYRO_X, gyro.x * scale::GYRO),
        (layout::GYRO_Y, gyro.y * scale::GYRO),
        (layout::GYRO_Z, gyro.z * scale::GYRO),
    ];
    for (offset, value) in fields {
        // float to int casts saturate
        let raw = value.round() as i16;
        bytes[offset..offset + 2].copy_from_slice(&raw.to_le_bytes());
    }
    bytes
}

fn read_i16(bytes: &[u8], offset: usize) -> Result<i16, FrameError> {
    bytes
        .get(offset..offset + 2)
        .and_then(|pair| pair.try_into().ok())
        .map(i16::from_le_bytes)
        .ok_or(FrameError::Truncated { offset })
}
