pub mod error;
pub mod imu;
pub mod madgwick;
pub mod models;
pub mod position;
pub mod settings;
pub mod smoothing;
pub mod uuid;
