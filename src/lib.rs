//! dial-reader - angle readout for HMS/SHMS analog dials
//!
//! Reads the pointer angle from a single photograph by calibrating the
//! tick spacing, locating the printed scale numeral with a text detector and
//! recognizing it with Tesseract.

pub mod batch;
pub mod capture;
pub mod config;
pub mod debug_dump;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod vision;

pub use config::DialConfig;
pub use device::{DeviceProfile, DeviceType};
pub use error::{DialError, DialResult};
pub use pipeline::{render, AngleReading, DialReader, ReadingRecord};
