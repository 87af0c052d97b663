//! Device families and their scale ranges

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Supported dial families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "HMS")]
    Hms,
    #[serde(rename = "SHMS")]
    Shms,
}

impl DeviceType {
    /// Infer the device from an image path: anything mentioning `SHMS` is SHMS
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains("SHMS") {
            DeviceType::Shms
        } else {
            DeviceType::Hms
        }
    }

    pub fn profile(&self) -> DeviceProfile {
        match self {
            DeviceType::Hms => DeviceProfile::HMS,
            DeviceType::Shms => DeviceProfile::SHMS,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Hms => write!(f, "HMS"),
            DeviceType::Shms => write!(f, "SHMS"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown device type {0:?} (expected HMS or SHMS)")]
pub struct ParseDeviceError(String);

impl FromStr for DeviceType {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HMS" => Ok(DeviceType::Hms),
            "SHMS" => Ok(DeviceType::Shms),
            _ => Err(ParseDeviceError(s.to_string())),
        }
    }
}

/// Valid mark range and tick polarity of a device family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    pub min: f64,
    pub max: f64,
    /// +1 when angles grow with the scale to the right, -1 otherwise
    pub polarity: f64,
}

impl DeviceProfile {
    pub const HMS: DeviceProfile = DeviceProfile {
        min: 10.5,
        max: 90.0,
        polarity: 1.0,
    };

    pub const SHMS: DeviceProfile = DeviceProfile {
        min: 5.5,
        max: 35.0,
        polarity: -1.0,
    };

    /// Bring a parsed mark into range.
    ///
    /// A mark above `max` lost its decimal point and is divided by ten once;
    /// whatever is then below `min` is unreadable and becomes zero.
    pub fn correct(&self, mark: f64) -> f64 {
        let mut mark = mark;
        if mark > self.max {
            mark /= 10.0;
        }
        if mark < self.min {
            mark = 0.0;
        }
        mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_from_path() {
        assert_eq!(DeviceType::from_path(Path::new("imgs/SHMS_12.jpg")), DeviceType::Shms);
        assert_eq!(DeviceType::from_path(Path::new("imgs/HMS_0.jpg")), DeviceType::Hms);
        assert_eq!(DeviceType::from_path(Path::new("dial.png")), DeviceType::Hms);
    }

    #[test]
    fn test_device_from_str() {
        assert_eq!("shms".parse::<DeviceType>().unwrap(), DeviceType::Shms);
        assert_eq!("HMS".parse::<DeviceType>().unwrap(), DeviceType::Hms);
        assert!("gauge".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_hms_correction() {
        let p = DeviceProfile::HMS;
        assert_eq!(p.correct(105.0), 10.5);
        assert_eq!(p.correct(1050.0), 105.0);
        assert_eq!(p.correct(10.4), 0.0);
        assert_eq!(p.correct(10.5), 10.5);
        assert_eq!(p.correct(90.0), 90.0);
        assert_eq!(p.correct(45.0), 45.0);
    }

    #[test]
    fn test_shms_correction() {
        let p = DeviceProfile::SHMS;
        assert_eq!(p.correct(55.0), 5.5);
        assert_eq!(p.correct(35.0), 35.0);
        assert_eq!(p.correct(5.4), 0.0);
        // 40 -> 4.0, which then falls below the minimum
        assert_eq!(p.correct(40.0), 0.0);
        assert_eq!(p.polarity, -1.0);
    }
}
