//! Compute device selection.
//!
//! Engines advertise the devices they can compile a model for. The session
//! resolves the requested device against that list exactly once, at start-up,
//! and hands the result to every inference call.

use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, PipelineError};

/// A compute device an engine can run on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Device {
    /// Host CPU.
    Cpu,
    /// A GPU, optionally a specific one by index (`GPU.1`).
    Gpu(Option<u32>),
    /// Several devices sharing the load (`MULTI:GPU,CPU`).
    Multi(Vec<Device>),
    /// Let the engine pick per request.
    Auto,
    /// Any other accelerator the engine names (`NPU`, `HETERO`, ...).
    Other(String),
}

impl Device {
    /// Picks the device a session runs on.
    ///
    /// An explicitly requested device must be in `available`, except `AUTO`
    /// which every engine accepts. A `MULTI` request needs every member to be
    /// available. With nothing requested a GPU is preferred, then the CPU, then
    /// whatever the engine lists first.
    pub fn resolve(requested: Option<&Device>, available: &[Device]) -> Result<Device, PipelineError> {
        match requested {
            Some(Device::Auto) => Ok(Device::Auto),
            Some(device) => {
                if device.is_offered_by(available) {
                    Ok(device.clone())
                } else {
                    Err(PipelineError::DeviceUnavailable {
                        requested: device.to_string(),
                        available: available
                            .iter()
                            .map(Device::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                }
            }
            None => available
                .iter()
                .find(|d| matches!(d, Device::Gpu(_)))
                .or_else(|| available.iter().find(|d| **d == Device::Cpu))
                .or_else(|| available.first())
                .cloned()
                .ok_or(PipelineError::NoDevices),
        }
    }

    fn is_offered_by(&self, available: &[Device]) -> bool {
        match self {
            Device::Multi(members) => {
                !members.is_empty() && members.iter().all(|m| m.is_offered_by(available))
            }
            // a bare GPU request is satisfied by any enumerated GPU
            Device::Gpu(None) => available.iter().any(|d| matches!(d, Device::Gpu(_))),
            other => available.contains(other),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(None) => write!(f, "GPU"),
            Device::Gpu(Some(index)) => write!(f, "GPU.{index}"),
            Device::Multi(members) => {
                let names = members.iter().map(Device::to_string).collect::<Vec<_>>();
                write!(f, "MULTI:{}", names.join(","))
            }
            Device::Auto => write!(f, "AUTO"),
            Device::Other(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err(ConfigError::UnknownDevice(s.to_string()));
        }
        let upper = name.to_ascii_uppercase();

        if let Some(members) = upper.strip_prefix("MULTI:") {
            let members = members
                .split(',')
                .map(str::parse)
                .collect::<Result<Vec<Device>, _>>()?;
            if members.iter().any(|m| matches!(m, Device::Multi(_) | Device::Auto)) {
                return Err(ConfigError::UnknownDevice(s.to_string()));
            }
            return Ok(Device::Multi(members));
        }

        match upper.as_str() {
            "CPU" => Ok(Device::Cpu),
            "GPU" => Ok(Device::Gpu(None)),
            "AUTO" => Ok(Device::Auto),
            _ => match upper.strip_prefix("GPU.") {
                Some(index) => index
                    .parse::<u32>()
                    .map(|i| Device::Gpu(Some(i)))
                    .map_err(|_| ConfigError::UnknownDevice(s.to_string())),
                None if upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                    Ok(Device::Other(upper))
                }
                None => Err(ConfigError::UnknownDevice(s.to_string())),
            },
        }
    }
}
