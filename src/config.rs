//! Device profiles
//!
//! The codegen never talks to a driver. It sees a device through the narrow
//! [`DeviceQuery`] interface; [`DeviceProfile`] is the TOML-backed
//! implementation used by the CLI and the tests.
//!
//! ```toml
//! name = "RTX 3080"
//! vendor = "nvidia"
//! extensions = ["cl_khr_fp64", "cl_nv_device_attribute_query"]
//! fp64 = true
//! compute_capability = [8, 6]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::diagnostics::{Result, SubgroupError};

/// Platform vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Nvidia,
    Intel,
    Amd,
    Arm,
    Qualcomm,
    #[default]
    Other,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Nvidia => write!(f, "NVIDIA"),
            Vendor::Intel => write!(f, "Intel"),
            Vendor::Amd => write!(f, "AMD"),
            Vendor::Arm => write!(f, "ARM"),
            Vendor::Qualcomm => write!(f, "Qualcomm"),
            Vendor::Other => write!(f, "Other"),
        }
    }
}

/// What the codegen may ask about a device
pub trait DeviceQuery {
    fn vendor(&self) -> Vendor;

    fn has_extension(&self, name: &str) -> bool;

    fn supports_fp16(&self) -> bool;

    fn supports_fp64(&self) -> bool;

    /// NVIDIA compute capability, when the device reports one
    fn compute_capability(&self) -> Option<(u32, u32)> {
        None
    }

    /// Beignet's short shuffle only handles scalars
    fn beignet_fix(&self) -> bool {
        false
    }
}

/// Device description loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub name: String,
    pub vendor: Vendor,
    pub extensions: Vec<String>,
    pub fp16: bool,
    pub fp64: bool,
    pub compute_capability: Option<(u32, u32)>,
    pub beignet_fix: bool,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>, vendor: Vendor) -> Self {
        Self {
            name: name.into(),
            vendor,
            ..Default::default()
        }
    }

    /// Builder-style extension list
    pub fn with_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions.extend(exts.into_iter().map(Into::into));
        self
    }

    pub fn with_fp(mut self, fp16: bool, fp64: bool) -> Self {
        self.fp16 = fp16;
        self.fp64 = fp64;
        self
    }

    pub fn with_compute_capability(mut self, major: u32, minor: u32) -> Self {
        self.compute_capability = Some((major, minor));
        self
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SubgroupError::Config {
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SubgroupError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&text)
    }
}

impl DeviceQuery for DeviceProfile {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    fn supports_fp16(&self) -> bool {
        self.fp16
    }

    fn supports_fp64(&self) -> bool {
        self.fp64
    }

    fn compute_capability(&self) -> Option<(u32, u32)> {
        self.compute_capability
    }

    fn beignet_fix(&self) -> bool {
        self.beignet_fix
    }
}
