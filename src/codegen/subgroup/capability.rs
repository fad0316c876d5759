//! Capability resolution
//!
//! Turns the device's extension list plus a free-text attribute string such
//! as `"sg_khr,-sg_khrballot"` into a [`Capabilities`] set, and the mimic
//! text into a [`MimicMode`].

use serde::Serialize;
use std::fmt;

use crate::config::{DeviceQuery, Vendor};

/// Subgroup-related device capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub khr: bool,
    pub khr_ext_type: bool,
    pub khr_shuffle: bool,
    pub khr_shuffle_rel: bool,
    pub khr_ballot: bool,
    pub intel: bool,
    pub intel8: bool,
    pub intel16: bool,
    pub intel64: bool,
    pub fp16: bool,
    pub fp64: bool,
    /// `khr || intel`, recomputed after every update
    pub basic_subgroup: bool,
}

/// Token spelling and the flag it drives
const TOKENS: [&str; 11] = [
    "sg_khr",
    "sg_khrexttype",
    "sg_khrshuf",
    "sg_khrshufrel",
    "sg_khrballot",
    "sg_intel",
    "sg_intel8",
    "sg_intel16",
    "sg_intel64",
    "fp16",
    "fp64",
];

impl Capabilities {
    /// Default set derived from what the device reports
    pub fn from_device(device: &dyn DeviceQuery) -> Self {
        let mut caps = Capabilities {
            khr: device.has_extension("cl_khr_subgroups"),
            khr_ext_type: device.has_extension("cl_khr_subgroup_extended_types"),
            khr_shuffle: device.has_extension("cl_khr_subgroup_shuffle"),
            khr_shuffle_rel: device.has_extension("cl_khr_subgroup_shuffle_relative"),
            khr_ballot: device.has_extension("cl_khr_subgroup_ballot"),
            intel: device.has_extension("cl_intel_subgroups"),
            intel8: device.has_extension("cl_intel_subgroups_char"),
            intel16: device.has_extension("cl_intel_subgroups_short"),
            intel64: device.has_extension("cl_intel_subgroups_long"),
            fp16: device.supports_fp16(),
            fp64: device.supports_fp64(),
            basic_subgroup: false,
        };
        caps.refresh();
        caps
    }

    /// Device defaults, then the comma separated overrides in `args`
    pub fn resolve(device: &dyn DeviceQuery, args: &str) -> Self {
        let mut caps = Self::from_device(device);
        caps.apply_args(args);
        caps
    }

    pub fn apply_args(&mut self, args: &str) {
        for token in args.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !self.apply_token(token) {
                tracing::debug!("Ignoring unknown subgroup capability token [{}]", token);
            }
        }
        self.refresh();
    }

    /// Toggle the flag named by `token`, `-` prefix clears it.
    /// Returns false for an unknown token, which leaves the set untouched.
    pub fn apply_token(&mut self, token: &str) -> bool {
        let (enable, name) = match token.strip_prefix('-') {
            Some(name) => (false, name),
            None => (true, token),
        };
        match self.flag_mut(name) {
            Some(flag) => {
                *flag = enable;
                self.refresh();
                true
            }
            None => false,
        }
    }

    fn flag_mut(&mut self, name: &str) -> Option<&mut bool> {
        let flag = match name {
            "sg_khr" => &mut self.khr,
            "sg_khrexttype" => &mut self.khr_ext_type,
            "sg_khrshuf" => &mut self.khr_shuffle,
            "sg_khrshufrel" => &mut self.khr_shuffle_rel,
            "sg_khrballot" => &mut self.khr_ballot,
            "sg_intel" => &mut self.intel,
            "sg_intel8" => &mut self.intel8,
            "sg_intel16" => &mut self.intel16,
            "sg_intel64" => &mut self.intel64,
            "fp16" => &mut self.fp16,
            "fp64" => &mut self.fp64,
            _ => return None,
        };
        Some(flag)
    }

    fn flag(&self, name: &str) -> bool {
        match name {
            "sg_khr" => self.khr,
            "sg_khrexttype" => self.khr_ext_type,
            "sg_khrshuf" => self.khr_shuffle,
            "sg_khrshufrel" => self.khr_shuffle_rel,
            "sg_khrballot" => self.khr_ballot,
            "sg_intel" => self.intel,
            "sg_intel8" => self.intel8,
            "sg_intel16" => self.intel16,
            "sg_intel64" => self.intel64,
            "fp16" => self.fp16,
            "fp64" => self.fp64,
            _ => false,
        }
    }

    fn refresh(&mut self) {
        self.basic_subgroup = self.khr || self.intel;
    }

    /// Enabled tokens, in canonical order
    pub fn tokens(&self) -> Vec<&'static str> {
        TOKENS.iter().copied().filter(|t| self.flag(t)).collect()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens().join(","))
    }
}

/// How subgroup operations are emulated when the device lacks them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MimicMode {
    Local,
    Ptx,
    #[default]
    Auto,
    None,
}

impl MimicMode {
    /// Unknown or empty text falls back to `Auto`
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "local" => MimicMode::Local,
            "ptx" => MimicMode::Ptx,
            "auto" => MimicMode::Auto,
            "none" => MimicMode::None,
            _ => MimicMode::Auto,
        }
    }

    /// Replace `Auto` with the vendor's choice
    pub fn resolve(self, vendor: Vendor) -> Self {
        match self {
            MimicMode::Auto if vendor == Vendor::Nvidia => MimicMode::Ptx,
            MimicMode::Auto => MimicMode::Local,
            other => other,
        }
    }
}

impl fmt::Display for MimicMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MimicMode::Local => write!(f, "local"),
            MimicMode::Ptx => write!(f, "ptx"),
            MimicMode::Auto => write!(f, "auto"),
            MimicMode::None => write!(f, "none"),
        }
    }
}

/// Raw `SubgroupExt(mimic, args)` directive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubgroupAttributes {
    pub mimic: MimicMode,
    pub args: String,
}

impl SubgroupAttributes {
    pub fn new(mimic: &str, args: &str) -> Self {
        Self {
            mimic: MimicMode::parse(mimic),
            args: args.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceProfile;

    fn intel_gpu() -> DeviceProfile {
        DeviceProfile::new("UHD 630", Vendor::Intel)
            .with_extensions(["cl_khr_subgroups", "cl_intel_subgroups", "cl_intel_subgroups_short"])
            .with_fp(true, false)
    }

    #[test]
    fn test_device_defaults() {
        let caps = Capabilities::from_device(&intel_gpu());
        assert!(caps.khr);
        assert!(caps.intel);
        assert!(caps.intel16);
        assert!(!caps.intel8);
        assert!(caps.fp16);
        assert!(!caps.fp64);
        assert!(caps.basic_subgroup);
    }

    #[test]
    fn test_tokens_toggle() {
        let caps = Capabilities::resolve(&intel_gpu(), "-sg_intel, sg_khrexttype,,-sg_khr");
        assert!(!caps.intel);
        assert!(!caps.khr);
        assert!(caps.khr_ext_type);
        assert!(!caps.basic_subgroup);
    }

    #[test]
    fn test_unknown_token_ignored() {
        let mut caps = Capabilities::default();
        assert!(!caps.apply_token("sg_khr_typo"));
        assert_eq!(caps, Capabilities::default());
        assert!(caps.apply_token("fp64"));
        assert!(caps.fp64);
    }

    #[test]
    fn test_basic_subgroup_follows_flags() {
        let mut caps = Capabilities::default();
        caps.apply_args("sg_intel");
        assert!(caps.basic_subgroup);
        caps.apply_args("-sg_intel");
        assert!(!caps.basic_subgroup);
    }

    #[test]
    fn test_display_tokens() {
        let mut caps = Capabilities::default();
        caps.apply_args("fp16,sg_khr");
        assert_eq!(caps.to_string(), "sg_khr,fp16");
    }

    #[test]
    fn test_mimic_parse() {
        assert_eq!(MimicMode::parse("local"), MimicMode::Local);
        assert_eq!(MimicMode::parse("ptx"), MimicMode::Ptx);
        assert_eq!(MimicMode::parse(""), MimicMode::Auto);
        assert_eq!(MimicMode::parse("cuda"), MimicMode::Auto);
        assert_eq!(MimicMode::Auto.resolve(Vendor::Nvidia), MimicMode::Ptx);
        assert_eq!(MimicMode::Auto.resolve(Vendor::Amd), MimicMode::Local);
        assert_eq!(MimicMode::None.resolve(Vendor::Nvidia), MimicMode::None);
    }
}
