// This module holds the plain configuration values the back end consumes. They are
// supplied by the outer driver (command line, environment) and threaded read-only through
// the pipeline builders: the target capability descriptor that gates capability-dependent
// passes, the device description, the DNN library version, per-compile options, the
// feature flags (attention fusion, read from SPIRC_MHA), and the debug options controlling
// min/max NaN semantics, layout normalization, lowered module overrides, graph dumps and
// invariant checking.

//! Compiler configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable toggling multi-headed attention fusion.
pub const ATTENTION_FUSION_ENV: &str = "SPIRC_MHA";

/// Feature bits of a target capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilityFeatures(u32);

impl CapabilityFeatures {
    pub const NONE: Self = Self(0);
    pub const NARROW_FLOAT_CONVOLUTION: Self = Self(1 << 0);
    pub const FUSED_CONVOLUTION: Self = Self(1 << 1);
    pub const FUSED_ATTENTION: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Compute capability of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetCapability {
    pub major: u32,
    pub minor: u32,
    pub features: CapabilityFeatures,
}

impl TargetCapability {
    /// Capability with the features implied by its version: 7.x gains fused
    /// convolutions, 8.0 and later gain narrow-float convolutions and fused attention.
    pub fn new(major: u32, minor: u32) -> Self {
        let features = match major {
            0..=6 => CapabilityFeatures::NONE,
            7 => CapabilityFeatures::FUSED_CONVOLUTION,
            _ => CapabilityFeatures::ALL,
        };
        Self {
            major,
            minor,
            features,
        }
    }

    pub fn with_features(mut self, features: CapabilityFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn without(mut self, features: CapabilityFeatures) -> Self {
        self.features = self.features.difference(features);
        self
    }

    pub fn supports_narrow_float_convolution(&self) -> bool {
        self.features.contains(CapabilityFeatures::NARROW_FLOAT_CONVOLUTION)
    }

    pub fn supports_fused_convolution(&self) -> bool {
        self.features.contains(CapabilityFeatures::FUSED_CONVOLUTION)
    }

    pub fn supports_fused_attention(&self) -> bool {
        self.features.contains(CapabilityFeatures::FUSED_ATTENTION)
    }
}

impl Default for TargetCapability {
    fn default() -> Self {
        Self::new(8, 0)
    }
}

impl fmt::Display for TargetCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for TargetCapability {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (major, minor) = text.split_once('.').unwrap_or((text, "0"));
        let major = major
            .trim()
            .parse()
            .map_err(|_| format!("invalid capability major version in '{text}'"))?;
        let minor = minor
            .trim()
            .parse()
            .map_err(|_| format!("invalid capability minor version in '{text}'"))?;
        Ok(Self::new(major, minor))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub name: String,
    /// Size of a device pointer in bytes.
    pub pointer_size: u64,
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self {
            name: "spir64".to_string(),
            pointer_size: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetConfig {
    pub device: DeviceDescription,
    pub capability: TargetCapability,
}

/// Version of the DNN library backing the convolution custom calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DnnVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for DnnVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileOptions {
    pub relocatable: bool,
}

/// Feature toggles read once per pipeline build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub attention_fusion: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            attention_fusion: true,
        }
    }
}

impl FeatureFlags {
    pub fn from_env() -> Self {
        Self {
            attention_fusion: read_bool(ATTENTION_FUSION_ENV, true),
        }
    }
}

fn read_bool(key: &str, default_value: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| parse_bool(&value, default_value))
        .unwrap_or(default_value)
}

fn parse_bool(value: &str, default_value: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        _ => default_value,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugOptions {
    /// Min/max may drop NaNs.
    pub fast_min_max: bool,
    pub normalize_layouts: bool,
    /// Pre-lowered module files that may replace the in-memory module.
    pub lowered_ir_files: Vec<PathBuf>,
    pub dump_to: Option<PathBuf>,
    pub verify_invariants: bool,
}

/// Everything one compilation needs besides the graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileConfig {
    pub target: TargetConfig,
    pub dnn_version: DnnVersion,
    pub options: CompileOptions,
    pub features: FeatureFlags,
    pub debug: DebugOptions,
    pub toolchain_dir: Option<PathBuf>,
}

impl CompileConfig {
    pub fn capability(&self) -> &TargetCapability {
        &self.target.capability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_features_follow_version() {
        let old = TargetCapability::new(6, 1);
        assert!(!old.supports_fused_convolution());
        assert!(!old.supports_narrow_float_convolution());

        let volta = TargetCapability::new(7, 0);
        assert!(volta.supports_fused_convolution());
        assert!(!volta.supports_fused_attention());

        let ampere: TargetCapability = "8.6".parse().unwrap();
        assert_eq!(ampere.minor, 6);
        assert!(ampere.supports_narrow_float_convolution());
        assert!(ampere.supports_fused_attention());

        let trimmed = ampere.without(CapabilityFeatures::FUSED_ATTENTION);
        assert!(!trimmed.supports_fused_attention());
        assert!(trimmed.supports_fused_convolution());
    }

    #[test]
    fn test_capability_parse_errors() {
        assert!("x.0".parse::<TargetCapability>().is_err());
        assert_eq!("9".parse::<TargetCapability>().unwrap().major, 9);
    }

    #[test]
    fn test_bool_parsing() {
        assert!(parse_bool("1", false));
        assert!(parse_bool("TRUE", false));
        assert!(!parse_bool("0", true));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("maybe", true));
        assert!(FeatureFlags::default().attention_fusion);
    }
}
