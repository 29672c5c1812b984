//! Target triplet handling

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::defaults;

/// Target a toolchain or package is built for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
    /// CPU architecture (`x86_64`, `aarch64`, `arm`, ...)
    pub arch: String,
    /// Vendor field of the triplet
    pub vendor: String,
    /// Operating system and ABI (`linux-gnu`, `linux-musl`, ...)
    pub os: String,
}

impl Target {
    /// Create a target from its parts
    pub fn new(arch: impl Into<String>, vendor: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            vendor: vendor.into(),
            os: os.into(),
        }
    }

    /// Target for an architecture with the default vendor and OS
    pub fn for_arch(arch: impl Into<String>) -> Self {
        Self::new(arch, defaults::TARGET_VENDOR, defaults::TARGET_OS)
    }

    /// Full triplet, e.g. `aarch64-weaver-linux-gnu`
    pub fn triplet(&self) -> String {
        format!("{}-{}-{}", self.arch, self.vendor, self.os)
    }

    /// Architecture name used by the Linux kernel headers
    pub fn kernel_arch(&self) -> &str {
        match self.arch.as_str() {
            "aarch64" => "arm64",
            "x86_64" | "i686" | "i586" | "i386" | "x86" => "x86",
            "armhf" | "armv7" | "armv7l" => "arm",
            "ppc" | "ppc64" | "ppc64le" | "powerpc" | "powerpc64" | "powerpc64le" => "powerpc",
            "riscv64" | "riscv32" => "riscv",
            other => other,
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::for_arch(std::env::consts::ARCH)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triplet())
    }
}

impl FromStr for Target {
    type Err = String;

    /// Accepts a bare architecture (`aarch64`) or a full triplet
    /// (`aarch64-weaver-linux-gnu`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("target must not be empty".to_string());
        }

        let mut parts = s.splitn(3, '-');
        let arch = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) => Ok(Self::for_arch(arch)),
            (Some(vendor), Some(os)) if !vendor.is_empty() && !os.is_empty() => {
                Ok(Self::new(arch, vendor, os))
            }
            _ => Err(format!(
                "'{s}' is neither an architecture nor an <arch>-<vendor>-<os> triplet"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triplet_uses_defaults() {
        let target = Target::for_arch("aarch64");
        assert_eq!(target.triplet(), "aarch64-weaver-linux-gnu");
    }

    #[test]
    fn test_kernel_arch_mapping() {
        assert_eq!(Target::for_arch("aarch64").kernel_arch(), "arm64");
        assert_eq!(Target::for_arch("x86_64").kernel_arch(), "x86");
        assert_eq!(Target::for_arch("ppc64").kernel_arch(), "powerpc");
        assert_eq!(Target::for_arch("mips").kernel_arch(), "mips");
    }

    #[test]
    fn test_parse_target() {
        let bare: Target = "armhf".parse().unwrap();
        assert_eq!(bare, Target::for_arch("armhf"));

        let full: Target = "x86_64-pc-linux-musl".parse().unwrap();
        assert_eq!(full.arch, "x86_64");
        assert_eq!(full.vendor, "pc");
        assert_eq!(full.os, "linux-musl");

        assert!("x86_64-pc".parse::<Target>().is_err());
        assert!("".parse::<Target>().is_err());
    }
}
