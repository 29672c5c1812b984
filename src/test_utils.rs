//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid component name (lowercase alphanumeric with hyphens)
    pub fn component_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,20}"
    }

    /// Generate a valid semver version string
    pub fn semver_version() -> impl Strategy<Value = String> {
        (0u32..100, 0u32..100, 0u32..100)
            .prop_map(|(major, minor, patch)| format!("{major}.{minor}.{patch}"))
    }

    /// Generate a compiler flag list
    pub fn flag_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(
            prop_oneof![
                "-O[0-3s]",
                "-f[a-z]{2,8}",
                "-m[a-z0-9]{2,6}",
                "-D[A-Z_]{1,10}",
            ],
            0..6,
        )
    }

    /// Generate a target architecture
    pub fn arch() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("x86_64".to_string()),
            Just("aarch64".to_string()),
            Just("riscv64".to_string()),
            Just("armv7".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::core::catalog::validate_name;
    use crate::core::version::parse_version;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_component_name_generator(name in component_name()) {
            prop_assert!(validate_name(&name).is_ok());
        }

        #[test]
        fn test_semver_version_generator(version in semver_version()) {
            prop_assert!(parse_version(&version).is_ok());
        }

        #[test]
        fn test_flag_list_generator(flags in flag_list()) {
            prop_assert!(flags.len() < 6);
            prop_assert!(flags.iter().all(|f| f.starts_with('-') && f.len() >= 3));
        }

        #[test]
        fn test_arch_generator(arch in arch()) {
            prop_assert!(!arch.is_empty());
        }
    }
}
