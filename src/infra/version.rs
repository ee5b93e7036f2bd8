// ============================================================
// Layer 6 — Runtime Version Check
// ============================================================
// The one precondition checked before any work starts: the
// runtime must be at least MIN_RUNTIME_VERSION. Versions are
// plain `major.minor.patch`; a pre-release or build suffix
// ("-rc1", "+abc") is ignored for the comparison.

use anyhow::{bail, ensure, Context, Result};
use std::fmt;
use std::str::FromStr;

/// Version of this runtime
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest runtime the processor pipeline accepts
pub const MIN_RUNTIME_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Version of the running binary
    pub fn runtime() -> Result<Self> {
        RUNTIME_VERSION.parse()
    }

    pub fn min_supported() -> Result<Self> {
        MIN_RUNTIME_VERSION.parse()
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();
        let parts: Vec<&str> = core.split('.').collect();
        ensure!(
            (1..=3).contains(&parts.len()) && parts.iter().all(|p| !p.is_empty()),
            "invalid version string '{s}'"
        );

        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .with_context(|| format!("invalid version component '{part}' in '{s}'"))?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Fail fast when `actual` is older than `min`
pub fn ensure_at_least(actual: Version, min: Version) -> Result<()> {
    if actual < min {
        bail!("runtime version must be at least {min}, found {actual}");
    }
    Ok(())
}

/// Check the running binary against MIN_RUNTIME_VERSION
pub fn check_runtime() -> Result<Version> {
    let actual = Version::runtime()?;
    ensure_at_least(actual, Version::min_supported()?)?;
    tracing::debug!("Runtime version {actual} satisfies minimum {MIN_RUNTIME_VERSION}");
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!("2.44.1".parse::<Version>().unwrap(), Version::new(2, 44, 1));
        assert_eq!("2.44".parse::<Version>().unwrap(),   Version::new(2, 44, 0));
        assert_eq!("3".parse::<Version>().unwrap(),      Version::new(3, 0, 0));
        assert_eq!("1.2.3-rc1".parse::<Version>().unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Version>().is_err());
        assert!("1..2".parse::<Version>().is_err());
        assert!("1.x.2".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(Version::new(2, 44, 1) > Version::new(2, 9, 9));
        assert!(ensure_at_least(Version::new(2, 44, 1), Version::new(2, 44, 1)).is_ok());
        let err = ensure_at_least(Version::new(2, 43, 0), Version::new(2, 44, 1))
            .unwrap_err()
            .to_string();
        assert!(err.contains("at least 2.44.1"));
    }

    #[test]
    fn test_running_binary_passes() {
        assert!(check_runtime().is_ok());
    }
}
