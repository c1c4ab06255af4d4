//! The tools version gating manifest and classifier rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A gating version declared by a manifest. Selects which classifier and
/// manifest rules apply; unrelated to package versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ToolsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolsVersion {
    /// Localization directories and opaque directory entries appear here.
    pub const V5_3: ToolsVersion = ToolsVersion::new(5, 3, 0);
    /// Directory-with-extension entries become opaque content bundles here.
    pub const V5_6: ToolsVersion = ToolsVersion::new(5, 6, 0);
    /// The tools version of the running toolchain.
    pub const CURRENT: ToolsVersion = ToolsVersion::new(6, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for ToolsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ToolsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = |required: bool| -> Result<u32, Error> {
            match parts.next() {
                Some(p) => p
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidToolsVersion(s.to_string())),
                None if required => Err(Error::InvalidToolsVersion(s.to_string())),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(false)?;
        let patch = next(false)?;
        Ok(Self::new(major, minor, patch))
    }
}

impl From<ToolsVersion> for String {
    fn from(v: ToolsVersion) -> Self {
        v.to_string()
    }
}

impl TryFrom<String> for ToolsVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(ToolsVersion::new(5, 2, 0) < ToolsVersion::V5_3);
        assert!(ToolsVersion::V5_3 < ToolsVersion::V5_6);
        assert!(ToolsVersion::V5_6 < ToolsVersion::CURRENT);
    }

    #[test]
    fn test_parse_and_format() {
        let v: ToolsVersion = "5.3.0".parse().unwrap();
        assert_eq!(v, ToolsVersion::V5_3);
        assert_eq!(v.to_string(), "5.3.0");

        let short: ToolsVersion = "5.3".parse().unwrap();
        assert_eq!(short, ToolsVersion::V5_3);

        assert!("".parse::<ToolsVersion>().is_err());
        assert!("abc".parse::<ToolsVersion>().is_err());
    }
}
