//! Supported ADP schema versions.

use std::fmt;
use std::str::FromStr;

/// Every `adp_version` value this crate can validate.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0"];

/// A supported ADP schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaVersion {
    V0_1_0,
    V0_2_0,
}

impl SchemaVersion {
    pub const LATEST: SchemaVersion = SchemaVersion::V0_2_0;

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVersion::V0_1_0 => "0.1.0",
            SchemaVersion::V0_2_0 => "0.2.0",
        }
    }

    /// `runtime.models` was introduced in 0.2.0.
    pub fn supports_models(self) -> bool {
        self >= SchemaVersion::V0_2_0
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0.1.0" => Ok(SchemaVersion::V0_1_0),
            "0.2.0" => Ok(SchemaVersion::V0_2_0),
            other => Err(format!(
                "unsupported adp_version {other:?}, expected one of {}",
                SUPPORTED_VERSIONS.join(", ")
            )),
        }
    }
}
