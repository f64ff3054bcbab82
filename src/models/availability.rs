//! Result of probing the agent binary.

use serde::Serialize;

/// Availability record returned by
/// [`Runtime::check_availability`](crate::runtime::Runtime::check_availability).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Availability {
    /// Whether the binary ran and exited successfully.
    pub available: bool,
    /// First line of the version output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Why the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Availability {
    /// Successful probe.
    #[must_use]
    pub fn available(version: String) -> Self {
        Self {
            available: true,
            version: Some(version),
            error: None,
        }
    }

    /// Failed probe.
    #[must_use]
    pub fn unavailable(error: String) -> Self {
        Self {
            available: false,
            version: None,
            error: Some(error),
        }
    }
}
