//! Platform selection from WebDriver capabilities
//!
//! Capabilities follow the W3C shape: `alwaysMatch` holds capabilities every
//! match must satisfy, `firstMatch` holds alternatives tried in order.
//! Bare capability maps (no `alwaysMatch`/`firstMatch`) are accepted as well.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::Error;

/// Capability naming the requested platform
pub const PLATFORM_NAME_CAPABILITY: &str = "platformName";

/// Platforms that can back a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    /// In-cluster fake driver, used for testing the plumbing end to end
    Fake,
    /// Android device or emulator
    Android,
    /// iOS device or simulator
    Ios,
}

impl Platform {
    /// All supported platforms
    pub const ALL: [Platform; 3] = [Platform::Fake, Platform::Android, Platform::Ios];

    /// Canonical lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fake => "fake",
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::validation_for_field(
                    PLATFORM_NAME_CAPABILITY,
                    format!("platform '{}' is not supported", s),
                )
            })
    }
}

/// Extract and validate the requested platform from a capabilities document
///
/// `platformName` is looked up in `alwaysMatch`, then in each `firstMatch`
/// entry, then at the top level. The first occurrence wins and must be a
/// non-empty string naming a supported platform.
pub fn requested_platform(capabilities: &Value) -> Result<Platform, Error> {
    let candidate = capabilities
        .get("alwaysMatch")
        .and_then(|m| m.get(PLATFORM_NAME_CAPABILITY))
        .or_else(|| {
            capabilities
                .get("firstMatch")
                .and_then(Value::as_array)
                .and_then(|entries| {
                    entries
                        .iter()
                        .find_map(|entry| entry.get(PLATFORM_NAME_CAPABILITY))
                })
        })
        .or_else(|| capabilities.get(PLATFORM_NAME_CAPABILITY));

    match candidate {
        None | Some(Value::Null) => Err(Error::validation_for_field(
            PLATFORM_NAME_CAPABILITY,
            "the platformName capability is required",
        )),
        Some(Value::String(name)) if name.trim().is_empty() => Err(Error::validation_for_field(
            PLATFORM_NAME_CAPABILITY,
            "the platformName capability must not be empty",
        )),
        Some(Value::String(name)) => name.trim().parse(),
        Some(other) => Err(Error::validation_for_field(
            PLATFORM_NAME_CAPABILITY,
            format!("the platformName capability must be a string, got {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn platform_is_read_from_always_match() {
        let caps = json!({ "alwaysMatch": { "platformName": "Android" } });
        assert_eq!(requested_platform(&caps).unwrap(), Platform::Android);
    }

    #[test]
    fn first_match_is_used_when_always_match_has_no_platform() {
        let caps = json!({
            "alwaysMatch": { "browserName": "chrome" },
            "firstMatch": [{ "deviceName": "x" }, { "platformName": "ios" }]
        });
        assert_eq!(requested_platform(&caps).unwrap(), Platform::Ios);
    }

    #[test]
    fn bare_capability_maps_are_accepted() {
        let caps = json!({ "platformName": "fake" });
        assert_eq!(requested_platform(&caps).unwrap(), Platform::Fake);
    }

    #[test]
    fn missing_platform_is_rejected() {
        let err = requested_platform(&json!({ "alwaysMatch": {} })).unwrap_err();
        assert!(err.to_string().contains("required"));
        assert!(requested_platform(&json!({})).is_err());
        assert!(requested_platform(&json!({ "platformName": null })).is_err());
    }

    #[test]
    fn non_string_or_empty_platform_is_rejected() {
        assert!(requested_platform(&json!({ "platformName": 3 })).is_err());
        assert!(requested_platform(&json!({ "platformName": true })).is_err());
        assert!(requested_platform(&json!({ "platformName": "" })).is_err());
        assert!(requested_platform(&json!({ "platformName": "   " })).is_err());
    }

    #[test]
    fn unsupported_platform_is_rejected() {
        let err = requested_platform(&json!({ "platformName": "windows" })).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn platform_names_round_trip_through_display() {
        for platform in Platform::ALL {
            assert_eq!(platform.to_string().parse::<Platform>().unwrap(), platform);
        }
    }
}
