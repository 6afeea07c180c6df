use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Detector settings, loadable from JSON. Every field has a default, so an
/// empty object `{}` is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub desfire: DesfireConfig,
    pub piv: PivConfig,
    pub pkoc: PkocConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesfireConfig {
    /// Hardware major version reported by EV2 cards
    pub ev2_major_version: u8,
    /// Hardware major version reported by EV3 cards. Firmware revisions
    /// disagree on this value, hence configurable.
    pub ev3_major_version: u8,
    /// AIDs tried with ISO SELECT before falling back to GetVersion (hex).
    /// Any card answering one of them is reported as DESFire, so generic
    /// names such as the NDEF application (D2760000850101) do not belong here.
    pub select_aids: Vec<String>,
}

impl Default for DesfireConfig {
    fn default() -> Self {
        Self {
            ev2_major_version: 0x12,
            ev3_major_version: 0x33,
            select_aids: vec!["D2760000850100".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivConfig {
    /// Read the CHUID after a successful SELECT
    pub read_chuid: bool,
}

impl Default for PivConfig {
    fn default() -> Self {
        Self { read_chuid: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkocConfig {
    /// Send AUTHENTICATE to obtain the credential public key
    pub request_public_key: bool,
}

impl Default for PkocConfig {
    fn default() -> Self {
        Self {
            request_public_key: true,
        }
    }
}

impl DetectorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse detector configuration")
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize detector configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.desfire.ev2_major_version, 0x12);
        assert_eq!(config.desfire.ev3_major_version, 0x33);
        assert_eq!(config.desfire.select_aids, vec!["D2760000850100".to_string()]);
        assert!(config.piv.read_chuid);
        assert!(config.pkoc.request_public_key);
    }

    #[test]
    fn test_empty_object_is_default() {
        let config = DetectorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, DetectorConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config =
            DetectorConfig::from_json_str(r#"{"desfire": {"ev3_major_version": 48}}"#).unwrap();
        assert_eq!(config.desfire.ev3_major_version, 0x30);
        assert_eq!(config.desfire.ev2_major_version, 0x12);
        assert!(config.piv.read_chuid);
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut config = DetectorConfig::default();
        config.pkoc.request_public_key = false;
        let json = config.to_json().unwrap();
        assert_eq!(DetectorConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(DetectorConfig::from_json_str("not json").is_err());
        assert!(DetectorConfig::from_json_str(r#"{"desfire": {"ev3_major_version": 300}}"#).is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = DetectorConfig::from_json_file(Path::new("/nonexistent/cred-bench.json"));
        assert!(result.is_err());
    }
}
