//! Serializable limit configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};
use crate::limits::{CpuRateControl, MemoryLimits};

/// Limits to apply to a resource group, as read from a config file
///
/// ```json
/// { "memory": { "max_job_memory": 268435456 }, "cpu_rate": 0.5 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub memory: MemoryLimits,
    /// Fraction of total CPU time (1.0 = 100%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_rate: Option<f64>,
}

impl LimitsConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: LimitsConfig = serde_json::from_str(s)
            .map_err(|e| JobError::InvalidConfig(format!("Failed to parse limits: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            JobError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        if let Some(fraction) = self.cpu_rate {
            CpuRateControl::hard_cap(fraction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_limits_config_default() {
        let config = LimitsConfig::default();
        assert!(config.memory.is_empty());
        assert!(config.cpu_rate.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_limits_config_from_json() {
        let config = LimitsConfig::from_json_str(
            r#"{"memory": {"min_working_set": 4096, "max_working_set": 8192}, "cpu_rate": 0.5}"#,
        )
        .unwrap();
        assert_eq!(config.memory, MemoryLimits::with_working_set(4096, 8192));
        assert_eq!(config.cpu_rate, Some(0.5));
    }

    #[test]
    fn test_limits_config_rejects_invalid() {
        assert!(LimitsConfig::from_json_str(r#"{"cpu_rate": -1.0}"#).is_err());
        assert!(LimitsConfig::from_json_str(r#"{"memory": {"max_job_memory": 0}}"#).is_err());
        assert!(LimitsConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_limits_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"memory": {{"max_job_memory": 1024}}}}"#).unwrap();

        let config = LimitsConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.memory.max_job_memory, Some(1024));
    }

    #[test]
    fn test_limits_config_missing_file() {
        let err = LimitsConfig::from_json_file("/nonexistent/limits.json").unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));
    }
}
