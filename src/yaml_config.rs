//! YAML configuration loader: the five top-level keys (`env`, `tests`,
//! `variables`, `requests`, `runner`) described in spec.md §6.2.
//!
//! Grounded on the teacher's `yaml_config.rs` (duration newtype,
//! `#[serde(default = "...")]` idiom, dedicated error enum) and cross-checked
//! against `original_source/domain.go`'s `config:"..."` field names.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{RequestItem, RunnerConfig, Variable};
use crate::errors::ConfigError;

/// The full, deserialized YAML configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlConfig {
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub requests: Vec<RequestItem>,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// A named fixture under the test-suite runner's `tests` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub path: String,
    #[serde(default)]
    pub compress: bool,
}

impl YamlConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: YamlConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.concurrency == 0 {
            return Err(ConfigError::InvalidField(
                "runner.concurrency must be at least 1".to_string(),
            ));
        }
        if self.requests.is_empty() && self.tests.is_empty() {
            return Err(ConfigError::InvalidField(
                "config must define at least one of 'requests' or 'tests'".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
runner:
  concurrency: 4
  total_rounds: 10
requests:
  - request:
      url: "http://example.test/ping"
"#;
        let config = YamlConfig::parse(yaml).unwrap();
        assert_eq!(config.runner.concurrency, 4);
        assert_eq!(config.runner.total_rounds, 10);
        assert_eq!(config.requests.len(), 1);
        assert_eq!(config.requests[0].request.url, "http://example.test/ping");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let yaml = r#"
runner:
  concurrency: 0
requests:
  - request:
      url: "http://example.test/"
"#;
        let err = YamlConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(_)));
    }

    #[test]
    fn rejects_config_with_no_work() {
        let yaml = "runner:\n  concurrency: 1\n";
        let err = YamlConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(_)));
    }

    #[test]
    fn defaults_runner_config_when_key_absent() {
        let yaml = r#"
requests:
  - request:
      url: "http://example.test/"
"#;
        let config = YamlConfig::parse(yaml).unwrap();
        assert_eq!(config.runner.concurrency, 1);
        assert_eq!(config.runner.total_rounds, 1);
    }

    #[test]
    fn parses_variables_section() {
        let yaml = r#"
variables:
  - type: sequence32
    name: seq
    start: 100
requests:
  - request:
      url: "http://example.test/$[[seq]]"
"#;
        let config = YamlConfig::parse(yaml).unwrap();
        assert_eq!(config.variables.len(), 1);
        assert_eq!(config.variables[0].name, "seq");
    }

    #[test]
    fn parses_range_variable_with_from_to_keys() {
        let yaml = r#"
variables:
  - type: range
    name: n
    from: 1
    to: 3
requests:
  - request:
      url: "http://example.test/$[[n]]"
"#;
        let config = YamlConfig::parse(yaml).unwrap();
        assert_eq!(config.variables[0].start, Some(1));
        assert_eq!(config.variables[0].end, Some(3));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = YamlConfig::parse("not: [valid, yaml: here").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn parses_test_suite_runner_section() {
        let yaml = r#"
tests:
  - path: "fixtures/basic"
    compress: true
"#;
        let config = YamlConfig::parse(yaml).unwrap();
        assert_eq!(config.tests.len(), 1);
        assert_eq!(config.tests[0].path, "fixtures/basic");
        assert!(config.tests[0].compress);
    }
}
