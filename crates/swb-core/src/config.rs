//! Workbench configuration
//!
//! Loaded from TOML, with environment overrides applied on top.

use crate::error::WorkbenchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding [`WorkbenchConfig::api_base_url`]
pub const ENV_API_URL: &str = "SWB_API_URL";

/// Environment variable overriding [`WorkbenchConfig::delegation_policy`]
pub const ENV_DELEGATION_POLICY: &str = "SWB_DELEGATION_POLICY";

/// How a delegation batch reports individual task failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationPolicy {
    /// Any failure fails the whole batch; nothing is committed
    #[default]
    AllOrNothing,
    /// Each task reports its own outcome; successes are committed
    PartialSuccess,
}

impl FromStr for DelegationPolicy {
    type Err = WorkbenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" => Ok(Self::AllOrNothing),
            "partial_success" => Ok(Self::PartialSuccess),
            other => Err(WorkbenchError::Config(format!(
                "unknown delegation policy: {other}"
            ))),
        }
    }
}

/// Request method used to open the enhancement stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMethod {
    /// `POST /specs/{id}/enhance?stream=true`
    Post,
    /// `GET /specs/{id}/enhance?stream=true`
    Get,
}

impl std::fmt::Display for StreamMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Post => f.write_str("POST"),
            Self::Get => f.write_str("GET"),
        }
    }
}

/// Workbench configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Backend origin; REST paths live under `/api`
    pub api_base_url: String,
    /// Timeout for save, fetch and phase calls
    pub request_timeout_secs: u64,
    /// Maximum gap between two enhancement chunks
    pub stream_idle_timeout_secs: u64,
    /// Per-task delegation timeout
    pub delegation_timeout_secs: u64,
    /// Batch failure policy for delegation
    pub delegation_policy: DelegationPolicy,
    /// Stream methods tried in order by the enhancement ingestor
    pub enhance_methods: Vec<StreamMethod>,
    /// Delay before the details panel collapses
    pub details_collapse_delay_ms: u64,
    /// Cached template entries
    pub template_cache_capacity: u64,
}

impl WorkbenchConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `WorkbenchError::Config` on malformed TOML or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, WorkbenchError> {
        let config: Self =
            toml::from_str(text).map_err(|e| WorkbenchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and apply environment overrides
    ///
    /// # Errors
    /// `WorkbenchError::Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkbenchError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| WorkbenchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)?.apply_env()
    }

    /// Apply `SWB_*` environment overrides
    ///
    /// # Errors
    /// `WorkbenchError::Config` if an override holds an invalid value
    pub fn apply_env(self) -> Result<Self, WorkbenchError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, WorkbenchError> {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(policy) = lookup(ENV_DELEGATION_POLICY) {
            self.delegation_policy = policy.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), WorkbenchError> {
        if self.api_base_url.trim().is_empty() {
            return Err(WorkbenchError::Config("api_base_url is empty".to_string()));
        }
        if self.enhance_methods.is_empty() {
            return Err(WorkbenchError::Config(
                "enhance_methods must list at least one method".to_string(),
            ));
        }
        if self.request_timeout_secs == 0
            || self.stream_idle_timeout_secs == 0
            || self.delegation_timeout_secs == 0
        {
            return Err(WorkbenchError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// With backend origin
    #[inline]
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// With delegation policy
    #[inline]
    #[must_use]
    pub fn with_delegation_policy(mut self, policy: DelegationPolicy) -> Self {
        self.delegation_policy = policy;
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// With per-task delegation timeout
    #[inline]
    #[must_use]
    pub fn with_delegation_timeout_secs(mut self, secs: u64) -> Self {
        self.delegation_timeout_secs = secs;
        self
    }

    /// With stream idle timeout
    #[inline]
    #[must_use]
    pub fn with_stream_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.stream_idle_timeout_secs = secs;
        self
    }

    /// With enhancement stream methods
    #[inline]
    #[must_use]
    pub fn with_enhance_methods(mut self, methods: Vec<StreamMethod>) -> Self {
        self.enhance_methods = methods;
        self
    }

    /// With details collapse delay
    #[inline]
    #[must_use]
    pub fn with_details_collapse_delay_ms(mut self, ms: u64) -> Self {
        self.details_collapse_delay_ms = ms;
        self
    }

    /// Request timeout as a duration
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Stream idle timeout as a duration
    #[inline]
    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Delegation timeout as a duration
    #[inline]
    #[must_use]
    pub fn delegation_timeout(&self) -> Duration {
        Duration::from_secs(self.delegation_timeout_secs)
    }

    /// Collapse delay as a duration
    #[inline]
    #[must_use]
    pub fn details_collapse_delay(&self) -> Duration {
        Duration::from_millis(self.details_collapse_delay_ms)
    }
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 60,
            stream_idle_timeout_secs: 120,
            delegation_timeout_secs: 300,
            delegation_policy: DelegationPolicy::AllOrNothing,
            enhance_methods: vec![StreamMethod::Post, StreamMethod::Get],
            details_collapse_delay_ms: 2000,
            template_cache_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = WorkbenchConfig::new();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.delegation_policy, DelegationPolicy::AllOrNothing);
        assert_eq!(config.enhance_methods, vec![StreamMethod::Post, StreamMethod::Get]);
        assert_eq!(config.details_collapse_delay(), Duration::from_secs(2));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = WorkbenchConfig::from_toml_str(
            r#"
            api_base_url = "https://specs.example.com"
            delegation_policy = "partial_success"
            enhance_methods = ["get"]
            "#,
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://specs.example.com");
        assert_eq!(config.delegation_policy, DelegationPolicy::PartialSuccess);
        assert_eq!(config.enhance_methods, vec![StreamMethod::Get]);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(WorkbenchConfig::from_toml_str("enhance_methods = []").is_err());
        assert!(WorkbenchConfig::from_toml_str("request_timeout_secs = 0").is_err());
        assert!(WorkbenchConfig::from_toml_str("delegation_policy = \"sometimes\"").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "http://backend:9000"),
            (ENV_DELEGATION_POLICY, "partial-success"),
        ]);
        let config = WorkbenchConfig::new()
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.api_base_url, "http://backend:9000");
        assert_eq!(config.delegation_policy, DelegationPolicy::PartialSuccess);

        let bad = WorkbenchConfig::new()
            .apply_overrides(|k| (k == ENV_DELEGATION_POLICY).then(|| "maybe".to_string()));
        assert!(matches!(bad, Err(WorkbenchError::Config(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "delegation_timeout_secs = 30").unwrap();
        let config = WorkbenchConfig::load(file.path()).unwrap();
        assert_eq!(config.delegation_timeout(), Duration::from_secs(30));
    }
}
