//! Configuration types for toolforge

use crate::error::{ForgeError, Result};
use crate::tools::CapabilitySet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Session defaults
    pub session: SessionConfig,

    /// Execution router configuration
    pub router: RouterConfig,

    /// Composite scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Code sandbox configuration
    pub sandbox: SandboxConfig,

    /// Dynamic tool registry configuration
    pub registry: RegistryConfig,
}

/// Session defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capability tokens granted to new sessions (`none` for no capabilities)
    pub default_capabilities: Vec<String>,

    /// Skip confirmation for moderate-risk tools
    pub yolo_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_capabilities: vec!["file_read".to_string()],
            yolo_mode: false,
        }
    }
}

impl SessionConfig {
    /// Granted capabilities as a set
    pub fn capabilities(&self) -> Result<CapabilitySet> {
        CapabilitySet::from_tokens(&self.default_capabilities).map_err(|e| {
            ForgeError::Configuration(format!("session.default_capabilities: {}", e))
        })
    }
}

/// Execution router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Upper bound for a whole composite invocation
    #[serde(with = "humantime_serde")]
    pub composite_timeout: Duration,

    /// How long to wait for a confirmation before rejecting (unbounded if unset)
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub approval_timeout: Option<Duration>,

    /// Deepest allowed composite nesting
    pub max_nesting_depth: usize,

    /// Upper bound for a single built-in tool call (unbounded if unset)
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub builtin_timeout: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            composite_timeout: Duration::from_secs(300),
            approval_timeout: None,
            max_nesting_depth: 8,
            builtin_timeout: None,
        }
    }
}

/// Composite scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Steps of one composite running at the same time
    pub max_concurrent_steps: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 8,
        }
    }
}

/// Code sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit per run
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Lua heap limit
    pub memory_limit_bytes: usize,

    /// Instructions between deadline and cancellation checks
    pub instruction_interval: u32,

    /// Longest error message returned to the caller
    pub max_error_chars: usize,

    /// Output captured per stream by `host.exec`
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_limit_bytes: 32 * 1024 * 1024,
            instruction_interval: 10_000,
            max_error_chars: 512,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Dynamic tool registry configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Time after registration at which a tool expires
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub entry_ttl: Option<Duration>,
}

impl ForgeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `toolforge.toml` in the working directory
    /// 3. `TOOLFORGE_` environment variables (`__` separates sections,
    ///    e.g. `TOOLFORGE_SANDBOX__TIMEOUT=30s`)
    /// 4. The file named by `TOOLFORGE_CONFIG_PATH`
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or the result fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(ForgeConfig::default()))
            .merge(Toml::file("toolforge.toml"))
            .merge(Env::prefixed("TOOLFORGE_").ignore(&["CONFIG_PATH"]).split("__"));

        if let Ok(path) = std::env::var("TOOLFORGE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: ForgeConfig = figment.extract().map_err(|e| {
            ForgeError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: ForgeConfig = Figment::from(Serialized::defaults(ForgeConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                ForgeError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.session.capabilities()?;

        let zero = |name: &str| ForgeError::Configuration(format!("{} must be greater than zero", name));
        if self.scheduler.max_concurrent_steps == 0 {
            return Err(zero("scheduler.max_concurrent_steps"));
        }
        if self.sandbox.instruction_interval == 0 {
            return Err(zero("sandbox.instruction_interval"));
        }
        if self.sandbox.timeout.is_zero() {
            return Err(zero("sandbox.timeout"));
        }
        if self.sandbox.memory_limit_bytes == 0 {
            return Err(zero("sandbox.memory_limit_bytes"));
        }
        if self.router.composite_timeout.is_zero() {
            return Err(zero("router.composite_timeout"));
        }
        if self.router.max_nesting_depth == 0 {
            return Err(zero("router.max_nesting_depth"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use crate::tools::Capability;

    #[test]
    fn test_defaults_are_valid() {
        let config = ForgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.router.composite_timeout, Duration::from_secs(300));
        assert_eq!(config.sandbox.memory_limit_bytes, 32 * 1024 * 1024);
        assert!(config.session.capabilities().unwrap().contains(Capability::FileRead));
    }

    #[test]
    fn test_from_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolforge.toml");
        std::fs::write(
            &path,
            r#"
[session]
default_capabilities = ["file_read", "file_write"]
yolo_mode = true

[sandbox]
timeout = "2s"

[registry]
entry_ttl = "1h"
"#,
        )
        .unwrap();

        let config = ForgeConfig::from_file(&path).unwrap();
        assert!(config.session.yolo_mode);
        assert_eq!(config.session.capabilities().unwrap().len(), 2);
        assert_eq!(config.sandbox.timeout, Duration::from_secs(2));
        assert_eq!(config.sandbox.instruction_interval, 10_000);
        assert_eq!(config.registry.entry_ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ForgeConfig::default();
        config.scheduler.max_concurrent_steps = 0;
        assert!(matches!(config.validate(), Err(ForgeError::Configuration(_))));

        let mut config = ForgeConfig::default();
        config.session.default_capabilities = vec!["teleport".to_string()];
        assert!(config.validate().is_err());

        let mut config = ForgeConfig::default();
        config.session.default_capabilities = vec!["none".to_string(), "file_read".to_string()];
        assert!(config.validate().is_err());
    }
}
