use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::gps::LocationRequest;
use crate::workflow::{TransitionRules, WorkflowSettings};

/// Main configuration structure for the courier workflow
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Location capture settings
    pub gps: GpsConfig,
    /// Gate placement
    pub workflow: WorkflowRulesConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GpsConfig {
    /// One-shot location timeout
    pub timeout_seconds: u64,
    /// Request the most precise fix the device offers
    pub high_accuracy: bool,
    /// Oldest cached fix the device may answer with (0 = always fresh)
    pub maximum_age_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkflowRulesConfig {
    /// Check the reschedule date when confirming proof, in addition to at
    /// completion
    pub require_reschedule_date_at_confirm: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level / filter directive
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            high_accuracy: true,
            maximum_age_ms: 0,
        }
    }
}

impl Default for WorkflowRulesConfig {
    fn default() -> Self {
        Self {
            require_reschedule_date_at_confirm: true,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            gps: GpsConfig::default(),
            workflow: WorkflowRulesConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl WorkflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values (`#[serde(default)]`)
    /// 2. Configuration file (courier-workflow.toml)
    /// 3. Environment variables (prefixed with COURIER_WORKFLOW__)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("courier-workflow.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("COURIER_WORKFLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn location_request(&self) -> LocationRequest {
        LocationRequest {
            high_accuracy: self.gps.high_accuracy,
            timeout: Duration::from_secs(self.gps.timeout_seconds),
            maximum_age: Duration::from_millis(self.gps.maximum_age_ms),
        }
    }
}

impl From<&WorkflowConfig> for WorkflowSettings {
    fn from(config: &WorkflowConfig) -> Self {
        WorkflowSettings {
            location: config.location_request(),
            rules: TransitionRules {
                require_reschedule_date_at_confirm: config
                    .workflow
                    .require_reschedule_date_at_confirm,
            },
        }
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<WorkflowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = WorkflowConfig::load_env_file();
        WorkflowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static WorkflowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
