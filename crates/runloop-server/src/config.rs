// runloop-server/src/config.rs
// ============================================================================
// Module: Server Configuration
// Description: TOML-backed configuration for the Runloop server.
// Purpose: Enumerate recognized options with defaults and fail-closed checks.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration loads from a TOML file and validates before the server
//! starts. Every recognized option is enumerated here with its default;
//! unknown keys are rejected so typos fail loudly instead of silently
//! reverting to defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;

use runloop_core::EntryLimits;
use runloop_core::PersistenceMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config read failed: {0}")]
    Io(String),
    /// The TOML failed to parse or carried unknown keys.
    #[error("config parse failed: {0}")]
    Parse(String),
    /// A recognized option carried an invalid value.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Bind port (0 picks an ephemeral port).
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// Returns the default bind address.
const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Returns the default bind port.
const fn default_port() -> u16 {
    8710
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-memory store (volatile).
    #[default]
    Memory,
    /// SQLite store (durable).
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Backend kind.
    #[serde(default)]
    pub kind: StoreKind,
    /// Database path (required for the sqlite backend).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Per-event persistence strategy labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum E2eTestMode {
    /// Synchronous persistence for reproducible runs.
    #[default]
    Deterministic,
    /// Best-effort asynchronous persistence.
    Production,
}

impl E2eTestMode {
    /// Returns the entry-facing persistence mode.
    #[must_use]
    pub const fn persistence_mode(self) -> PersistenceMode {
        match self {
            Self::Deterministic => PersistenceMode::Deterministic,
            Self::Production => PersistenceMode::Production,
        }
    }
}

/// Execution entry configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    /// Maximum execution attempts per stream.
    #[serde(default = "default_max_react_attempts")]
    pub max_react_attempts: u32,
    /// Maximum consecutive failed attempts.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Maximum total repair-loop seconds.
    #[serde(default = "default_max_react_seconds")]
    pub max_react_seconds: u64,
    /// Maximum model calls per stream.
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: u32,
    /// Confirmation wait budget in seconds.
    #[serde(default = "default_confirm_timeout_seconds")]
    pub confirm_timeout_seconds: u64,
    /// Per-event persistence strategy.
    #[serde(default)]
    pub e2e_test_mode: E2eTestMode,
    /// Test-only switch skipping all run writes.
    #[serde(default)]
    pub disable_run_persistence: bool,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_react_attempts: default_max_react_attempts(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_react_seconds: default_max_react_seconds(),
            max_llm_calls: default_max_llm_calls(),
            confirm_timeout_seconds: default_confirm_timeout_seconds(),
            e2e_test_mode: E2eTestMode::Deterministic,
            disable_run_persistence: false,
        }
    }
}

impl ExecutionSection {
    /// Returns the entry-facing limit bundle.
    #[must_use]
    pub const fn limits(&self) -> EntryLimits {
        EntryLimits {
            max_react_attempts: self.max_react_attempts,
            max_consecutive_failures: self.max_consecutive_failures,
            max_react_seconds: self.max_react_seconds,
            max_llm_calls: self.max_llm_calls,
            confirm_timeout_seconds: self.confirm_timeout_seconds,
        }
    }
}

/// Returns the default attempt cap.
const fn default_max_react_attempts() -> u32 {
    6
}

/// Returns the default consecutive-failure cap.
const fn default_max_consecutive_failures() -> u32 {
    3
}

/// Returns the default repair-loop time budget.
const fn default_max_react_seconds() -> u64 {
    600
}

/// Returns the default model-call cap.
const fn default_max_llm_calls() -> u32 {
    20
}

/// Returns the default confirmation wait budget.
const fn default_confirm_timeout_seconds() -> u64 {
    300
}

/// Acceptance loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptanceSection {
    /// Acceptance attempt cap.
    #[serde(default = "default_max_replan_attempts")]
    pub max_replan_attempts: u32,
    /// PASS precondition: a test report reference must exist.
    #[serde(default = "default_require_test_report")]
    pub require_test_report_for_pass: bool,
}

impl Default for AcceptanceSection {
    fn default() -> Self {
        Self {
            max_replan_attempts: default_max_replan_attempts(),
            require_test_report_for_pass: default_require_test_report(),
        }
    }
}

/// Returns the default replan attempt cap.
const fn default_max_replan_attempts() -> u32 {
    3
}

/// Returns the default PASS test-report requirement.
const fn default_require_test_report() -> bool {
    true
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Complete server configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RunloopConfig {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerSection,
    /// Storage configuration.
    #[serde(default)]
    pub store: StoreSection,
    /// Execution entry configuration.
    #[serde(default)]
    pub execution: ExecutionSection,
    /// Acceptance loop configuration.
    #[serde(default)]
    pub acceptance: AcceptanceSection,
}

impl RunloopConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path).map_err(|error| ConfigError::Io(error.to_string()))?;
        let config: Self =
            toml::from_str(&raw).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates option values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.kind == StoreKind::Sqlite && self.store.path.is_none() {
            return Err(ConfigError::Invalid("sqlite store requires store.path".to_string()));
        }
        if self.execution.max_react_attempts == 0 {
            return Err(ConfigError::Invalid("max_react_attempts must be >= 1".to_string()));
        }
        if self.execution.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_failures must be >= 1".to_string(),
            ));
        }
        if self.execution.confirm_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("confirm_timeout_seconds must be >= 1".to_string()));
        }
        if self.acceptance.max_replan_attempts == 0 {
            return Err(ConfigError::Invalid("max_replan_attempts must be >= 1".to_string()));
        }
        Ok(())
    }
}
