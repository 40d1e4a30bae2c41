//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Agent process settings: what to spawn and how hard to supervise it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary launched once per room (e.g. `coach-agent`).
    pub binary: String,
    /// Default arguments passed to the agent binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Hard ceiling on concurrently live agent processes.
    #[serde(default = "default_max_agents")]
    pub max_agents: u32,
    /// Seconds to wait after SIGTERM before escalating to SIGKILL.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
    /// Maximum automatic respawns after an unclean exit with humans present.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Base delay between crash and respawn, multiplied by the attempt number.
    #[serde(default = "default_restart_backoff_seconds")]
    pub restart_backoff_seconds: u64,
}

fn default_max_agents() -> u32 {
    8
}

fn default_kill_grace_seconds() -> u64 {
    5
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_backoff_seconds() -> u64 {
    2
}

/// Room lifecycle timing: grace period, sweep intervals, staleness thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LifecycleConfig {
    /// Reconnection window after the last human leaves a room.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
    /// Interval between garbage-collection sweeps.
    #[serde(default = "default_gc_interval_seconds")]
    pub gc_interval_seconds: u64,
    /// Interval between agent liveness checks.
    #[serde(default = "default_health_interval_seconds")]
    pub health_interval_seconds: u64,
    /// Age past which an EMPTY room is removed by the GC.
    #[serde(default = "default_stale_room_seconds")]
    pub stale_room_seconds: u64,
    /// Heartbeat age past which the health sweep logs a staleness warning.
    #[serde(default = "default_heartbeat_stale_seconds")]
    pub heartbeat_stale_seconds: u64,
}

fn default_grace_period_seconds() -> u64 {
    60
}

fn default_gc_interval_seconds() -> u64 {
    30
}

fn default_health_interval_seconds() -> u64 {
    10
}

fn default_stale_room_seconds() -> u64 {
    300
}

fn default_heartbeat_stale_seconds() -> u64 {
    45
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: default_grace_period_seconds(),
            gc_interval_seconds: default_gc_interval_seconds(),
            health_interval_seconds: default_health_interval_seconds(),
            stale_room_seconds: default_stale_room_seconds(),
            heartbeat_stale_seconds: default_heartbeat_stale_seconds(),
        }
    }
}

fn default_http_port() -> u16 {
    8420
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP port for the webhook ingress and control API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Agent process settings.
    pub agent: AgentConfig,
    /// Lifecycle timing settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reconnection grace period as a [`Duration`].
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.lifecycle.grace_period_seconds)
    }

    /// SIGTERM-to-SIGKILL escalation window as a [`Duration`].
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.agent.kill_grace_seconds)
    }

    /// Respawn delay for the given 1-based restart attempt.
    #[must_use]
    pub fn restart_backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.agent.restart_backoff_seconds * u64::from(attempt))
    }

    fn validate(&self) -> Result<()> {
        if self.agent.binary.is_empty() {
            return Err(AppError::Config("agent.binary must not be empty".into()));
        }

        if self.agent.max_agents == 0 {
            return Err(AppError::Config(
                "agent.max_agents must be greater than zero".into(),
            ));
        }

        if self.lifecycle.grace_period_seconds == 0 {
            return Err(AppError::Config(
                "lifecycle.grace_period_seconds must be greater than zero".into(),
            ));
        }

        if self.lifecycle.gc_interval_seconds == 0 || self.lifecycle.health_interval_seconds == 0 {
            return Err(AppError::Config(
                "lifecycle sweep intervals must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
