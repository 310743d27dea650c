// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.
//!
//! The configuration is read once at startup and shared immutably; there is no
//! hot reload.

use crate::core::runner::SCRIPT_PLACEHOLDER;
use crate::core::slot::SlotPolicy;
use crate::core::verdict::DEFAULT_FAIL_KEYWORDS;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settings for the controller slot and the runs it guards.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionConfig {
    /// What to do when a run request finds the controller busy.
    #[serde(default)]
    pub policy: SlotPolicy,
    /// How long a run request may wait for the controller.
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// How long the server waits for one operation before reporting a timeout.
    #[serde(default = "default_run_timeout", with = "humantime_serde")]
    pub run_timeout: Duration,
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_run_timeout() -> Duration {
    Duration::from_secs(35)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: SlotPolicy::default(),
            acquire_timeout: default_acquire_timeout(),
            run_timeout: default_run_timeout(),
        }
    }
}

/// Which `OperationRunner` drives the controller.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerKind {
    /// Answer every run without touching hardware.
    #[default]
    DryRun,
    /// Invoke an external program once per run.
    Process,
}

/// Configuration for the operation runner.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunnerConfig {
    #[serde(default)]
    pub kind: RunnerKind,
    /// Program started by the `process` runner.
    #[serde(default)]
    pub program: String,
    /// Argument template; `{script}` is replaced with the script path.
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,
    /// Simulated run time of the `dry-run` runner.
    #[serde(default, with = "humantime_serde")]
    pub dry_run_delay: Duration,
    /// Messages containing any of these (case-insensitive) turn a run into `FAIL`.
    #[serde(default = "default_fail_keywords")]
    pub fail_keywords: Vec<String>,
}

fn default_runner_args() -> Vec<String> {
    vec![SCRIPT_PLACEHOLDER.to_string()]
}
fn default_fail_keywords() -> Vec<String> {
    DEFAULT_FAIL_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            kind: RunnerKind::default(),
            program: String::new(),
            args: default_runner_args(),
            dry_run_delay: Duration::ZERO,
            fail_keywords: default_fail_keywords(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9187
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_max_line_length")]
    max_line_length: usize,
    #[serde(default = "default_max_repeat")]
    max_repeat: u32,
    #[serde(default, with = "humantime_serde")]
    idle_timeout: Duration,
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    shutdown_grace: Duration,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    runner: RunnerConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    12345
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    64
}
fn default_max_line_length() -> usize {
    4096
}
fn default_max_repeat() -> u32 {
    1000
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    pub max_line_length: usize,
    pub max_repeat: u32,
    /// Connections silent for this long are closed. `None` disables the check.
    pub idle_timeout: Option<Duration>,
    /// How long shutdown waits for an in-flight run before abandoning it.
    pub shutdown_grace: Duration,
    pub session: SessionConfig,
    pub runner: RunnerConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            max_line_length: default_max_line_length(),
            max_repeat: default_max_repeat(),
            idle_timeout: None,
            shutdown_grace: default_shutdown_grace(),
            session: SessionConfig::default(),
            runner: RunnerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Like `from_file`, but falls back to the defaults when `path` does not exist.
    ///
    /// The second value is false when the defaults were used. Nothing is logged
    /// here because this runs before the subscriber is installed.
    pub fn load_or_default(path: &str) -> Result<(Self, bool)> {
        if Path::new(path).exists() {
            Ok((Self::from_file(path)?, true))
        } else {
            let config = Config::default();
            config.validate()?;
            Ok((config, false))
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let idle_timeout = if raw_config.idle_timeout.is_zero() {
            None
        } else {
            Some(raw_config.idle_timeout)
        };

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            max_line_length: raw_config.max_line_length,
            max_repeat: raw_config.max_repeat,
            idle_timeout,
            shutdown_grace: raw_config.shutdown_grace,
            session: raw_config.session,
            runner: raw_config.runner,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_repeat == 0 {
            return Err(anyhow!("max_repeat cannot be 0"));
        }
        if self.max_line_length < 16 {
            return Err(anyhow!("max_line_length must be at least 16 bytes"));
        }
        if self.session.run_timeout.is_zero() {
            return Err(anyhow!("session.run_timeout cannot be 0"));
        }
        if self.session.acquire_timeout.is_zero() {
            return Err(anyhow!("session.acquire_timeout cannot be 0"));
        }

        if let RunnerKind::Process = self.runner.kind {
            if self.runner.program.trim().is_empty() {
                return Err(anyhow!(
                    "runner.program cannot be empty when runner.kind is 'process'"
                ));
            }
            if !self
                .runner
                .args
                .iter()
                .any(|arg| arg.contains(SCRIPT_PLACEHOLDER))
            {
                return Err(anyhow!(
                    "runner.args must contain the '{}' placeholder",
                    SCRIPT_PLACEHOLDER
                ));
            }
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }

    /// Settings that are valid but probably not what the operator meant.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.runner.fail_keywords.is_empty() {
            warnings.push(
                "runner.fail_keywords is empty; only the runner status decides PASS/FAIL."
                    .to_string(),
            );
        }
        warnings
    }
}
