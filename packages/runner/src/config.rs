// ABOUTME: Runner configuration loaded from environment variables
// ABOUTME: Validated defaults for timeouts, port range, resource ceilings and strategy policy

use crate::env::{parse_env_or_default_with_validation, string_env_or_default};
use crate::network::NetworkProfile;
use crate::types::RunMode;
use runbox_config::{constants, defaults};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which executor handles `.js`/`.mjs` entry files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsStrategy {
    /// Embedded interpreter, no container runtime needed.
    #[default]
    Sandbox,
    /// Node runtime image.
    Container,
}

impl FromStr for JsStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" | "sandboxed" | "sandboxed-script" => Ok(JsStrategy::Sandbox),
            "container" | "docker" => Ok(JsStrategy::Container),
            other => Err(format!("unknown js strategy '{}'", other)),
        }
    }
}

/// CPU and memory ceiling applied to a container run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceCeiling {
    pub cpus: f64,
    pub memory_mb: u64,
}

impl ResourceCeiling {
    /// Clamp a requested allocation to this ceiling. Missing values take the ceiling.
    pub fn clamp(&self, cpus: Option<f64>, memory_mb: Option<u64>) -> ResourceCeiling {
        let cpus = cpus
            .filter(|c| c.is_finite() && *c > 0.0)
            .map(|c| c.min(self.cpus))
            .unwrap_or(self.cpus);
        let memory_mb = memory_mb
            .filter(|m| *m > 0)
            .map(|m| m.min(self.memory_mb))
            .unwrap_or(self.memory_mb);
        ResourceCeiling { cpus, memory_mb }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub workspaces_path: PathBuf,
    pub js_strategy: JsStrategy,
    pub script_timeout: Duration,
    pub script_memory_mb: u64,
    pub node_env: String,
    pub container_timeout: Duration,
    pub port_range: RangeInclusive<u16>,
    /// Skip ports another process on the host is already bound to.
    pub probe_host_ports: bool,
    pub preview_host: String,
    pub shared: ResourceCeiling,
    pub dedicated: ResourceCeiling,
    pub stdout_buffer_bytes: usize,
    pub reaper_interval: Duration,
    pub stop_grace: Duration,
    /// How long a finished workspace keeps its last status and output.
    pub idle_slot_retention: Duration,
    /// Applied to workspaces without their own network profile.
    pub default_network: NetworkProfile,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspaces_path: PathBuf::from(defaults::WORKSPACES_PATH),
            js_strategy: JsStrategy::default(),
            script_timeout: Duration::from_millis(defaults::SCRIPT_TIMEOUT_MS),
            script_memory_mb: defaults::SCRIPT_MEMORY_MB,
            node_env: defaults::NODE_ENV.to_string(),
            container_timeout: Duration::from_secs(defaults::CONTAINER_TIMEOUT_SECS),
            port_range: defaults::PORT_RANGE_START..=defaults::PORT_RANGE_END,
            probe_host_ports: true,
            preview_host: defaults::PREVIEW_HOST.to_string(),
            shared: ResourceCeiling {
                cpus: defaults::SHARED_CPUS,
                memory_mb: defaults::SHARED_MEMORY_MB,
            },
            dedicated: ResourceCeiling {
                cpus: defaults::DEDICATED_CPUS,
                memory_mb: defaults::DEDICATED_MEMORY_MB,
            },
            stdout_buffer_bytes: defaults::STDOUT_BUFFER_BYTES,
            reaper_interval: Duration::from_millis(defaults::REAPER_INTERVAL_MS),
            stop_grace: Duration::from_millis(defaults::STOP_GRACE_MS),
            idle_slot_retention: Duration::from_secs(defaults::IDLE_SLOT_RETENTION_SECS),
            default_network: NetworkProfile::default(),
        }
    }
}

impl RunnerConfig {
    /// Build the configuration from the process environment.
    ///
    /// Every variable is optional. Values that fail to parse or validate are
    /// logged and replaced by their defaults, so this never fails.
    pub fn from_env() -> Self {
        let base = Self::default();

        let workspaces_path = PathBuf::from(string_env_or_default(
            constants::RUNBOX_WORKSPACES_PATH,
            defaults::WORKSPACES_PATH,
        ));

        let js_strategy = match std::env::var(constants::RUNBOX_JS_STRATEGY) {
            Ok(raw) => raw.parse::<JsStrategy>().unwrap_or_else(|e| {
                tracing::warn!("{}: {}, using sandbox", constants::RUNBOX_JS_STRATEGY, e);
                JsStrategy::Sandbox
            }),
            Err(_) => JsStrategy::default(),
        };

        let script_timeout_ms = parse_env_or_default_with_validation(
            constants::RUNBOX_SCRIPT_TIMEOUT_MS,
            defaults::SCRIPT_TIMEOUT_MS,
            |v| v > 0 && v <= 10 * 60 * 1000,
        );
        let script_memory_mb = parse_env_or_default_with_validation(
            constants::RUNBOX_SCRIPT_MEMORY_MB,
            defaults::SCRIPT_MEMORY_MB,
            |v| (4..=4096).contains(&v),
        );
        let container_timeout_secs = parse_env_or_default_with_validation(
            constants::RUNBOX_CONTAINER_TIMEOUT_SECS,
            defaults::CONTAINER_TIMEOUT_SECS,
            |v| v > 0,
        );

        let range_start = parse_env_or_default_with_validation(
            constants::RUNBOX_PORT_RANGE_START,
            defaults::PORT_RANGE_START,
            |v| v >= 1024,
        );
        let range_end = parse_env_or_default_with_validation(
            constants::RUNBOX_PORT_RANGE_END,
            defaults::PORT_RANGE_END,
            |v| v >= 1024,
        );
        let port_range = if range_start <= range_end {
            range_start..=range_end
        } else {
            tracing::warn!(
                "Port range {}..={} is empty, using default {:?}",
                range_start,
                range_end,
                base.port_range
            );
            base.port_range.clone()
        };

        let shared = ResourceCeiling {
            cpus: parse_env_or_default_with_validation(
                constants::RUNBOX_SHARED_CPUS,
                defaults::SHARED_CPUS,
                |v| v > 0.0,
            ),
            memory_mb: parse_env_or_default_with_validation(
                constants::RUNBOX_SHARED_MEMORY_MB,
                defaults::SHARED_MEMORY_MB,
                |v| v >= 16,
            ),
        };
        let dedicated = ResourceCeiling {
            cpus: parse_env_or_default_with_validation(
                constants::RUNBOX_DEDICATED_CPUS,
                defaults::DEDICATED_CPUS,
                |v| v > 0.0,
            ),
            memory_mb: parse_env_or_default_with_validation(
                constants::RUNBOX_DEDICATED_MEMORY_MB,
                defaults::DEDICATED_MEMORY_MB,
                |v| v >= 16,
            ),
        };

        Self {
            workspaces_path,
            js_strategy,
            script_timeout: Duration::from_millis(script_timeout_ms),
            script_memory_mb,
            node_env: string_env_or_default(constants::NODE_ENV, defaults::NODE_ENV),
            container_timeout: Duration::from_secs(container_timeout_secs),
            port_range,
            probe_host_ports: base.probe_host_ports,
            preview_host: string_env_or_default(
                constants::RUNBOX_PREVIEW_HOST,
                defaults::PREVIEW_HOST,
            ),
            shared,
            dedicated,
            stdout_buffer_bytes: parse_env_or_default_with_validation(
                constants::RUNBOX_STDOUT_BUFFER_BYTES,
                defaults::STDOUT_BUFFER_BYTES,
                |v| v >= 1024,
            ),
            reaper_interval: Duration::from_millis(parse_env_or_default_with_validation(
                constants::RUNBOX_REAPER_INTERVAL_MS,
                defaults::REAPER_INTERVAL_MS,
                |v| v >= 10,
            )),
            stop_grace: Duration::from_millis(parse_env_or_default_with_validation(
                constants::RUNBOX_STOP_GRACE_MS,
                defaults::STOP_GRACE_MS,
                |v| v > 0,
            )),
            idle_slot_retention: Duration::from_secs(parse_env_or_default_with_validation(
                constants::RUNBOX_IDLE_SLOT_RETENTION_SECS,
                defaults::IDLE_SLOT_RETENTION_SECS,
                |_| true,
            )),
            default_network: NetworkProfile::from_env(),
        }
    }

    /// Ceiling for the given run mode.
    pub fn ceiling(&self, mode: RunMode) -> ResourceCeiling {
        match mode {
            RunMode::Shared => self.shared,
            RunMode::Dedicated => self.dedicated,
        }
    }
}
