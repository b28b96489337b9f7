// ABOUTME: Per-workspace network condition profiles (latency and failure rate)
// ABOUTME: Advisory settings applied to preview traffic and passed into containers

use crate::env::parse_env_or_default_with_validation;
use crate::error::{RunnerError, RunnerResult};
use runbox_config::constants;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Simulated network conditions for a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkProfile {
    pub latency_ms: u64,
    /// Probability in `[0, 1]` that a preview request fails.
    pub failure_rate: f64,
}

impl NetworkProfile {
    /// Process-wide default from `NETWORK_LATENCY` and `NETWORK_FAILURE_RATE`.
    pub fn from_env() -> Self {
        Self {
            latency_ms: parse_env_or_default_with_validation(
                constants::NETWORK_LATENCY,
                0_u64,
                |v| v <= 60_000,
            ),
            failure_rate: parse_env_or_default_with_validation(
                constants::NETWORK_FAILURE_RATE,
                0.0_f64,
                |v| (0.0..=1.0).contains(&v),
            ),
        }
    }

    pub fn validate(&self) -> RunnerResult<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(RunnerError::InvalidOptions {
                reason: format!("failure rate {} is outside [0, 1]", self.failure_rate),
            });
        }
        if self.latency_ms > 60_000 {
            return Err(RunnerError::InvalidOptions {
                reason: format!("latency {}ms exceeds 60000ms", self.latency_ms),
            });
        }
        Ok(())
    }

    pub fn is_noop(&self) -> bool {
        self.latency_ms == 0 && self.failure_rate <= 0.0
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Decide a request's fate from a uniform roll in `[0, 1)`.
    pub fn should_fail(&self, roll: f64) -> bool {
        roll < self.failure_rate
    }

    /// Environment passed to containers so in-container tooling can honor the profile.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            (
                constants::NETWORK_LATENCY.to_string(),
                self.latency_ms.to_string(),
            ),
            (
                constants::NETWORK_FAILURE_RATE.to_string(),
                self.failure_rate.to_string(),
            ),
        ]
    }
}

/// Lock-protected map of workspace id to profile.
#[derive(Clone, Default)]
pub struct NetworkProfiles {
    profiles: Arc<RwLock<HashMap<String, NetworkProfile>>>,
    default_profile: NetworkProfile,
}

impl NetworkProfiles {
    pub fn new(default_profile: NetworkProfile) -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
            default_profile,
        }
    }

    pub fn get(&self, workspace_id: &str) -> Option<NetworkProfile> {
        let profiles = self.profiles.read().unwrap_or_else(|p| p.into_inner());
        profiles.get(workspace_id).copied()
    }

    /// The workspace's profile, or the process default.
    pub fn effective(&self, workspace_id: &str) -> NetworkProfile {
        self.get(workspace_id).unwrap_or(self.default_profile)
    }

    pub fn set(&self, workspace_id: &str, profile: NetworkProfile) -> RunnerResult<()> {
        profile.validate()?;
        let mut profiles = self.profiles.write().unwrap_or_else(|p| p.into_inner());
        profiles.insert(workspace_id.to_string(), profile);
        Ok(())
    }

    pub fn clear(&self, workspace_id: &str) -> Option<NetworkProfile> {
        let mut profiles = self.profiles.write().unwrap_or_else(|p| p.into_inner());
        profiles.remove(workspace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_falls_back_to_default() {
        let default_profile = NetworkProfile {
            latency_ms: 50,
            failure_rate: 0.0,
        };
        let profiles = NetworkProfiles::new(default_profile);
        assert_eq!(profiles.effective("W1"), default_profile);

        let custom = NetworkProfile {
            latency_ms: 200,
            failure_rate: 0.25,
        };
        profiles.set("W1", custom).unwrap();
        assert_eq!(profiles.effective("W1"), custom);
        assert_eq!(profiles.effective("W2"), default_profile);

        assert_eq!(profiles.clear("W1"), Some(custom));
        assert_eq!(profiles.effective("W1"), default_profile);
    }

    #[test]
    fn test_rejects_invalid_failure_rate() {
        let profiles = NetworkProfiles::default();
        let bad = NetworkProfile {
            latency_ms: 0,
            failure_rate: 1.5,
        };
        assert!(profiles.set("W1", bad).is_err());
        assert!(profiles.get("W1").is_none());
    }

    #[test]
    fn test_should_fail_uses_roll() {
        let profile = NetworkProfile {
            latency_ms: 0,
            failure_rate: 0.3,
        };
        assert!(profile.should_fail(0.1));
        assert!(!profile.should_fail(0.3));
        assert!(!NetworkProfile::default().should_fail(0.0));
        assert!(NetworkProfile::default().is_noop());
    }
}
