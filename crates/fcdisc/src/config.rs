// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration.
//!
//! ```toml
//! name = "fc0"
//! wwpn = "10:00:00:90:fa:00:00:01"
//! wwnn = "20:00:00:90:fa:00:00:01"
//! use_adisc = true
//!
//! [[retry_rules]]
//! commands = ["PLOGI"]
//! status = { kind = "ls_rjt", reason = "logical_busy" }
//! retry = true
//! delay_ms = 2000
//! max_retries = 10
//! ```

use crate::els::retry::RetryRule;
use crate::protocol::{Fc4Roles, Wwn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-adapter engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Adapter name (used in log lines).
    #[serde(default = "default_name")]
    pub name: String,

    /// Physical port WWPN.
    pub wwpn: Wwn,

    /// Physical port WWNN.
    pub wwnn: Wwn,

    /// Upper bound on node objects per vport.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    /// Revalidate still-registered logins with ADISC instead of PLOGI.
    #[serde(default = "default_true")]
    pub use_adisc: bool,

    /// Maximum PLOGI/ADISC exchanges in flight during discovery.
    #[serde(default = "default_max_concurrent_discovery")]
    pub max_concurrent_discovery: usize,

    /// Discovery run timeout (milliseconds).
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,

    /// Affected-port pages kept before falling back to full re-discovery.
    #[serde(default = "default_rscn_capacity")]
    pub rscn_capacity: usize,

    /// Allow virtual ports (FDISC).
    #[serde(default = "default_true")]
    pub npiv_enabled: bool,

    /// Log in to the management server after the name server.
    #[serde(default)]
    pub fdmi_enabled: bool,

    /// Error detect timeout advertised in our service parameters (milliseconds).
    #[serde(default = "default_e_d_tov")]
    pub e_d_tov_ms: u32,

    /// Resource allocation timeout advertised in our service parameters (milliseconds).
    #[serde(default = "default_r_a_tov")]
    pub r_a_tov_ms: u32,

    /// Per-attempt ELS timeout (milliseconds).
    #[serde(default = "default_els_timeout")]
    pub els_timeout_ms: u64,

    /// Retry budget for failures with no specific rule.
    #[serde(default = "default_max_els_retries")]
    pub max_els_retries: u32,

    /// Delay before a node in NPR is logged in again (milliseconds).
    #[serde(default = "default_node_retry_delay")]
    pub node_retry_delay_ms: u64,

    /// Act as an FCP initiator.
    #[serde(default = "default_true")]
    pub initiator: bool,

    /// Act as an FCP target.
    #[serde(default)]
    pub target: bool,

    /// Retry rules consulted before the built-in table.
    #[serde(default)]
    pub retry_rules: Vec<RetryRule>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_name() -> String {
    "fc0".to_string()
}

fn default_max_nodes() -> usize {
    512
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_discovery() -> usize {
    32
}

fn default_discovery_timeout() -> u64 {
    20_000
}

fn default_rscn_capacity() -> usize {
    32
}

fn default_e_d_tov() -> u32 {
    2_000
}

fn default_r_a_tov() -> u32 {
    10_000
}

fn default_els_timeout() -> u64 {
    20_000
}

fn default_max_els_retries() -> u32 {
    3
}

fn default_node_retry_delay() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Configuration with defaults for the given port names.
    pub fn new(wwpn: Wwn, wwnn: Wwn) -> Self {
        Self {
            name: default_name(),
            wwpn,
            wwnn,
            max_nodes: default_max_nodes(),
            use_adisc: true,
            max_concurrent_discovery: default_max_concurrent_discovery(),
            discovery_timeout_ms: default_discovery_timeout(),
            rscn_capacity: default_rscn_capacity(),
            npiv_enabled: true,
            fdmi_enabled: false,
            e_d_tov_ms: default_e_d_tov(),
            r_a_tov_ms: default_r_a_tov(),
            els_timeout_ms: default_els_timeout(),
            max_els_retries: default_max_els_retries(),
            node_retry_delay_ms: default_node_retry_delay(),
            initiator: true,
            target: false,
            retry_rules: Vec::new(),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wwpn.is_zero() || self.wwnn.is_zero() {
            return Err(ConfigError::Invalid("wwpn and wwnn must be non-zero".into()));
        }
        if self.max_nodes == 0 {
            return Err(ConfigError::Invalid("max_nodes cannot be 0".into()));
        }
        if self.max_concurrent_discovery == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_discovery cannot be 0".into(),
            ));
        }
        if self.rscn_capacity == 0 {
            return Err(ConfigError::Invalid("rscn_capacity cannot be 0".into()));
        }
        if self.e_d_tov_ms == 0 || self.r_a_tov_ms < self.e_d_tov_ms {
            return Err(ConfigError::Invalid(format!(
                "r_a_tov_ms ({}) must be >= e_d_tov_ms ({}) and both non-zero",
                self.r_a_tov_ms, self.e_d_tov_ms
            )));
        }
        if !self.initiator && !self.target {
            return Err(ConfigError::Invalid(
                "port must be an initiator, a target, or both".into(),
            ));
        }
        for (i, rule) in self.retry_rules.iter().enumerate() {
            if rule.retry && rule.max_retries == 0 {
                return Err(ConfigError::Invalid(format!(
                    "retry rule {} retries with max_retries = 0",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn roles(&self) -> Fc4Roles {
        Fc4Roles {
            initiator: self.initiator,
            target: self.target,
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn els_timeout(&self) -> Duration {
        Duration::from_millis(self.els_timeout_ms)
    }

    pub fn node_retry_delay(&self) -> Duration {
        Duration::from_millis(self.node_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::els::retry::StatusMatch;
    use crate::protocol::{ElsCommand, RejectReason};
    use std::io::Write;

    fn base() -> EngineConfig {
        EngineConfig::new(Wwn::new(0x1000_0000_c9aa_0001), Wwn::new(0x2000_0000_c9aa_0001))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = base();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_els_retries, 3);
        assert_eq!(config.rscn_capacity, 32);
        assert!(config.use_adisc);
    }

    #[test]
    fn test_zero_names_rejected() {
        let config = EngineConfig::new(Wwn::ZERO, Wwn::new(1));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_timeouts_must_be_ordered() {
        let config = EngineConfig {
            r_a_tov_ms: 1_000,
            e_d_tov_ms: 2_000,
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roles_required() {
        let config = EngineConfig {
            initiator: false,
            target: false,
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml_with_retry_rule() {
        let text = r#"
            name = "fc1"
            wwpn = "10:00:00:90:fa:00:00:01"
            wwnn = "20:00:00:90:fa:00:00:01"
            use_adisc = false

            [[retry_rules]]
            commands = ["PLOGI"]
            status = { kind = "ls_rjt", reason = "logical_busy" }
            retry = true
            delay_ms = 2000
            max_retries = 10
        "#;
        let config = EngineConfig::from_toml_str(text).expect("parse");
        assert_eq!(config.name, "fc1");
        assert!(!config.use_adisc);
        assert_eq!(config.max_nodes, 512);
        assert_eq!(config.retry_rules.len(), 1);
        let rule = &config.retry_rules[0];
        assert_eq!(rule.commands, vec![ElsCommand::Plogi.into()]);
        assert_eq!(
            rule.status,
            StatusMatch::LsRjt {
                reason: RejectReason::LogicalBusy,
                explanation: None
            }
        );
        assert_eq!(rule.max_retries, 10);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "wwpn = \"10:00:00:90:fa:00:00:02\"\nwwnn = \"20:00:00:90:fa:00:00:02\"\nmax_nodes = 8"
        )
        .expect("write");
        let config = EngineConfig::from_file(file.path()).expect("load");
        assert_eq!(config.max_nodes, 8);
        assert_eq!(config.wwpn.to_string(), "10:00:00:90:fa:00:00:02");
    }

    #[test]
    fn test_retry_rule_without_budget_rejected() {
        let text = r#"
            wwpn = "10:00:00:90:fa:00:00:01"
            wwnn = "20:00:00:90:fa:00:00:01"

            [[retry_rules]]
            status = { kind = "nport_busy" }
            retry = true
            max_retries = 0
        "#;
        assert!(EngineConfig::from_toml_str(text).is_err());
    }
}
