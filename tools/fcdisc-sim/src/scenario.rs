// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scenario files.
//!
//! ```toml
//! [adapter]
//! wwpn = "10:00:00:90:fa:00:00:01"
//! wwnn = "20:00:00:90:fa:00:00:01"
//!
//! [fabric]
//! kind = "fabric"
//! name = "10:00:00:05:1e:00:00:01"
//! npiv = true
//!
//! [[ports]]
//! wwpn = "21:00:00:24:ff:00:00:01"
//! wwnn = "20:00:00:24:ff:00:00:01"
//! did = 66048
//!
//! [[steps]]
//! kind = "offline"
//! wwpn = "21:00:00:24:ff:00:00:01"
//!
//! [[steps]]
//! kind = "rscn"
//! dids = [66048]
//! ```

use fcdisc::transport::loopback::{LoopbackTopology, RemotePort};
use fcdisc::{ConfigError, EngineConfig, FcId, Wwn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("Invalid adapter section: {0}")]
    Adapter(#[from] ConfigError),

    #[error("Invalid scenario: {0}")]
    Invalid(String),
}

/// NPIV port created once the physical port is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VportSpec {
    pub wwpn: Wwn,
    pub wwnn: Wwn,
}

/// Fabric change applied after the initial discovery settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Deliver an RSCN naming these ports to the physical port.
    Rscn { dids: Vec<FcId> },
    /// Withdraw a port from the name server.
    Offline { wwpn: Wwn },
    /// Bring a withdrawn port back.
    Online { wwpn: Wwn },
    /// Re-address a port.
    Move { wwpn: Wwn, did: FcId },
    AddPort { port: RemotePort },
    LinkDown,
    LinkUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Time allowed for each settle (milliseconds).
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_ms: u64,
    pub adapter: EngineConfig,
    #[serde(default)]
    pub fabric: LoopbackTopology,
    #[serde(default)]
    pub ports: Vec<RemotePort>,
    #[serde(default)]
    pub vports: Vec<VportSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_settle_timeout() -> u64 {
    30_000
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        self.adapter.validate()?;
        for (i, port) in self.ports.iter().enumerate() {
            if port.wwpn.is_zero() {
                return Err(ScenarioError::Invalid(format!("port {} has a zero wwpn", i)));
            }
            if !port.did.is_assigned() || port.did.is_well_known() {
                return Err(ScenarioError::Invalid(format!(
                    "port {} uses reserved address {}",
                    i, port.did
                )));
            }
            if self.ports[..i].iter().any(|p| p.did == port.did) {
                return Err(ScenarioError::Invalid(format!(
                    "address {} assigned twice",
                    port.did
                )));
            }
        }
        if !self.vports.is_empty() && !self.adapter.npiv_enabled {
            return Err(ScenarioError::Invalid(
                "vports listed but npiv_enabled = false".into(),
            ));
        }
        let known = |wwpn: &Wwn| self.ports.iter().any(|p| p.wwpn == *wwpn);
        for step in &self.steps {
            match step {
                Step::Offline { wwpn } | Step::Online { wwpn } | Step::Move { wwpn, .. }
                    if !known(wwpn) =>
                {
                    return Err(ScenarioError::Invalid(format!("step names unknown port {}", wwpn)));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Two targets behind a switch, one NPIV port, one port leaving.
    pub fn example() -> Self {
        let target = |n: u64, did: u32| {
            RemotePort::target(
                Wwn::new(0x2100_0024_ff00_0000 + n),
                Wwn::new(0x2000_0024_ff00_0000 + n),
                FcId::new(did),
            )
        };
        let first = target(1, 0x01_02_00);
        let mut adapter = EngineConfig::new(
            Wwn::new(0x1000_0090_fa00_0001),
            Wwn::new(0x2000_0090_fa00_0001),
        );
        adapter.name = "sim0".into();

        Self {
            settle_timeout_ms: default_settle_timeout(),
            adapter,
            fabric: LoopbackTopology::default(),
            steps: vec![
                Step::Offline { wwpn: first.wwpn },
                Step::Rscn {
                    dids: vec![first.did],
                },
            ],
            ports: vec![first, target(2, 0x01_03_00)],
            vports: vec![VportSpec {
                wwpn: Wwn::new(0x1000_0090_fa00_0101),
                wwnn: Wwn::new(0x2000_0090_fa00_0101),
            }],
        }
    }

    pub fn to_toml(&self) -> Result<String, ScenarioError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_example_survives_file_round_trip() {
        let example = Scenario::example();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(example.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = Scenario::from_file(file.path()).unwrap();
        assert_eq!(loaded.ports, example.ports);
        assert_eq!(loaded.vports, example.vports);
        assert_eq!(loaded.steps, example.steps);
        assert_eq!(loaded.fabric, example.fabric);
        assert_eq!(loaded.adapter.wwpn, example.adapter.wwpn);
    }

    #[test]
    fn test_minimal_scenario_defaults() {
        let scenario = Scenario::from_toml_str(
            r#"
[adapter]
wwpn = "10:00:00:90:fa:00:00:01"
wwnn = "20:00:00:90:fa:00:00:01"

[[ports]]
wwpn = "21:00:00:24:ff:00:00:01"
wwnn = "20:00:00:24:ff:00:00:01"
did = 0x010200
"#,
        )
        .unwrap();
        assert_eq!(scenario.fabric, LoopbackTopology::default());
        assert!(scenario.ports[0].target && scenario.ports[0].online);
        assert!(scenario.steps.is_empty());
    }

    #[test]
    fn test_point_to_point_and_steps_parse() {
        let scenario = Scenario::from_toml_str(
            r#"
[adapter]
wwpn = "10:00:00:90:fa:00:00:01"
wwnn = "20:00:00:90:fa:00:00:01"

[fabric]
kind = "point_to_point"

[[ports]]
wwpn = "21:00:00:24:ff:00:00:01"
wwnn = "20:00:00:24:ff:00:00:01"
did = 0x0000e8

[[steps]]
kind = "link_down"

[[steps]]
kind = "link_up"
"#,
        )
        .unwrap();
        assert_eq!(scenario.fabric, LoopbackTopology::PointToPoint);
        assert_eq!(scenario.steps, vec![Step::LinkDown, Step::LinkUp]);
    }

    #[test]
    fn test_invalid_scenarios_rejected() {
        let duplicate = r#"
[adapter]
wwpn = "10:00:00:90:fa:00:00:01"
wwnn = "20:00:00:90:fa:00:00:01"

[[ports]]
wwpn = "21:00:00:24:ff:00:00:01"
wwnn = "20:00:00:24:ff:00:00:01"
did = 0x010200

[[ports]]
wwpn = "21:00:00:24:ff:00:00:02"
wwnn = "20:00:00:24:ff:00:00:02"
did = 0x010200
"#;
        assert!(matches!(
            Scenario::from_toml_str(duplicate),
            Err(ScenarioError::Invalid(_))
        ));

        let unknown = r#"
[adapter]
wwpn = "10:00:00:90:fa:00:00:01"
wwnn = "20:00:00:90:fa:00:00:01"

[[steps]]
kind = "offline"
wwpn = "21:00:00:24:ff:00:00:09"
"#;
        assert!(matches!(
            Scenario::from_toml_str(unknown),
            Err(ScenarioError::Invalid(_))
        ));

        let zero = r#"
[adapter]
wwpn = "00:00:00:00:00:00:00:00"
wwnn = "20:00:00:90:fa:00:00:01"
"#;
        assert!(matches!(
            Scenario::from_toml_str(zero),
            Err(ScenarioError::Adapter(_))
        ));
    }
}
