// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulator configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub las: LasConfig,
    #[serde(default)]
    pub lis: LisConfig,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub test_inventory: TestInventoryConfig,
    #[serde(default)]
    pub consumable_inventory: ConsumableInventoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            las: LasConfig::default(),
            lis: LisConfig::default(),
            core: CoreConfig::default(),
            test_inventory: TestInventoryConfig::default(),
            consumable_inventory: ConsumableInventoryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.las.port == 0 {
            return Err(ConfigError::InvalidValue("las.port cannot be 0".into()));
        }
        if self.lis.port == 0 {
            return Err(ConfigError::InvalidValue("lis.port cannot be 0".into()));
        }
        if self.las.port == self.lis.port {
            return Err(ConfigError::InvalidValue(
                "las.port and lis.port must differ".into(),
            ));
        }
        if self.lis.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "lis.max_connections cannot be 0".into(),
            ));
        }
        if self.core.remote_control_status.len() != self.core.interface_positions as usize
            || self.core.lock_ownership.len() != self.core.interface_positions as usize
        {
            return Err(ConfigError::InvalidValue(
                "remote_control_status/lock_ownership length must equal interface_positions"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LasConfig {
    #[serde(default = "default_las_host")]
    pub host: String,
    #[serde(default = "default_las_port")]
    pub port: u16,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,
    #[serde(default = "default_instrument_type")]
    pub instrument_type: u16,
    #[serde(default = "default_capability_version")]
    pub capability_version: u16,
    #[serde(default = "default_software_version")]
    pub software_version: u16,
    #[serde(default = "default_instrument_id")]
    pub instrument_id: u8,
    #[serde(default = "default_instrument_serial")]
    pub instrument_serial: String,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_secs: u64,
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_las_host() -> String {
    "0.0.0.0".into()
}
fn default_las_port() -> u16 {
    10001
}
fn default_protocol_version() -> u16 {
    0x0330
}
fn default_instrument_type() -> u16 {
    0x0001
}
fn default_capability_version() -> u16 {
    0x0104
}
fn default_software_version() -> u16 {
    0x0100
}
fn default_instrument_id() -> u8 {
    0xFF
}
fn default_instrument_serial() -> String {
    "ATELLICA".into()
}
fn default_keep_alive_interval() -> u64 {
    30
}
fn default_ack_timeout() -> u64 {
    20
}
fn default_response_timeout() -> u64 {
    20
}

impl Default for LasConfig {
    fn default() -> Self {
        Self {
            host: default_las_host(),
            port: default_las_port(),
            protocol_version: default_protocol_version(),
            instrument_type: default_instrument_type(),
            capability_version: default_capability_version(),
            software_version: default_software_version(),
            instrument_id: default_instrument_id(),
            instrument_serial: default_instrument_serial(),
            keep_alive_interval_secs: default_keep_alive_interval(),
            ack_timeout_secs: default_ack_timeout(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LisConfig {
    #[serde(default = "default_lis_host")]
    pub host: String,
    #[serde(default = "default_lis_port")]
    pub port: u16,
    #[serde(default = "default_result_delay")]
    pub result_delay_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_lis_host() -> String {
    "0.0.0.0".into()
}
fn default_lis_port() -> u16 {
    10002
}
fn default_result_delay() -> u64 {
    1800
}
fn default_max_connections() -> usize {
    10
}

impl Default for LisConfig {
    fn default() -> Self {
        Self {
            host: default_lis_host(),
            port: default_lis_port(),
            result_delay_secs: default_result_delay(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_status_ok")]
    pub automation_interface_status: u8,
    #[serde(default = "default_status_ok")]
    pub instrument_process_status: u8,
    #[serde(default = "default_status_ok")]
    pub lis_connection_status: u8,
    #[serde(default = "default_interface_positions")]
    pub interface_positions: u8,
    #[serde(default = "default_remote_control_status")]
    pub remote_control_status: Vec<u8>,
    #[serde(default = "default_lock_ownership")]
    pub lock_ownership: Vec<u8>,
    #[serde(default)]
    pub processing_backlog: u16,
    #[serde(default)]
    pub sample_acquisition_delay: u16,
}

fn default_status_ok() -> u8 {
    1
}
fn default_interface_positions() -> u8 {
    2
}
fn default_remote_control_status() -> Vec<u8> {
    vec![4, 5]
}
fn default_lock_ownership() -> Vec<u8> {
    vec![2, 2]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            automation_interface_status: default_status_ok(),
            instrument_process_status: default_status_ok(),
            lis_connection_status: default_status_ok(),
            interface_positions: default_interface_positions(),
            remote_control_status: default_remote_control_status(),
            lock_ownership: default_lock_ownership(),
            processing_backlog: 0,
            sample_acquisition_delay: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSeed {
    pub name: String,
    pub count: u32,
    pub status: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestInventoryConfig {
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_test_seeds")]
    pub tests: Vec<TestSeed>,
}

fn default_threshold() -> u32 {
    10
}

fn default_test_seeds() -> Vec<TestSeed> {
    vec![
        TestSeed { name: "TEST001".into(), count: 100, status: 1 },
        TestSeed { name: "TEST002".into(), count: 50, status: 1 },
        TestSeed { name: "TEST003".into(), count: 5, status: 2 },
        TestSeed { name: "TEST004".into(), count: 0, status: 3 },
    ]
}

impl Default for TestInventoryConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            tests: default_test_seeds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumableSeed {
    pub id: u8,
    pub status: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSeed {
    pub id: String,
    pub consumables: Vec<ConsumableSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumableInventoryConfig {
    #[serde(default = "default_module_seeds")]
    pub modules: Vec<ModuleSeed>,
}

fn default_module_seeds() -> Vec<ModuleSeed> {
    vec![ModuleSeed {
        id: "MODULE001".into(),
        consumables: vec![
            ConsumableSeed { id: 1, status: 1 },  // CH Cleaner
            ConsumableSeed { id: 2, status: 1 },  // CH Conditioner
            ConsumableSeed { id: 3, status: 1 },  // CH Wash
            ConsumableSeed { id: 4, status: 1 },  // CH Diluent
            ConsumableSeed { id: 5, status: 2 },  // Pretreatment
            ConsumableSeed { id: 25, status: 1 }, // Tips
            ConsumableSeed { id: 26, status: 1 }, // Cuvettes
            ConsumableSeed { id: 27, status: 1 }, // Water
        ],
    }]
}

impl Default for ConsumableInventoryConfig {
    fn default() -> Self {
        Self {
            modules: default_module_seeds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.las.port, 10001);
        assert_eq!(config.lis.port, 10002);
        assert_eq!(config.las.protocol_version, 0x0330);
        assert_eq!(config.test_inventory.tests.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.las.port, parsed.las.port);
        assert_eq!(config.test_inventory.tests.len(), parsed.test_inventory.tests.len());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.las.instrument_serial, "ATELLICA");
        assert_eq!(parsed.lis.max_connections, 10);
    }

    #[test]
    fn test_validation_same_port_rejected() {
        let mut config = Config::default();
        config.lis.port = config.las.port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_mismatched_position_arrays() {
        let mut config = Config::default();
        config.core.remote_control_status = vec![4];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");

        let mut config = Config::default();
        config.las.port = 11001;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.las.port, 11001);
    }
}
