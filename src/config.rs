//! Configuration surface.
//!
//! Grounded in `examples/original_source/src/log/config.go` and
//! `src/distributedLog/config.go`. The redesign flag in spec §9 ("global
//! configuration state") is honored here: there is no module-level mutable
//! config. A `Config` value is built once (from YAML via `serde_yaml`, the
//! teacher's pattern for its own optional `serde`/`serde_json` stack
//! extended to YAML since the original loads a YAML file) and threaded
//! explicitly into `Agent::new`.

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};

/// Segment rollover thresholds and the log's starting offset.
///
/// Defaults and validation follow `Config.Init`/`Config.Validate` in
/// `src/log/config.go` and `src/distributedLog/config.go`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub max_store_bytes: u64,
    pub max_index_bytes: u64,
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: 1024,
            max_index_bytes: 1024,
            initial_offset: 0,
        }
    }
}

/// Width of a store length prefix (`[len: u64]`), spec §3.
pub const LEN_WIDTH: u64 = 8;
/// Width of one index entry (`[rel_offset: u32][pos: u64]`), spec §3.
pub const ENTRY_WIDTH: u64 = 12;

impl SegmentConfig {
    /// Fill zero-valued fields with the teacher's 1024-byte defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.max_store_bytes == 0 {
            self.max_store_bytes = 1024;
        }
        if self.max_index_bytes == 0 {
            self.max_index_bytes = 1024;
        }
        self
    }

    pub fn validate(&self) -> LogResult<()> {
        if self.max_store_bytes < LEN_WIDTH {
            return Err(LogError::InvalidConfig(
                "max_store_bytes can't be smaller than the length prefix width",
            ));
        }
        if self.max_index_bytes < ENTRY_WIDTH {
            return Err(LogError::InvalidConfig(
                "max_index_bytes can't be smaller than one index entry",
            ));
        }
        Ok(())
    }

    /// Same as `validate`, but additionally enforces `initial_offset >= 1`,
    /// required when the log is driven by the replicator (raft log index 0
    /// is reserved). Mirrors `distributedLog.Config.Validate`.
    pub fn validate_replicated(&self) -> LogResult<()> {
        self.validate()?;
        if self.initial_offset == 0 {
            return Err(LogError::InvalidConfig(
                "initial_offset must be >= 1 in replicated mode; 0 is reserved by raft",
            ));
        }
        Ok(())
    }
}

/// Raft / cluster-membership settings, mirroring the `Raft` block embedded
/// in `distributedLog.Config` plus the server-list entries from
/// `src/config/config.go`'s YAML schema (spec §6, "Configuration surface").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    pub node_name: String,
    pub bootstrap: bool,
    pub bind_addr: String,
    pub rpc_port: u16,
    pub serf_port: u16,
    #[serde(default)]
    pub join_addr: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    pub data_dir: String,
}

/// TLS material paths. TLS configuration itself is out of scope (spec §1);
/// this is the minimal plumbing the agent needs to hand paths to tonic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertsConfig {
    pub ca_file: String,
    pub server_cert_file: String,
    pub server_key_file: String,
    pub acl_model_file: String,
    pub acl_policy_file: String,
}

/// Top-level configuration loaded from YAML by the `server`/`client`
/// binaries, mirroring `config.Config` in `src/config/config.go` (without
/// its package-level `viper` globals — see spec §9's redesign flag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub segment: SegmentConfig,
    pub raft: RaftConfig,
    pub certs: CertsConfig,
}

impl Config {
    pub fn from_yaml_str(s: &str) -> crate::error::Result<Self> {
        let mut cfg: Config =
            serde_yaml::from_str(s).map_err(|e| crate::error::Error::Config(e.to_string()))?;
        cfg.segment = cfg.segment.with_defaults();
        if cfg.segment.initial_offset == 0 {
            cfg.segment.initial_offset = 1;
        }
        cfg.segment
            .validate_replicated()
            .map_err(crate::error::Error::Log)?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let s = std::fs::read_to_string(path).map_err(LogError::Io).map_err(crate::error::Error::Log)?;
        Self::from_yaml_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_zero_fields() {
        let cfg = SegmentConfig {
            max_store_bytes: 0,
            max_index_bytes: 0,
            initial_offset: 0,
        }
        .with_defaults();
        assert_eq!(cfg.max_store_bytes, 1024);
        assert_eq!(cfg.max_index_bytes, 1024);
    }

    #[test]
    fn validate_rejects_undersized_caps() {
        let cfg = SegmentConfig {
            max_store_bytes: 4,
            max_index_bytes: 1024,
            initial_offset: 0,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn replicated_mode_requires_nonzero_initial_offset() {
        let cfg = SegmentConfig {
            max_store_bytes: 1024,
            max_index_bytes: 1024,
            initial_offset: 0,
        };
        assert!(cfg.validate_replicated().is_err());
        let cfg = SegmentConfig {
            initial_offset: 1,
            ..cfg
        };
        assert!(cfg.validate_replicated().is_ok());
    }
}
