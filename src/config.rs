//! Planner configuration snapshot.
//!
//! Captured once when the planning components are constructed and threaded
//! explicitly through every call. Nothing reads ambient global state.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::pool::PoolId;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// Hardware capability limits reported by the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCaps {
    /// QPs opened per connection, one per [`crate::qp::QpRole`].
    pub max_qps_per_connection: u32,
    /// Rotating scale-out connection sets per remote rank.
    pub max_qp_sets: u32,
    pub max_streams: u32,
    pub max_reduction_slots: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            max_qps_per_connection: crate::qp::QP_ROLES as u32,
            max_qp_sets: 4,
            max_streams: 2,
            max_reduction_slots: 8,
        }
    }
}

/// Geometry of a single staging pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolGeometry {
    pub slot_bytes: u64,
    pub slots: u32,
}

/// Layout of the device staging area. Pools are laid out back to back from
/// `base_addr` in [`PoolId::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub base_addr: u64,
    pub scale_out: PoolGeometry,
    pub scale_out_gdr: PoolGeometry,
    pub reduce_scale_up: PoolGeometry,
    pub scale_up_all_to_all: PoolGeometry,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_addr: 0x1000_0000,
            scale_out: PoolGeometry {
                slot_bytes: MIB,
                slots: 16,
            },
            scale_out_gdr: PoolGeometry {
                slot_bytes: MIB,
                slots: 8,
            },
            reduce_scale_up: PoolGeometry {
                slot_bytes: MIB,
                slots: 16,
            },
            scale_up_all_to_all: PoolGeometry {
                slot_bytes: MIB,
                slots: 8,
            },
        }
    }
}

impl PoolConfig {
    pub fn geometry(&self, pool: PoolId) -> PoolGeometry {
        match pool {
            PoolId::ScaleOut => self.scale_out,
            PoolId::ScaleOutGdr => self.scale_out_gdr,
            PoolId::ReduceScaleUp => self.reduce_scale_up,
            PoolId::ScaleUpAllToAll => self.scale_up_all_to_all,
        }
    }
}

/// Immutable configuration snapshot shared by every planning component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub slice_size_bytes: u64,
    /// Slice size used when direct remote memory is available and the
    /// communicator spans more than one box.
    pub gdr_slice_size_bytes: u64,
    pub direct_remote_memory: bool,
    pub host_nic: bool,
    /// Broadcasts of at most this many bytes run as a flat fan-out.
    pub complex_bcast_min_size: u64,
    pub use_single_peer_broadcast: bool,
    pub single_peer_broadcast_allowed: bool,
    pub min_imb_size_factor: u64,
    pub scaleout_reduction_buffers: u32,
    pub caps: DeviceCaps,
    pub pools: PoolConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            slice_size_bytes: 256 * KIB,
            gdr_slice_size_bytes: MIB,
            direct_remote_memory: false,
            host_nic: false,
            complex_bcast_min_size: 64 * KIB,
            use_single_peer_broadcast: false,
            single_peer_broadcast_allowed: true,
            min_imb_size_factor: 8,
            scaleout_reduction_buffers: 1,
            caps: DeviceCaps::default(),
            pools: PoolConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: PlannerConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        for bytes in [self.slice_size_bytes, self.gdr_slice_size_bytes] {
            if bytes == 0 || !bytes.is_power_of_two() {
                return Err(ConfigError::InvalidSliceSize { bytes });
            }
        }
        if self.min_imb_size_factor == 0 {
            return Err(ConfigError::Invalid(
                "min_imb_size_factor must be at least 1".to_string(),
            ));
        }
        if self.caps.max_qp_sets == 0 {
            return Err(ConfigError::Invalid(
                "max_qp_sets must be at least 1".to_string(),
            ));
        }
        if self.caps.max_qps_per_connection as usize != crate::qp::QP_ROLES {
            return Err(ConfigError::Invalid(format!(
                "max_qps_per_connection must be {}, got {}",
                crate::qp::QP_ROLES,
                self.caps.max_qps_per_connection
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = PlannerConfig::from_json_str(r#"{ "slice_size_bytes": 1024, "host_nic": true }"#)
            .unwrap();
        assert_eq!(cfg.slice_size_bytes, 1024);
        assert!(cfg.host_nic);
        assert_eq!(cfg.gdr_slice_size_bytes, MIB);
        assert_eq!(cfg.caps, DeviceCaps::default());
    }

    #[test]
    fn rejects_non_power_of_two_slice() {
        let err = PlannerConfig::from_json_str(r#"{ "slice_size_bytes": 1000 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSliceSize { bytes: 1000 }));
    }
}
