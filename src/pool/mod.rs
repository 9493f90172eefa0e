//! Device staging-buffer pools

mod device;

use serde::{Deserialize, Serialize};

pub use device::DeviceBufferPool;

/// Slot granularity of the reproducible-reduction scale-out pool.
pub const RR_SCALEOUT_FACTOR: u32 = 8;
/// Slot granularity of the reproducible-reduction scale-up pool.
pub const RR_SCALEUP_FACTOR: u32 = 8;
pub const DEFAULT_FACTOR: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolId {
    ScaleOut,
    ScaleOutGdr,
    ReduceScaleUp,
    ScaleUpAllToAll,
}

impl PoolId {
    pub const COUNT: usize = 4;
    pub const ALL: [PoolId; Self::COUNT] = [
        PoolId::ScaleOut,
        PoolId::ScaleOutGdr,
        PoolId::ReduceScaleUp,
        PoolId::ScaleUpAllToAll,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn factor(self) -> u32 {
        match self {
            PoolId::ScaleOut => RR_SCALEOUT_FACTOR,
            PoolId::ReduceScaleUp => RR_SCALEUP_FACTOR,
            PoolId::ScaleOutGdr | PoolId::ScaleUpAllToAll => DEFAULT_FACTOR,
        }
    }
}
