//! Cyclic staging-slot bookkeeping.
//!
//! Each pool is an arena of fixed-size slots plus a cursor and one recorded
//! completion target per slot. The pool never blocks: whether a slot may be
//! reused is answered by comparing its recorded target against a completion
//! value reported by the external tracker.

use tracing::trace;

use super::PoolId;
use crate::config::PoolConfig;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone)]
struct PoolState {
    base_addr: u64,
    slot_bytes: u64,
    current: u32,
    targets: Vec<u64>,
    /// Set by the advance that wrapped back to slot 0.
    expired: bool,
}

impl PoolState {
    fn slots(&self) -> u32 {
        self.targets.len() as u32
    }

    fn slot_addr(&self, slot: u32) -> u64 {
        self.base_addr + u64::from(slot) * self.slot_bytes
    }

    fn size_bytes(&self) -> u64 {
        self.slot_bytes * u64::from(self.slots())
    }
}

#[derive(Debug, Clone)]
pub struct DeviceBufferPool {
    pools: Vec<PoolState>,
}

impl DeviceBufferPool {
    pub fn new(cfg: &PoolConfig) -> Result<Self> {
        let mut pools = Vec::with_capacity(PoolId::COUNT);
        let mut next_base = cfg.base_addr;
        for pool in PoolId::ALL {
            let geo = cfg.geometry(pool);
            if geo.slot_bytes == 0 {
                return Err(ConfigError::InvalidPool {
                    pool,
                    reason: "slot size must be non-zero".to_string(),
                });
            }
            if geo.slots == 0 || geo.slots % pool.factor() != 0 {
                return Err(ConfigError::InvalidPool {
                    pool,
                    reason: format!(
                        "slot count {} must be a non-zero multiple of {}",
                        geo.slots,
                        pool.factor()
                    ),
                });
            }
            let state = PoolState {
                base_addr: next_base,
                slot_bytes: geo.slot_bytes,
                current: 0,
                targets: vec![0; geo.slots as usize],
                expired: false,
            };
            next_base += state.size_bytes();
            pools.push(state);
        }
        Ok(Self { pools })
    }

    fn state(&self, pool: PoolId) -> &PoolState {
        &self.pools[pool.index()]
    }

    fn state_mut(&mut self, pool: PoolId) -> &mut PoolState {
        &mut self.pools[pool.index()]
    }

    /// Address of the active slot. Does not advance.
    pub fn current_slot(&self, pool: PoolId) -> u64 {
        let st = self.state(pool);
        st.slot_addr(st.current)
    }

    pub fn current_index(&self, pool: PoolId) -> u32 {
        self.state(pool).current
    }

    /// Move to the next slot and record `completion_target` as the value the
    /// consumer must reach before that slot may be reused. Returns the new
    /// slot's address.
    pub fn advance(&mut self, pool: PoolId, completion_target: u64) -> u64 {
        let st = self.state_mut(pool);
        st.current = (st.current + 1) % st.slots();
        st.targets[st.current as usize] = completion_target;
        st.expired = st.current == 0;
        trace!(
            ?pool,
            slot = st.current,
            completion_target,
            wrapped = st.expired,
            "advanced staging slot"
        );
        st.slot_addr(st.current)
    }

    /// Whether the last advance completed a full traversal of the pool.
    pub fn has_cycled(&self, pool: PoolId) -> bool {
        self.state(pool).expired
    }

    /// Reset the cursor and recorded targets.
    pub fn clear(&mut self, pool: PoolId) {
        let st = self.state_mut(pool);
        st.current = 0;
        st.targets.fill(0);
        st.expired = false;
    }

    /// Slot-count scale factor of the pool.
    pub fn granularity(&self, pool: PoolId) -> u32 {
        pool.factor()
    }

    /// Physical slot serving logical stream `stream` within the current
    /// granule.
    pub fn slot_for_stream(&self, pool: PoolId, stream: u32) -> u32 {
        let factor = pool.factor();
        (self.state(pool).current / factor) * factor + stream % factor
    }

    pub fn target_of(&self, pool: PoolId, slot: u32) -> u64 {
        self.state(pool).targets[slot as usize]
    }

    pub fn current_target(&self, pool: PoolId) -> u64 {
        let st = self.state(pool);
        st.targets[st.current as usize]
    }

    /// True once the externally reported completion value has reached the
    /// slot's recorded target.
    pub fn is_slot_reusable(&self, pool: PoolId, slot: u32, reported: u64) -> bool {
        reported >= self.target_of(pool, slot)
    }

    pub fn slots(&self, pool: PoolId) -> u32 {
        self.state(pool).slots()
    }

    pub fn slot_bytes(&self, pool: PoolId) -> u64 {
        self.state(pool).slot_bytes
    }

    pub fn base_addr(&self, pool: PoolId) -> u64 {
        self.state(pool).base_addr
    }

    pub fn total_size(&self) -> u64 {
        self.pools.iter().map(PoolState::size_bytes).sum()
    }

    pub fn pool_of_address(&self, addr: u64) -> Option<PoolId> {
        PoolId::ALL.into_iter().find(|&pool| {
            let st = self.state(pool);
            addr >= st.base_addr && addr < st.base_addr + st.size_bytes()
        })
    }
}
