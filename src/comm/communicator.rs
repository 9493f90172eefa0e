//! Communicator topology bookkeeping.
//!
//! Ranks `0..size` are laid out box-major: rank `r` lives in box
//! `r / box_size` at in-box position `r % box_size`. Two ranks are peers when
//! they occupy the same in-box position; a rank's outer ranks are its peers in
//! the other boxes, which are also the ranks it reaches over scale-out.

use std::collections::BTreeMap;

use tracing::{debug, info, trace};

use super::rank_set::RankSet;
use super::{BoxId, CommId, Rank};
use crate::config::PlannerConfig;
use crate::error::{ConfigError, Result};

/// Whether a derived rank subset contains the local rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    Exclusive,
    Inclusive,
}

#[derive(Debug, Clone)]
pub struct Communicator {
    id: CommId,
    my_rank: Rank,
    ranks: RankSet,
    box_size: u32,
    rank_to_box: Vec<BoxId>,
    /// Box id -> the rank in that box sharing my in-box position.
    box_to_rank: Vec<Rank>,
    inner_exclusive: RankSet,
    inner_inclusive: RankSet,
    outer_exclusive: RankSet,
    outer_inclusive: RankSet,
    connected: RankSet,
    send_ctr: BTreeMap<Rank, u64>,
    recv_ctr: BTreeMap<Rank, u64>,
    collective_ctr: u64,
    slice_size: u64,
    max_qp_sets: u32,
}

impl Communicator {
    /// Build a communicator over ranks `0..size`.
    pub fn initialize(
        id: CommId,
        size: u32,
        my_rank: Rank,
        box_size: u32,
        cfg: &PlannerConfig,
    ) -> Result<Self> {
        let ranks: Vec<Rank> = (0..size).collect();
        Self::from_ranks(id, &ranks, my_rank, box_size, cfg)
    }

    /// Build a communicator from an explicit rank list as gathered during
    /// bootstrap. The list must be a permutation of `0..ranks.len()`.
    #[tracing::instrument(skip(ranks, cfg), fields(size = ranks.len()))]
    pub fn from_ranks(
        id: CommId,
        ranks: &[Rank],
        my_rank: Rank,
        box_size: u32,
        cfg: &PlannerConfig,
    ) -> Result<Self> {
        if ranks.is_empty() {
            return Err(ConfigError::EmptyCommunicator);
        }
        let size = ranks.len() as u32;
        let mut set = RankSet::new();
        for &rank in ranks {
            if rank >= size {
                return Err(ConfigError::RankOutOfRange { rank, size });
            }
            if !set.insert(rank) {
                return Err(ConfigError::DuplicateRank { rank });
            }
        }
        if !set.contains(my_rank) {
            return Err(ConfigError::NotAMember { rank: my_rank });
        }
        for bytes in [cfg.slice_size_bytes, cfg.gdr_slice_size_bytes] {
            if bytes == 0 || !bytes.is_power_of_two() {
                return Err(ConfigError::InvalidSliceSize { bytes });
            }
        }

        let mut comm = Self {
            id,
            my_rank,
            ranks: set,
            box_size: 0,
            rank_to_box: Vec::new(),
            box_to_rank: Vec::new(),
            inner_exclusive: RankSet::new(),
            inner_inclusive: RankSet::new(),
            outer_exclusive: RankSet::new(),
            outer_inclusive: RankSet::new(),
            connected: RankSet::new(),
            send_ctr: BTreeMap::new(),
            recv_ctr: BTreeMap::new(),
            collective_ctr: 0,
            slice_size: cfg.slice_size_bytes,
            max_qp_sets: cfg.caps.max_qp_sets.max(1),
        };
        comm.apply_box_size(box_size)?;
        comm.slice_size = if cfg.direct_remote_memory && comm.box_count() > 1 {
            cfg.gdr_slice_size_bytes
        } else {
            cfg.slice_size_bytes
        };

        info!(
            comm = id,
            size,
            my_rank,
            box_size = comm.box_size,
            boxes = comm.box_count(),
            slice_size = comm.slice_size,
            "communicator initialized"
        );
        Ok(comm)
    }

    /// Change the box size and rebuild every derived subset. Must not run
    /// concurrently with planning against this communicator.
    pub fn reconfigure_box_size(&mut self, box_size: u32) -> Result<()> {
        self.apply_box_size(box_size)?;
        debug!(comm = self.id, box_size = self.box_size, "communicator reconfigured");
        Ok(())
    }

    fn apply_box_size(&mut self, box_size: u32) -> Result<()> {
        let size = self.size();
        if box_size == 0 {
            return Err(ConfigError::InvalidBoxSize { box_size, size });
        }
        // A communicator smaller than a box occupies a single partial box.
        let effective = box_size.min(size);
        if size % effective != 0 {
            return Err(ConfigError::InvalidBoxSize { box_size, size });
        }
        self.box_size = effective;
        self.rebuild_caches();
        Ok(())
    }

    fn rebuild_caches(&mut self) {
        let box_size = self.box_size;
        let boxes = self.size() / box_size;
        let my_box = self.my_rank / box_size;
        let my_pos = self.my_rank % box_size;

        self.rank_to_box = self.ranks.iter().map(|r| r / box_size).collect();
        self.box_to_rank = (0..boxes).map(|b| b * box_size + my_pos).collect();

        self.inner_inclusive = self
            .ranks
            .iter()
            .filter(|r| r / box_size == my_box)
            .collect();
        self.inner_exclusive = self
            .inner_inclusive
            .iter()
            .filter(|&r| r != self.my_rank)
            .collect();
        self.outer_inclusive = self.box_to_rank.iter().copied().collect();
        self.outer_exclusive = self
            .outer_inclusive
            .iter()
            .filter(|&r| r != self.my_rank)
            .collect();
        self.connected = self
            .inner_exclusive
            .iter()
            .chain(self.outer_exclusive.iter())
            .collect();

        trace!(
            inner = ?self.inner_inclusive.as_slice(),
            outer = ?self.outer_inclusive.as_slice(),
            "rank caches rebuilt"
        );
    }

    pub fn id(&self) -> CommId {
        self.id
    }

    pub fn my_rank(&self) -> Rank {
        self.my_rank
    }

    pub fn size(&self) -> u32 {
        self.ranks.len() as u32
    }

    pub fn ranks(&self) -> &RankSet {
        &self.ranks
    }

    pub fn box_size(&self) -> u32 {
        self.box_size
    }

    pub fn box_count(&self) -> u32 {
        self.size() / self.box_size
    }

    pub fn my_box(&self) -> BoxId {
        self.box_of(self.my_rank)
    }

    pub fn box_of(&self, rank: Rank) -> BoxId {
        self.rank_to_box[rank as usize]
    }

    pub fn rank_to_box_map(&self) -> &[BoxId] {
        &self.rank_to_box
    }

    /// The rank in `box_id` that shares my in-box position.
    pub fn box_representative(&self, box_id: BoxId) -> Rank {
        self.box_to_rank[box_id as usize]
    }

    pub fn box_to_rank_map(&self) -> &[Rank] {
        &self.box_to_rank
    }

    pub fn rank_in_box(&self) -> u32 {
        self.my_rank % self.box_size
    }

    pub fn position_in_box(&self, rank: Rank) -> u32 {
        rank % self.box_size
    }

    /// True when any scale-out participation is needed.
    pub fn is_multi_box(&self) -> bool {
        self.box_count() > 1
    }

    /// True when both scale-up and scale-out participation are needed.
    pub fn is_hierarchical(&self) -> bool {
        self.is_multi_box() && self.box_size > 1
    }

    /// Multi-box communicator made only of scale-out peers.
    pub fn is_peers_only(&self) -> bool {
        self.is_multi_box() && self.box_size == 1
    }

    pub fn is_peer(&self, rank: Rank) -> bool {
        self.are_peers(self.my_rank, rank)
    }

    pub fn are_peers(&self, a: Rank, b: Rank) -> bool {
        a % self.box_size == b % self.box_size
    }

    pub fn is_rank_inside_box(&self, rank: Rank) -> bool {
        self.same_box(self.my_rank, rank)
    }

    pub fn same_box(&self, a: Rank, b: Rank) -> bool {
        a / self.box_size == b / self.box_size
    }

    pub fn inner_ranks(&self, inclusion: Inclusion) -> &RankSet {
        match inclusion {
            Inclusion::Exclusive => &self.inner_exclusive,
            Inclusion::Inclusive => &self.inner_inclusive,
        }
    }

    pub fn outer_ranks(&self, inclusion: Inclusion) -> &RankSet {
        match inclusion {
            Inclusion::Exclusive => &self.outer_exclusive,
            Inclusion::Inclusive => &self.outer_inclusive,
        }
    }

    /// Ranks reachable directly: my box plus my scale-out peers.
    pub fn connected_ranks(&self) -> &RankSet {
        &self.connected
    }

    pub fn last_rank_in_box(&self) -> Rank {
        self.my_box() * self.box_size + self.box_size - 1
    }

    pub fn is_last_rank_in_box(&self) -> bool {
        self.my_rank == self.last_rank_in_box()
    }

    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    pub fn max_qp_sets(&self) -> u32 {
        self.max_qp_sets
    }

    pub fn collective_ctr(&self) -> u64 {
        self.collective_ctr
    }

    pub fn inc_collective_ctr(&mut self) -> u64 {
        self.collective_ctr = self.collective_ctr.wrapping_add(1);
        self.collective_ctr
    }

    pub fn inc_send_ctr(&mut self, peer: Rank) -> u64 {
        let ctr = self.send_ctr.entry(peer).or_insert(0);
        *ctr = ctr.wrapping_add(1);
        *ctr
    }

    pub fn send_ctr(&self, peer: Rank) -> u64 {
        self.send_ctr.get(&peer).copied().unwrap_or(0)
    }

    pub fn inc_recv_ctr(&mut self, peer: Rank) -> u64 {
        let ctr = self.recv_ctr.entry(peer).or_insert(0);
        *ctr = ctr.wrapping_add(1);
        *ctr
    }

    pub fn recv_ctr(&self, peer: Rank) -> u64 {
        self.recv_ctr.get(&peer).copied().unwrap_or(0)
    }
}
