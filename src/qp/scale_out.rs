use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use super::{Fabric, NicWiring, QP_ROLES, QpManager, QpRole, QpTransport, Qpn};
use crate::comm::{CommId, Communicator, Inclusion, Rank};
use crate::error::{ConfigError, Result, invariant_violation};

type QpSet = [Qpn; QP_ROLES];

/// Per communicator, per remote rank, `max_qp_sets` sets of role QPs.
#[derive(Debug, Clone)]
pub struct ScaleOutQpManager {
    max_qp_sets: usize,
    table: HashMap<CommId, Vec<Vec<QpSet>>>,
}

impl ScaleOutQpManager {
    pub fn new(max_qp_sets: u32) -> Self {
        Self {
            max_qp_sets: max_qp_sets.max(1) as usize,
            table: HashMap::new(),
        }
    }

    pub fn max_qp_sets(&self) -> u32 {
        self.max_qp_sets as u32
    }

    fn sets(&self, comm: CommId, remote_rank: Rank) -> Option<&Vec<QpSet>> {
        self.table.get(&comm)?.get(remote_rank as usize)
    }
}

impl QpManager for ScaleOutQpManager {
    fn fabric(&self) -> Fabric {
        Fabric::ScaleOut
    }

    /// Fills sets in set-major order and stops at the end of `qps`. A short
    /// list leaves the remaining entries invalid.
    #[instrument(skip(self, comm, qps), fields(comm = comm.id(), count = qps.len()))]
    fn register_qps(&mut self, comm: &Communicator, remote_rank: Rank, qps: &[Qpn]) -> Result<()> {
        if remote_rank >= comm.size() {
            return Err(ConfigError::RankOutOfRange {
                rank: remote_rank,
                size: comm.size(),
            });
        }
        let sets = self.max_qp_sets;
        let ranks = self
            .table
            .entry(comm.id())
            .or_insert_with(|| vec![vec![[Qpn::INVALID; QP_ROLES]; sets]; comm.size() as usize]);
        let entry = &mut ranks[remote_rank as usize];
        let mut qps_iter = qps.iter();
        'fill: for set in entry.iter_mut() {
            for slot in set.iter_mut() {
                match qps_iter.next() {
                    Some(qpn) => *slot = *qpn,
                    None => break 'fill,
                }
            }
        }
        if qps.len() < sets * QP_ROLES {
            warn!(
                expected = sets * QP_ROLES,
                "scale-out registration shorter than full set table"
            );
        }
        debug!(remote_rank, "registered scale-out QPs");
        Ok(())
    }

    fn qpn(&self, comm: CommId, remote_rank: Rank, qp_set: u32, role: QpRole) -> Qpn {
        self.sets(comm, remote_rank)
            .and_then(|sets| sets.get(qp_set as usize))
            .map_or(Qpn::INVALID, |set| set[role.index()])
    }

    fn role_of(&self, comm: CommId, remote_rank: Rank, qpn: Qpn, nic_offset: u32) -> QpRole {
        let found = self.sets(comm, remote_rank).and_then(|sets| {
            sets.iter().find_map(|set| {
                QpRole::ALL.into_iter().find(|role| {
                    let base = set[role.index()];
                    base.is_valid() && base.at_offset(nic_offset) == qpn
                })
            })
        });
        match found {
            Some(role) => role,
            None => invariant_violation(format_args!(
                "scale-out qpn {} (nic offset {nic_offset}) not registered for comm {comm} rank {remote_rank}",
                qpn.0
            )),
        }
    }

    #[instrument(skip_all, fields(comm = comm.id()))]
    fn close_qps(&mut self, comm: &Communicator, wiring: &NicWiring, transport: &mut dyn QpTransport) {
        // Host-NIC flows never register here.
        let Some(ranks) = self.table.get_mut(&comm.id()) else {
            return;
        };
        for remote in comm.outer_ranks(Inclusion::Exclusive) {
            let Some(sets) = ranks.get_mut(remote as usize) else {
                continue;
            };
            for set in sets.iter_mut() {
                for qp in set.iter_mut() {
                    if !qp.is_valid() {
                        continue;
                    }
                    for nic in wiring.active(Fabric::ScaleOut) {
                        transport.destroy_qp(nic.index, qp.at_offset(nic.qp_offset));
                    }
                    *qp = Qpn::INVALID;
                }
            }
        }
        debug!("closed scale-out QPs");
    }
}
