use std::collections::HashMap;

use tracing::{debug, instrument};

use super::{Fabric, NicWiring, QP_ROLES, QpManager, QpRole, QpTransport, Qpn};
use crate::comm::{CommId, Communicator, Inclusion, Rank};
use crate::error::{ConfigError, Result, invariant_violation};

/// One QP set per communicator, shared by every in-box peer. A connection
/// holds exactly one QP per role.
#[derive(Debug, Clone, Default)]
pub struct ScaleUpQpManager {
    table: HashMap<CommId, [Qpn; QP_ROLES]>,
}

impl ScaleUpQpManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, comm: CommId) -> bool {
        self.table.contains_key(&comm)
    }
}

impl QpManager for ScaleUpQpManager {
    fn fabric(&self) -> Fabric {
        Fabric::ScaleUp
    }

    #[instrument(skip(self, comm, qps), fields(comm = comm.id(), count = qps.len()))]
    fn register_qps(&mut self, comm: &Communicator, _remote_rank: Rank, qps: &[Qpn]) -> Result<()> {
        if qps.len() != QP_ROLES {
            return Err(ConfigError::ConnectionCount {
                comm: comm.id(),
                expected: QP_ROLES,
                actual: qps.len(),
            });
        }
        let mut entry = [Qpn::INVALID; QP_ROLES];
        entry.copy_from_slice(qps);
        self.table.insert(comm.id(), entry);
        debug!("registered scale-up QPs");
        Ok(())
    }

    fn qpn(&self, comm: CommId, _remote_rank: Rank, _qp_set: u32, role: QpRole) -> Qpn {
        self.table
            .get(&comm)
            .map_or(Qpn::INVALID, |qps| qps[role.index()])
    }

    fn role_of(&self, comm: CommId, _remote_rank: Rank, qpn: Qpn, nic_offset: u32) -> QpRole {
        let found = self.table.get(&comm).and_then(|qps| {
            QpRole::ALL.into_iter().find(|role| {
                let base = qps[role.index()];
                base.is_valid() && base.at_offset(nic_offset) == qpn
            })
        });
        match found {
            Some(role) => role,
            None => invariant_violation(format_args!(
                "scale-up qpn {} (nic offset {nic_offset}) not registered for comm {comm}",
                qpn.0
            )),
        }
    }

    #[instrument(skip_all, fields(comm = comm.id()))]
    fn close_qps(&mut self, comm: &Communicator, wiring: &NicWiring, transport: &mut dyn QpTransport) {
        if comm.inner_ranks(Inclusion::Exclusive).is_empty() {
            return;
        }
        let Some(qps) = self.table.get_mut(&comm.id()) else {
            return;
        };
        for qp in qps.iter_mut() {
            if !qp.is_valid() {
                continue;
            }
            for nic in wiring.active(Fabric::ScaleUp) {
                transport.destroy_qp(nic.index, qp.at_offset(nic.qp_offset));
            }
            *qp = Qpn::INVALID;
        }
        debug!("closed scale-up QPs");
    }
}
