//! Connection (QP) resolution for the scale-up and scale-out fabrics.

mod role;
mod scale_out;
mod scale_up;
mod usage;
mod wiring;

use serde::{Deserialize, Serialize};

use crate::comm::{CommId, Communicator, Rank};
use crate::error::Result;

pub use role::{QP_ROLES, QpRole, Qpn};
pub use scale_out::ScaleOutQpManager;
pub use scale_up::ScaleUpQpManager;
pub use usage::{QpUsage, UsageQuery, base_qp_and_usage};
pub use wiring::{NicInfo, NicWiring, QpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fabric {
    ScaleUp,
    ScaleOut,
}

/// Contract shared by both fabrics. The scale-up side keys connections by
/// communicator only and ignores `remote_rank` and `qp_set`.
pub trait QpManager {
    fn fabric(&self) -> Fabric;

    fn register_qps(&mut self, comm: &Communicator, remote_rank: Rank, qps: &[Qpn]) -> Result<()>;

    /// Registered base QP for the role, or [`Qpn::INVALID`] when nothing is
    /// registered.
    fn qpn(&self, comm: CommId, remote_rank: Rank, qp_set: u32, role: QpRole) -> Qpn;

    /// Reverse lookup of a physical QP number seen on a NIC with
    /// `nic_offset`. A miss is fatal.
    fn role_of(&self, comm: CommId, remote_rank: Rank, qpn: Qpn, nic_offset: u32) -> QpRole;

    /// Destroy every registered QP on every active NIC of this fabric and
    /// invalidate the entries. Safe to call twice.
    fn close_qps(&mut self, comm: &Communicator, wiring: &NicWiring, transport: &mut dyn QpTransport);
}
