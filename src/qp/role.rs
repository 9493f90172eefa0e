//! Logical QP roles and physical QP numbers.

use serde::{Deserialize, Serialize};

use crate::cc::{CollectiveOp, Direction};

/// Number of QPs opened per connection, one per role.
pub const QP_ROLES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QpRole {
    RsSend,
    RsRecv,
    AgSend,
    AgRecv,
    A2aSend,
    A2aRecv,
}

impl QpRole {
    pub const ALL: [QpRole; QP_ROLES] = [
        QpRole::RsSend,
        QpRole::RsRecv,
        QpRole::AgSend,
        QpRole::AgRecv,
        QpRole::A2aSend,
        QpRole::A2aRecv,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Role owning the traffic of `op` in `direction`. Only the three
    /// connection families have roles of their own.
    pub fn for_op(op: CollectiveOp, direction: Direction) -> QpRole {
        let send = direction.is_send();
        match op {
            CollectiveOp::ReduceScatter => pick(send, QpRole::RsSend, QpRole::RsRecv),
            CollectiveOp::AllGather => pick(send, QpRole::AgSend, QpRole::AgRecv),
            CollectiveOp::AllToAll => pick(send, QpRole::A2aSend, QpRole::A2aRecv),
            other => crate::error::invariant_violation(format_args!(
                "no QP role for op {other:?}"
            )),
        }
    }

    /// The role on the remote end of the same connection.
    pub fn peer_role(self) -> QpRole {
        match self {
            QpRole::RsSend => QpRole::RsRecv,
            QpRole::RsRecv => QpRole::RsSend,
            QpRole::AgSend => QpRole::AgRecv,
            QpRole::AgRecv => QpRole::AgSend,
            QpRole::A2aSend => QpRole::A2aRecv,
            QpRole::A2aRecv => QpRole::A2aSend,
        }
    }
}

fn pick(send: bool, send_role: QpRole, recv_role: QpRole) -> QpRole {
    if send { send_role } else { recv_role }
}

/// Physical QP number. Zero marks an unopened or closed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qpn(pub u32);

impl Qpn {
    pub const INVALID: Qpn = Qpn(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// QP number as seen on a NIC whose QPs start at `nic_offset`.
    pub fn at_offset(self, nic_offset: u32) -> Qpn {
        Qpn(self.0 + nic_offset)
    }
}
