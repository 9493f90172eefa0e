//! Choice of the base QP and remote-rank addressing for one leg.

use serde::Serialize;

use super::{Fabric, QpManager, QpRole, Qpn};
use crate::cc::{CollectiveOp, Direction};
use crate::comm::{CommId, Rank};
use crate::error::invariant_violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QpUsage {
    pub qpn: Qpn,
    /// The engine should ignore the remote rank when computing the
    /// destination offset.
    pub disregard_rank: bool,
}

/// Facts about the leg that drive QP selection.
#[derive(Debug, Clone, Copy)]
pub struct UsageQuery {
    pub comm: CommId,
    pub my_rank: Rank,
    pub box_size: u32,
    /// Sub-operation currently executing.
    pub op: CollectiveOp,
    /// Top-level operation the sub-operation belongs to.
    pub complex_op: CollectiveOp,
    pub direction: Direction,
    pub is_complex: bool,
    pub reduction_in_imb: bool,
    pub is_hierarchical: bool,
    /// Total element count, when the leg is bounded by one.
    pub count: Option<u64>,
    pub cell_count: u64,
    pub loopback: bool,
    pub fabric: Fabric,
    pub remote_rank: Rank,
    pub qp_set: u32,
    pub is_reduction: bool,
    pub is_root: bool,
}

impl UsageQuery {
    /// The local rank's cell starts past the end of the data.
    fn out_of_bounds(&self) -> bool {
        let position = u64::from(self.my_rank % self.box_size.max(1));
        self.count
            .is_some_and(|count| self.cell_count * position >= count)
    }
}

pub fn base_qp_and_usage(manager: &dyn QpManager, q: &UsageQuery) -> QpUsage {
    let send = q.direction.is_send();
    let scale_out = q.fabric == Fabric::ScaleOut;
    let out_of_bounds = q.out_of_bounds();
    let mut disregard_rank = false;

    let role = match q.op {
        CollectiveOp::ReduceScatter => {
            if send {
                QpRole::RsSend
            } else if q.is_complex && !q.reduction_in_imb && (!q.is_hierarchical || out_of_bounds) {
                if q.complex_op == CollectiveOp::Reduce && !q.is_root && !out_of_bounds {
                    disregard_rank = true;
                }
                QpRole::RsRecv
            } else if (q.is_complex && q.reduction_in_imb && out_of_bounds) || q.is_reduction {
                QpRole::RsRecv
            } else if q.complex_op == CollectiveOp::Reduce
                && q.is_root
                && !q.reduction_in_imb
                && q.is_hierarchical
            {
                QpRole::RsRecv
            } else {
                disregard_rank = true;
                QpRole::RsRecv
            }
        }
        CollectiveOp::Gather | CollectiveOp::AllGather => {
            if send {
                if !q.is_complex || q.op == CollectiveOp::Gather {
                    disregard_rank = true;
                }
                QpRole::AgSend
            } else {
                QpRole::AgRecv
            }
        }
        // Scale-out all-to-all rides the reduce-scatter connections.
        CollectiveOp::AllToAll => match (scale_out, send) {
            (true, true) => QpRole::RsSend,
            (true, false) => QpRole::RsRecv,
            (false, true) => QpRole::A2aSend,
            (false, false) => QpRole::A2aRecv,
        },
        CollectiveOp::Reduce | CollectiveOp::Scatter => {
            if q.loopback {
                disregard_rank = true;
            }
            if send {
                QpRole::RsSend
            } else {
                disregard_rank = true;
                QpRole::RsRecv
            }
        }
        CollectiveOp::Broadcast
        | CollectiveOp::SinglePeerBroadcast
        | CollectiveOp::SimpleBroadcast => {
            disregard_rank = true;
            if send { QpRole::AgSend } else { QpRole::AgRecv }
        }
        CollectiveOp::NoCollective => {
            disregard_rank = true;
            if send { QpRole::RsSend } else { QpRole::RsRecv }
        }
        CollectiveOp::AllReduce => {
            invariant_violation(format_args!("all-reduce never reaches QP selection directly"))
        }
    };

    let qpn = manager.qpn(q.comm, q.remote_rank, q.qp_set, role);
    // Scale-out always addresses offset zero.
    if scale_out {
        disregard_rank = true;
    }
    QpUsage {
        qpn,
        disregard_rank,
    }
}
