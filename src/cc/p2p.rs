//! Point-to-point specializer.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::collective::{DataType, Direction};
use crate::comm::{BoxId, Communicator, Rank};
use crate::config::PlannerConfig;
use crate::invariant;
use crate::pool::PoolId;

/// One send or receive of a grouped send/recv call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecvRequest {
    pub direction: Direction,
    pub remote_rank: Rank,
    pub data_type: DataType,
    pub address: u64,
    pub count: u64,
    /// Position of the request within its group; rotates the QP set.
    pub slice_iter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointToPointLeg {
    pub direction: Direction,
    pub remote_box: BoxId,
    pub remote_rank: Rank,
    pub data_type: DataType,
    pub address: u64,
    pub device_count: u64,
    pub scale_out: bool,
    pub pool: Option<PoolId>,
    pub qp_set: u32,
}

impl PointToPointLeg {
    pub fn size_bytes(&self) -> u64 {
        self.device_count * self.data_type.size_bytes()
    }
}

/// Specialize a single send or receive. The QP set rotates with the request
/// position only, not with the collective counter.
pub fn specialize_p2p(comm: &Communicator, cfg: &PlannerConfig, req: &SendRecvRequest) -> PointToPointLeg {
    invariant!(
        req.remote_rank < comm.size(),
        "send/recv peer {} outside communicator of size {}",
        req.remote_rank,
        comm.size()
    );
    let remote_box = comm.box_of(req.remote_rank);
    let scale_out = remote_box != comm.my_box();
    let leg = PointToPointLeg {
        direction: req.direction,
        remote_box,
        remote_rank: req.remote_rank,
        data_type: req.data_type,
        address: req.address,
        device_count: req.count,
        scale_out,
        pool: (scale_out && cfg.host_nic).then_some(PoolId::ScaleOut),
        qp_set: req.slice_iter % comm.max_qp_sets().max(1),
    };
    trace!(
        direction = ?leg.direction,
        remote_rank = leg.remote_rank,
        remote_box,
        scale_out,
        qp_set = leg.qp_set,
        "specialized send/recv"
    );
    leg
}
