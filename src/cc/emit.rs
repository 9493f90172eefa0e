//! Leg emission for a whole call.
//!
//! Walks every (slice, sub-operation, box hop, all-to-all iteration,
//! direction) tuple of a planned call in that order, resolves staging slots and QPs for each resulting leg
//! and hands back a flat list of descriptors ready for a command encoder.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::collective::{CollectiveOp, CollectiveParams, DataType, Direction, ReduceOp};
use super::p2p::{SendRecvRequest, specialize_p2p};
use super::plan::{OperationContext, Planner};
use super::slice::{ScaleOutLeg, SliceLeg};
use crate::comm::{BoxId, Communicator, Rank};
use crate::invariant;
use crate::pool::{DeviceBufferPool, PoolId};
use crate::qp::{Fabric, QpManager, Qpn, UsageQuery, base_qp_and_usage};

/// Maps a leg to the device address it reads or writes.
pub trait AddressGenerator {
    fn scale_up_address(&self, ctx: &OperationContext, leg: &SliceLeg, staging: Option<u64>) -> u64;

    fn scale_out_address(
        &self,
        ctx: &OperationContext,
        leg: &SliceLeg,
        out: &ScaleOutLeg,
        staging: Option<u64>,
    ) -> u64;
}

/// User buffers addressed linearly by slice offset. Staged legs use their
/// staging slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatAddressGenerator;

impl FlatAddressGenerator {
    fn user_address(ctx: &OperationContext, leg: &SliceLeg) -> u64 {
        match leg.direction {
            Direction::Send => ctx.send_address(leg.slice_iter),
            Direction::Recv => ctx.recv_address(leg.slice_iter),
        }
    }
}

impl AddressGenerator for FlatAddressGenerator {
    fn scale_up_address(&self, ctx: &OperationContext, leg: &SliceLeg, staging: Option<u64>) -> u64 {
        staging.unwrap_or_else(|| Self::user_address(ctx, leg))
    }

    fn scale_out_address(
        &self,
        ctx: &OperationContext,
        leg: &SliceLeg,
        out: &ScaleOutLeg,
        staging: Option<u64>,
    ) -> u64 {
        if leg.hierarchical_first {
            return Self::user_address(ctx, leg);
        }
        staging.unwrap_or_else(|| Self::user_address(ctx, leg) + out.rank_offset + out.iter_offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegDescriptor {
    pub seq: u64,
    pub fabric: Fabric,
    pub op: CollectiveOp,
    pub current_op: CollectiveOp,
    pub direction: Direction,
    pub reduce_op: ReduceOp,
    pub data_type: DataType,
    pub slice_iter: u32,
    pub all2all_iter: u32,
    pub box_hop: u32,
    pub box_num: BoxId,
    pub remote_rank: Option<Rank>,
    pub address: u64,
    pub cell_count: u64,
    pub stride_count: u64,
    pub device_count: u64,
    pub qpn: Qpn,
    pub disregard_rank: bool,
    pub qp_set: u32,
    pub pool: Option<PoolId>,
    pub staging_slot: Option<u64>,
    /// Completion value reached once this leg has finished.
    pub completion_target: u64,
    pub longterm_ordering: bool,
    pub wait_for_reduce_scatter: bool,
    pub do_reduction: bool,
    pub has_buffer_size: bool,
}

/// Everything the driver mutates or consults besides the communicator.
pub struct CallResources<'a> {
    pub pools: &'a mut DeviceBufferPool,
    pub scale_up: &'a dyn QpManager,
    pub scale_out: &'a dyn QpManager,
    pub addresses: &'a dyn AddressGenerator,
    /// Completion value already reached before this call.
    pub completion_base: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallPlan {
    pub context: OperationContext,
    pub legs: Vec<LegDescriptor>,
}

struct LegSink<'r, 'a> {
    res: &'r mut CallResources<'a>,
    legs: Vec<LegDescriptor>,
}

impl LegSink<'_, '_> {
    fn next_seq(&self) -> u64 {
        self.legs.len() as u64
    }

    fn completion_target(&self) -> u64 {
        self.res.completion_base + self.next_seq() + 1
    }

    /// Claim the active slot of `pool` and move the cursor on, tagging the
    /// next slot with this leg's completion value.
    fn claim(&mut self, pool: Option<PoolId>) -> Option<u64> {
        let pool = pool?;
        let target = self.completion_target();
        let slot = self.res.pools.current_slot(pool);
        self.res.pools.advance(pool, target);
        Some(slot)
    }
}

impl Planner {
    /// Plan `params` on `comm` and emit its legs. Increments the
    /// communicator's collective counter once and its per-peer counters once
    /// per scale-out leg.
    ///
    /// An all-to-all whose box share spans several iterations emits one
    /// scale-out leg per iteration. The scale-up leg already covers the whole
    /// share and is emitted on the first iteration only.
    #[instrument(skip_all, fields(comm = comm.id(), rank = comm.my_rank(), op = ?params.op))]
    pub fn emit_call(
        &self,
        comm: &mut Communicator,
        params: &CollectiveParams,
        res: &mut CallResources<'_>,
    ) -> CallPlan {
        invariant!(
            params.op != CollectiveOp::NoCollective,
            "send/recv calls go through emit_send_recv"
        );
        let ctx = self.plan(params, comm);
        let mut sink = LegSink {
            res,
            legs: Vec::new(),
        };
        let box_size = ctx.box_size();
        for slice_iter in 0..ctx.slice_iterations() {
            for &current_op in ctx.policy().sub_ops {
                for box_hop in 0..ctx.box_iterations() {
                    for all2all_iter in 0..ctx.all2all_iterations() {
                        for direction in Direction::BOTH {
                            let leg = self.specialize(
                                &ctx,
                                current_op,
                                box_hop,
                                slice_iter,
                                all2all_iter,
                                direction,
                            );
                            if box_size > 1 && all2all_iter == 0 {
                                push_scale_up(&mut sink, &ctx, &leg);
                            }
                            if let Some(out) = leg.scale_out {
                                push_scale_out(&mut sink, &ctx, &leg, &out);
                                match direction {
                                    Direction::Send => comm.inc_send_ctr(out.remote_rank),
                                    Direction::Recv => comm.inc_recv_ctr(out.remote_rank),
                                };
                            }
                        }
                    }
                }
            }
        }
        comm.inc_collective_ctr();
        info!(
            resolved = ?ctx.op(),
            slices = ctx.slice_iterations(),
            boxes = ctx.box_iterations(),
            all2all = ctx.all2all_iterations(),
            legs = sink.legs.len(),
            "emitted collective"
        );
        CallPlan {
            context: ctx,
            legs: sink.legs,
        }
    }

    /// Emit one leg per request of a grouped send/recv call.
    #[instrument(skip_all, fields(comm = comm.id(), rank = comm.my_rank(), requests = requests.len()))]
    pub fn emit_send_recv(
        &self,
        comm: &mut Communicator,
        requests: &[SendRecvRequest],
        res: &mut CallResources<'_>,
    ) -> Vec<LegDescriptor> {
        let mut sink = LegSink {
            res,
            legs: Vec::new(),
        };
        for req in requests {
            let leg = specialize_p2p(comm, self.config(), req);
            let fabric = if leg.scale_out {
                Fabric::ScaleOut
            } else {
                Fabric::ScaleUp
            };
            let manager = match fabric {
                Fabric::ScaleUp => sink.res.scale_up,
                Fabric::ScaleOut => sink.res.scale_out,
            };
            let usage = base_qp_and_usage(
                manager,
                &UsageQuery {
                    comm: comm.id(),
                    my_rank: comm.my_rank(),
                    box_size: comm.box_size(),
                    op: CollectiveOp::NoCollective,
                    complex_op: CollectiveOp::NoCollective,
                    direction: leg.direction,
                    is_complex: false,
                    reduction_in_imb: false,
                    is_hierarchical: false,
                    count: None,
                    cell_count: leg.device_count,
                    loopback: comm.size() == 1,
                    fabric,
                    remote_rank: leg.remote_rank,
                    qp_set: leg.qp_set,
                    is_reduction: false,
                    is_root: false,
                },
            );
            let completion_target = sink.completion_target();
            let staging_slot = sink.claim(leg.pool);
            match leg.direction {
                Direction::Send => comm.inc_send_ctr(leg.remote_rank),
                Direction::Recv => comm.inc_recv_ctr(leg.remote_rank),
            };
            let seq = sink.next_seq();
            sink.legs.push(LegDescriptor {
                seq,
                fabric,
                op: CollectiveOp::NoCollective,
                current_op: CollectiveOp::NoCollective,
                direction: leg.direction,
                reduce_op: ReduceOp::None,
                data_type: leg.data_type,
                slice_iter: req.slice_iter,
                all2all_iter: 0,
                box_hop: 0,
                box_num: leg.remote_box,
                remote_rank: Some(leg.remote_rank),
                address: leg.address,
                cell_count: leg.device_count,
                stride_count: 0,
                device_count: leg.device_count,
                qpn: usage.qpn,
                disregard_rank: usage.disregard_rank,
                qp_set: leg.qp_set,
                pool: leg.pool,
                staging_slot,
                completion_target,
                longterm_ordering: false,
                wait_for_reduce_scatter: false,
                do_reduction: false,
                has_buffer_size: false,
            });
        }
        debug!(legs = sink.legs.len(), "emitted send/recv group");
        sink.legs
    }
}

fn usage_query(
    ctx: &OperationContext,
    leg: &SliceLeg,
    fabric: Fabric,
    remote_rank: Rank,
    cell_count: u64,
    is_reduction: bool,
) -> UsageQuery {
    let flags = ctx.flags();
    UsageQuery {
        comm: ctx.comm_id(),
        my_rank: ctx.my_rank(),
        box_size: ctx.box_size(),
        op: leg.current_op,
        complex_op: ctx.op(),
        direction: leg.direction,
        is_complex: flags.is_complex,
        reduction_in_imb: flags.is_reduction && (flags.is_multi_box || flags.is_16bit_reduction),
        is_hierarchical: flags.is_multi_box,
        count: leg.counts.has_buffer_size.then_some(leg.counts.box_count),
        cell_count,
        loopback: ctx.comm_size() == 1,
        fabric,
        remote_rank,
        qp_set: leg.qp_set,
        is_reduction,
        is_root: flags.is_root,
    }
}

fn push_scale_up(sink: &mut LegSink<'_, '_>, ctx: &OperationContext, leg: &SliceLeg) {
    let up = &leg.scale_up;
    let usage = base_qp_and_usage(
        sink.res.scale_up,
        &usage_query(ctx, leg, Fabric::ScaleUp, ctx.my_rank(), up.cell_count, false),
    );
    let completion_target = sink.completion_target();
    let staging_slot = sink.claim(up.pool);
    let address = sink.res.addresses.scale_up_address(ctx, leg, staging_slot);
    let seq = sink.next_seq();
    sink.legs.push(LegDescriptor {
        seq,
        fabric: Fabric::ScaleUp,
        op: ctx.op(),
        current_op: leg.current_op,
        direction: leg.direction,
        reduce_op: ctx.params().reduce_op,
        data_type: leg.data_type,
        slice_iter: leg.slice_iter,
        all2all_iter: leg.all2all_iter,
        box_hop: leg.box_hop,
        box_num: leg.box_num,
        remote_rank: None,
        address,
        cell_count: up.cell_count,
        stride_count: up.stride_count,
        device_count: leg.counts.box_count,
        qpn: usage.qpn,
        disregard_rank: usage.disregard_rank,
        qp_set: leg.qp_set,
        pool: up.pool,
        staging_slot,
        completion_target,
        longterm_ordering: leg.longterm_ordering,
        wait_for_reduce_scatter: up.wait_for_reduce_scatter,
        do_reduction: false,
        has_buffer_size: leg.counts.has_buffer_size,
    });
}

fn push_scale_out(sink: &mut LegSink<'_, '_>, ctx: &OperationContext, leg: &SliceLeg, out: &ScaleOutLeg) {
    let usage = base_qp_and_usage(
        sink.res.scale_out,
        &usage_query(
            ctx,
            leg,
            Fabric::ScaleOut,
            out.remote_rank,
            out.cell_count,
            out.do_reduction,
        ),
    );
    let completion_target = sink.completion_target();
    let staging_slot = sink.claim(out.pool);
    let address = sink
        .res
        .addresses
        .scale_out_address(ctx, leg, out, staging_slot);
    let seq = sink.next_seq();
    sink.legs.push(LegDescriptor {
        seq,
        fabric: Fabric::ScaleOut,
        op: ctx.op(),
        current_op: leg.current_op,
        direction: leg.direction,
        reduce_op: ctx.params().reduce_op,
        data_type: leg.data_type,
        slice_iter: leg.slice_iter,
        all2all_iter: leg.all2all_iter,
        box_hop: leg.box_hop,
        box_num: leg.box_num,
        remote_rank: Some(out.remote_rank),
        address,
        cell_count: out.cell_count,
        stride_count: out.stride_count,
        device_count: out.device_count,
        qpn: usage.qpn,
        disregard_rank: usage.disregard_rank,
        qp_set: out.qp_set,
        pool: out.pool,
        staging_slot,
        completion_target,
        longterm_ordering: leg.longterm_ordering,
        wait_for_reduce_scatter: out.wait_for_reduce_scatter,
        do_reduction: out.do_reduction,
        has_buffer_size: leg.counts.has_buffer_size,
    });
}
