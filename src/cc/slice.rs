//! Iteration specializer.
//!
//! Derives the concrete leg of one (sub-operation, box hop, slice,
//! direction) tuple from an [`OperationContext`].

use serde::Serialize;
use tracing::trace;

use super::collective::{CollectiveOp, DataType, Direction};
use super::plan::{OperationContext, Planner, SliceCounts};
use super::policy::{ScaleOutQuery, policy};
use crate::comm::{BoxId, Rank};
use crate::pool::PoolId;

/// In-box leg of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleUpLeg {
    pub cell_count: u64,
    pub stride_count: u64,
    pub pool: Option<PoolId>,
    pub wait_for_reduce_scatter: bool,
}

/// Cross-box leg of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleOutLeg {
    pub remote_box: BoxId,
    pub remote_rank: Rank,
    pub cell_count: u64,
    pub stride_count: u64,
    pub device_count: u64,
    /// Byte offset of the local rank's cell.
    pub rank_offset: u64,
    /// Byte offset of the all-to-all iteration within the box share.
    pub iter_offset: u64,
    pub pool: Option<PoolId>,
    pub do_reduction: bool,
    pub wait_for_reduce_scatter: bool,
    pub qp_set: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SliceLeg {
    pub current_op: CollectiveOp,
    pub direction: Direction,
    pub box_hop: u32,
    pub box_num: BoxId,
    pub slice_iter: u32,
    pub all2all_iter: u32,
    /// Element type on the wire. Receives of widened reductions carry 32-bit
    /// floats.
    pub data_type: DataType,
    pub counts: SliceCounts,
    pub address_offset: u64,
    pub scale_up: ScaleUpLeg,
    pub scale_out: Option<ScaleOutLeg>,
    pub hierarchical_first: bool,
    pub hierarchical_last: bool,
    pub longterm_ordering: bool,
    pub longterm_target: u32,
    pub edge_iteration: bool,
    pub sync_up_buffer_with_ltu: bool,
    pub qp_set: u32,
}

impl Planner {
    /// Specialize box hop `box_hop` of `current_op` for `slice_iter`.
    /// `all2all_iter` selects the part of the box share an all-to-all moves
    /// and is 0 for every other operation.
    pub fn specialize(
        &self,
        ctx: &OperationContext,
        current_op: CollectiveOp,
        box_hop: u32,
        slice_iter: u32,
        all2all_iter: u32,
        direction: Direction,
    ) -> SliceLeg {
        crate::invariant!(
            policy(ctx.op()).sub_ops.contains(&current_op),
            "{current_op:?} is not a sub-operation of {:?}",
            ctx.op()
        );
        crate::invariant!(
            box_hop < ctx.box_iterations(),
            "box hop {box_hop} out of {} box iterations",
            ctx.box_iterations()
        );
        crate::invariant!(
            all2all_iter < ctx.all2all_iterations(),
            "all-to-all iteration {all2all_iter} out of {}",
            ctx.all2all_iterations()
        );

        let boxes = ctx.box_iterations();
        let my_box = ctx.my_box() % boxes;
        let box_num = match direction {
            Direction::Send => (my_box + box_hop) % boxes,
            Direction::Recv => (my_box + boxes - box_hop) % boxes,
        };
        let flags = ctx.flags();
        let counts = self.box_counts(ctx, current_op, box_num, slice_iter, direction);

        let scale_up = ScaleUpLeg {
            cell_count: counts.rank_scale_up,
            stride_count: if flags.is_complex {
                counts.rank_scale_up
            } else {
                counts.scale_up_stride
            },
            pool: scale_up_pool(current_op),
            wait_for_reduce_scatter: gather_waits_for_rs(ctx, current_op, box_num, true),
        };

        let scale_out = if is_scale_out_required(ctx, current_op, direction, box_num) {
            Some(scale_out_leg(ctx, current_op, &counts, box_num, slice_iter, all2all_iter, direction))
        } else {
            None
        };

        let (hierarchical_first, hierarchical_last) = if flags.is_multi_box {
            let neighbour = match direction {
                Direction::Send => ctx.next_box(box_num),
                Direction::Recv => ctx.prev_box(box_num),
            };
            (box_num == my_box, neighbour == my_box)
        } else {
            (false, false)
        };

        let longterm_ordering = ctx.is_longterm_required(current_op, box_hop, all2all_iter);
        let widened = direction == Direction::Recv
            && !matches!(current_op, CollectiveOp::AllGather | CollectiveOp::Gather)
            && flags.is_16bit_reduction;

        let leg = SliceLeg {
            current_op,
            direction,
            box_hop,
            box_num,
            slice_iter,
            all2all_iter,
            data_type: if widened {
                DataType::Float32
            } else {
                ctx.params().data_type
            },
            counts,
            address_offset: ctx.address_offset(slice_iter),
            scale_up,
            scale_out,
            hierarchical_first,
            hierarchical_last,
            longterm_ordering,
            longterm_target: if longterm_ordering {
                ctx.longterm_target(box_hop)
            } else {
                0
            },
            edge_iteration: flags.is_multi_box && ctx.is_edge_iteration(box_num),
            sync_up_buffer_with_ltu: ctx.sync_up_buffer_with_ltu(current_op),
            qp_set: ctx.qp_set(slice_iter),
        };
        trace!(
            ?current_op,
            ?direction,
            box_hop,
            box_num,
            slice_iter,
            all2all_iter,
            cell = leg.scale_up.cell_count,
            box_count = leg.counts.box_count,
            scale_out = leg.scale_out.is_some(),
            "specialized slice"
        );
        leg
    }

    /// Last-slice counts of remainder-carrying operations depend on which
    /// box's share the leg moves.
    fn box_counts(
        &self,
        ctx: &OperationContext,
        current_op: CollectiveOp,
        box_num: BoxId,
        slice_iter: u32,
        direction: Direction,
    ) -> SliceCounts {
        let mut counts = *ctx.counts(slice_iter);
        if !ctx.is_last_slice(slice_iter) {
            return counts;
        }
        let calc = self.remainder();
        let box_size = u64::from(ctx.box_size());
        let rank_in_box = u64::from(ctx.rank_in_box());
        match ctx.op() {
            CollectiveOp::AllReduce | CollectiveOp::Reduce => {
                let moves_remote_share = (current_op == CollectiveOp::ReduceScatter
                    && direction.is_send())
                    || (current_op != CollectiveOp::ReduceScatter && !direction.is_send());
                let box_index = if moves_remote_share {
                    box_num
                } else {
                    ctx.my_box()
                };
                let box_share = counts.rank_scale_up * box_size;
                counts.box_count =
                    calc.share_of(counts.slice_total, box_share, u64::from(box_index));
                counts.rank_scale_out =
                    calc.share_of(counts.box_count, counts.rank_scale_up, rank_in_box);
            }
            // Broadcast splits each slice across the box only.
            CollectiveOp::Broadcast => {
                counts.rank_scale_out =
                    calc.share_of(counts.box_count, counts.rank_scale_up, rank_in_box);
            }
            _ => {}
        }
        counts.has_buffer_size = ctx.policy().remainder_allowed
            && counts.box_count != counts.rank_scale_up * box_size;
        counts
    }
}

fn scale_out_leg(
    ctx: &OperationContext,
    current_op: CollectiveOp,
    counts: &SliceCounts,
    box_num: BoxId,
    slice_iter: u32,
    all2all_iter: u32,
    direction: Direction,
) -> ScaleOutLeg {
    let flags = ctx.flags();
    let op = ctx.op();
    let mut cell_count = counts.rank_scale_out;
    if op == CollectiveOp::AllToAll && !flags.is_slicing {
        let per_box = counts.rank_scale_up * u64::from(ctx.box_size());
        cell_count = if flags.host_nic {
            // The last iteration carries what is left of the share.
            let moved = ctx.optimal_count() * u64::from(all2all_iter);
            ctx.optimal_count().min(per_box.saturating_sub(moved))
        } else {
            per_box
        };
    }
    let stride_count =
        if flags.is_complex || (direction.is_send() && op == CollectiveOp::AllToAll && flags.is_slicing) {
            counts.rank_scale_up
        } else {
            counts.scale_up_stride
        };
    let hop = (box_num + ctx.box_iterations() - ctx.my_box()) % ctx.box_iterations();
    ScaleOutLeg {
        remote_box: box_num,
        remote_rank: ctx.box_representative(box_num),
        cell_count,
        stride_count,
        device_count: counts.box_stride,
        rank_offset: u64::from(ctx.rank_in_box()) * stride_count * ctx.data_type_size(),
        iter_offset: ctx.all2all_offset(all2all_iter),
        pool: scale_out_pool(ctx, current_op),
        do_reduction: direction.is_send()
            && flags.is_reduction
            && hop >= ctx.scaleout_reduction_buffers(),
        wait_for_reduce_scatter: gather_waits_for_rs(ctx, current_op, box_num, false),
        qp_set: ctx.qp_set(slice_iter),
    }
}

pub(crate) fn is_scale_out_required(
    ctx: &OperationContext,
    current_op: CollectiveOp,
    direction: Direction,
    box_num: BoxId,
) -> bool {
    if box_num == ctx.my_box() {
        return false;
    }
    let flags = ctx.flags();
    policy(current_op)
        .scale_out_rule(current_op)
        .required(&ScaleOutQuery {
            collective_op: ctx.op(),
            direction,
            box_num,
            my_box: ctx.my_box(),
            box_count: ctx.box_iterations(),
            root_box: ctx.root_box(),
            is_root: flags.is_root,
            is_root_peer: flags.is_root_peer,
        })
}

/// The gather phase of an all-reduce or reduce must not start before the
/// reduce-scatter phase has delivered its data.
fn gather_waits_for_rs(
    ctx: &OperationContext,
    current_op: CollectiveOp,
    box_num: BoxId,
    scale_up: bool,
) -> bool {
    let flags = ctx.flags();
    let my_box = ctx.my_box();
    let all_reduce_gather = ctx.op() == CollectiveOp::AllReduce && current_op == CollectiveOp::AllGather;
    let reduce_gather = ctx.op() == CollectiveOp::Reduce && current_op == CollectiveOp::Gather;
    if scale_up {
        (all_reduce_gather && (!flags.is_multi_box || box_num == my_box))
            || (reduce_gather && ctx.root_box() == Some(my_box) && !flags.is_root)
    } else {
        (all_reduce_gather && flags.is_multi_box && ctx.prev_box(box_num) == my_box)
            || (reduce_gather
                && flags.is_multi_box
                && ctx.root_box() == Some(box_num)
                && ctx.root_box() != Some(my_box))
    }
}

fn scale_up_pool(current_op: CollectiveOp) -> Option<PoolId> {
    match current_op {
        CollectiveOp::ReduceScatter => Some(PoolId::ReduceScaleUp),
        CollectiveOp::AllToAll => Some(PoolId::ScaleUpAllToAll),
        _ => None,
    }
}

fn scale_out_pool(ctx: &OperationContext, current_op: CollectiveOp) -> Option<PoolId> {
    match current_op {
        CollectiveOp::ReduceScatter | CollectiveOp::AllToAll => {
            Some(if ctx.flags().direct_remote_memory {
                PoolId::ScaleOutGdr
            } else {
                PoolId::ScaleOut
            })
        }
        _ => None,
    }
}
