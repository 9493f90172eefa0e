//! Collective operation planner.
//!
//! [`Planner::plan`] turns one call's parameters and the communicator
//! topology into an [`OperationContext`]: the resolved operation kind, its
//! in-place and reduction flags, the box and slice iteration counts and the
//! per-slice element counts. The context is immutable; everything that varies
//! per box hop or per slice is derived from it by the specializers.

use serde::Serialize;
use tracing::{debug, instrument};

use super::collective::{CollectiveOp, CollectiveParams};
use super::policy::{InPlaceInput, OpPolicy, policy};
use super::remainder::{DefaultRemainder, RemainderCalculator};
use crate::comm::{BoxId, CommId, Communicator, Rank};
use crate::config::PlannerConfig;
use crate::invariant;

/// Fixed-point fraction bits of the slice-size ratio.
const SLICE_RATIO_ACC: u32 = 4;
/// Slice counts tried past the minimum.
const MAX_NUM_SLICES_SEARCH: u64 = 4;

/// Element counts of one slice. Units are elements of the call's data type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SliceCounts {
    /// Elements of the call covered by the slice.
    pub slice_total: u64,
    pub rank_scale_up: u64,
    pub rank_scale_out: u64,
    pub scale_up_stride: u64,
    pub box_count: u64,
    pub box_stride: u64,
    pub slice_offset: u64,
    /// Elements held by the last rank when shares do not divide evenly.
    pub remainder: u64,
    /// The box holds less than a full set of rank shares.
    pub has_buffer_size: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanFlags {
    pub is_root: bool,
    pub is_root_peer: bool,
    pub is_root_box: bool,
    pub is_multi_box: bool,
    pub is_peers_only: bool,
    pub is_last_rank_in_box: bool,
    pub in_place: bool,
    pub is_reduction: bool,
    pub is_16bit_reduction: bool,
    pub is_complex: bool,
    pub is_slicing: bool,
    pub host_nic: bool,
    pub direct_remote_memory: bool,
}

impl PlanFlags {
    pub fn is_root_or_root_peer(&self) -> bool {
        self.is_root || self.is_root_peer
    }
}

#[derive(Debug, Clone, Copy)]
struct Shape {
    count: u64,
    ranks: u64,
    box_size: u64,
    boxes: u64,
}

/// Immutable result of planning one collective call on one rank.
#[derive(Debug, Clone, Serialize)]
pub struct OperationContext {
    params: CollectiveParams,
    requested_op: CollectiveOp,
    flags: PlanFlags,
    comm_id: CommId,
    my_rank: Rank,
    my_box: BoxId,
    rank_in_box: u32,
    box_size: u32,
    comm_size: u32,
    root_box: Option<BoxId>,
    data_type_size: u64,
    total_count_per_rank: u64,
    box_iterations: u32,
    slice_iterations: u32,
    buffer_count: u64,
    optimal_count: u64,
    all2all_iterations: u32,
    all2all_stride_count: u64,
    scaleout_reduction_buffers: u32,
    scaleout_longterm_amount: u32,
    collective_ctr: u64,
    max_qp_sets: u32,
    counts: SliceCounts,
    last: SliceCounts,
}

#[derive(Debug)]
pub struct Planner {
    cfg: PlannerConfig,
    remainder: Box<dyn RemainderCalculator>,
}

impl Planner {
    pub fn new(cfg: PlannerConfig) -> Self {
        Self::with_remainder(cfg, Box::new(DefaultRemainder))
    }

    pub fn with_remainder(cfg: PlannerConfig, remainder: Box<dyn RemainderCalculator>) -> Self {
        Self { cfg, remainder }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.cfg
    }

    pub(crate) fn remainder(&self) -> &dyn RemainderCalculator {
        self.remainder.as_ref()
    }

    /// Plan one collective call on the local rank of `comm`.
    #[instrument(
        skip(self, params, comm),
        fields(comm = comm.id(), rank = comm.my_rank(), op = ?params.op, count = params.count)
    )]
    pub fn plan(&self, params: &CollectiveParams, comm: &Communicator) -> OperationContext {
        let my_rank = comm.my_rank();
        let comm_size = comm.size();
        let box_size = comm.box_size();
        let multi_box = comm.is_multi_box();

        if let Some(root) = params.root {
            invariant!(
                root < comm_size,
                "root {root} outside communicator of size {comm_size}"
            );
        }
        let root_box = params.root.map(|root| comm.box_of(root));
        let is_root = params.root == Some(my_rank);
        let is_root_peer = params
            .root
            .is_some_and(|root| root != my_rank && comm.are_peers(my_rank, root));

        let requested_op = params.op;
        let op = self.resolve_op(params, box_size, multi_box);
        let policy = policy(op);
        let mut params = *params;
        params.op = op;

        let in_place = policy.in_place_rule(op).evaluate(&InPlaceInput {
            send_addr: params.send_addr,
            recv_addr: params.recv_addr,
            size_bytes: params.size_bytes(),
            rank: my_rank,
            comm_size,
            is_16bit: params.data_type.is_16bit_float(),
            multi_box,
        });
        let is_reduction = policy.reduction;
        let is_16bit_reduction = is_reduction && params.data_type.is_16bit_float();

        let box_iterations = if multi_box && op != CollectiveOp::NoCollective {
            comm.box_count()
        } else {
            1
        };

        let data_type_size = params.data_type.size_bytes();
        let mut buffer_count = (comm.slice_size() / data_type_size).max(1);
        if op == CollectiveOp::SinglePeerBroadcast && self.cfg.host_nic && multi_box {
            buffer_count = (buffer_count / u64::from(box_size - 1)).max(1);
        }

        let shape = Shape {
            count: params.count,
            ranks: u64::from(comm_size),
            box_size: u64::from(box_size),
            boxes: u64::from(box_iterations),
        };
        let calc = self.remainder.as_ref();
        let (base, per_rank) = initial_counts(op, shape, buffer_count, calc);

        let is_slicing = calc.is_slicing(per_rank, buffer_count);
        let (slice_iterations, optimal_count, counts) = if is_slicing {
            let divisor = policy.divisor.resolve(comm_size, box_size);
            let (slices, optimal) = self.num_slices(op, params.count, per_rank, divisor, buffer_count);
            (slices, optimal, sliced_counts(op, shape, optimal, per_rank, base))
        } else {
            (1, buffer_count, base)
        };

        let mut all2all_iterations = 1;
        let mut all2all_stride_count = 0;
        if op == CollectiveOp::AllToAll && is_slicing {
            all2all_iterations = box_size;
            all2all_stride_count = counts.rank_scale_up;
        }
        let last = last_slice_counts(op, policy, shape, counts, slice_iterations, calc);
        // Host staging buffers hold one slice; larger box shares take several rounds.
        if op == CollectiveOp::AllToAll && !is_slicing && self.cfg.host_nic {
            let per_box = last.rank_scale_up * shape.box_size;
            all2all_iterations = per_box.div_ceil(optimal_count).max(1) as u32;
            all2all_stride_count = optimal_count;
        }

        let reduction_buffers = self.cfg.scaleout_reduction_buffers;
        let scaleout_longterm_amount =
            scaleout_longterm_amount(op, multi_box, reduction_buffers, box_iterations);

        let ctx = OperationContext {
            params,
            requested_op,
            flags: PlanFlags {
                is_root,
                is_root_peer,
                is_root_box: root_box == Some(comm.my_box()),
                is_multi_box: multi_box,
                is_peers_only: comm.is_peers_only(),
                is_last_rank_in_box: comm.is_last_rank_in_box(),
                in_place,
                is_reduction,
                is_16bit_reduction,
                is_complex: policy.complex,
                is_slicing,
                host_nic: self.cfg.host_nic,
                direct_remote_memory: self.cfg.direct_remote_memory,
            },
            comm_id: comm.id(),
            my_rank,
            my_box: comm.my_box(),
            rank_in_box: comm.rank_in_box(),
            box_size,
            comm_size,
            root_box,
            data_type_size,
            total_count_per_rank: per_rank,
            box_iterations,
            slice_iterations,
            buffer_count,
            optimal_count,
            all2all_iterations,
            all2all_stride_count,
            scaleout_reduction_buffers: reduction_buffers,
            scaleout_longterm_amount,
            collective_ctr: comm.collective_ctr(),
            max_qp_sets: comm.max_qp_sets(),
            counts,
            last,
        };
        debug!(
            resolved = ?op,
            in_place,
            box_iterations,
            slice_iterations,
            optimal_count,
            per_rank,
            "planned collective"
        );
        ctx
    }

    /// Broadcasts are downgraded to a simpler algorithm when the payload or
    /// the box is small. A single-peer broadcast needs a second rank in the
    /// box besides the root peer.
    fn resolve_op(&self, params: &CollectiveParams, box_size: u32, multi_box: bool) -> CollectiveOp {
        match params.op {
            CollectiveOp::Broadcast => {}
            CollectiveOp::SinglePeerBroadcast if box_size <= 2 => return CollectiveOp::SimpleBroadcast,
            op => return op,
        }
        if params.size_bytes() <= self.cfg.complex_bcast_min_size || box_size <= 2 {
            CollectiveOp::SimpleBroadcast
        } else if self.cfg.single_peer_broadcast_allowed
            && (self.cfg.use_single_peer_broadcast || !multi_box)
        {
            CollectiveOp::SinglePeerBroadcast
        } else {
            CollectiveOp::Broadcast
        }
    }

    /// Pick the slice count whose last slice is closest in size to the
    /// others. Slice sizes are rounded up to a multiple of `divisor`.
    fn num_slices(
        &self,
        op: CollectiveOp,
        count: u64,
        per_rank: u64,
        divisor: u64,
        buffer_count: u64,
    ) -> (u32, u64) {
        let calc = self.remainder.as_ref();
        let min_buffer = buffer_count / self.cfg.min_imb_size_factor.max(1);
        let perfect_ratio = 1u64 << SLICE_RATIO_ACC;

        let mut min_slices = per_rank.div_ceil(buffer_count);
        let mut max_slices = min_slices + MAX_NUM_SLICES_SEARCH;
        if min_slices == 1 {
            min_slices = 2;
            max_slices += 1;
        }

        let mut num_slices = 0;
        let mut optimal = buffer_count;
        let mut min_ratio = buffer_count << SLICE_RATIO_ACC;

        if calc.is_valid_slicing(buffer_count, buffer_count, per_rank, min_slices, 0) {
            if let Some(last) = per_rank
                .checked_sub(buffer_count * (min_slices - 1))
                .filter(|last| *last > 0)
            {
                num_slices = min_slices;
                min_ratio = (buffer_count << SLICE_RATIO_ACC) / last;
            }
        }

        for candidate in min_slices..max_slices {
            let rough = per_rank.div_ceil(candidate);
            let slice = rough.div_ceil(divisor) * divisor;
            let full = slice * (candidate - 1);
            if per_rank <= full {
                continue;
            }
            let last = per_rank - full;
            if calc.is_valid_slicing(buffer_count, slice, per_rank, candidate, min_buffer) {
                let ratio = (slice << SLICE_RATIO_ACC) / last;
                if ratio < min_ratio {
                    min_ratio = ratio;
                    num_slices = candidate;
                    optimal = slice;
                }
            } else if slice < min_buffer || min_ratio == perfect_ratio {
                break;
            }
        }

        invariant!(
            num_slices > 1,
            "no optimal buffer size for {op:?}: count {count}, per rank {per_rank}, divisor {divisor}, buffer {buffer_count}"
        );
        debug!(num_slices, optimal, min_ratio, "selected slicing");
        (num_slices as u32, optimal)
    }
}

fn initial_counts(
    op: CollectiveOp,
    shape: Shape,
    buffer_count: u64,
    calc: &dyn RemainderCalculator,
) -> (SliceCounts, u64) {
    let Shape {
        count: c,
        ranks: n,
        box_size: p,
        ..
    } = shape;
    let mut counts = SliceCounts::default();
    let per_rank = match op {
        CollectiveOp::SimpleBroadcast => {
            counts.scale_up_stride = c;
            c
        }
        CollectiveOp::Scatter => {
            counts.scale_up_stride = c / n;
            counts.box_stride = buffer_count * p;
            c / n
        }
        CollectiveOp::Gather | CollectiveOp::AllGather => {
            counts.scale_up_stride = c;
            counts.box_stride = c * p;
            c
        }
        CollectiveOp::Broadcast => {
            counts.scale_up_stride = c;
            calc.div(c, p)
        }
        CollectiveOp::SinglePeerBroadcast => {
            counts.scale_up_stride = buffer_count;
            calc.div(c, p - 1)
        }
        CollectiveOp::Reduce | CollectiveOp::AllReduce => {
            counts.scale_up_stride = buffer_count;
            let per_rank = calc.div(c, n);
            counts.box_stride = per_rank * p;
            per_rank
        }
        CollectiveOp::AllToAll | CollectiveOp::ReduceScatter => {
            counts.scale_up_stride = c / n;
            counts.box_stride = counts.scale_up_stride * p;
            c / n
        }
        CollectiveOp::NoCollective => c,
    };
    (counts, per_rank)
}

fn sliced_counts(
    op: CollectiveOp,
    shape: Shape,
    optimal: u64,
    per_rank: u64,
    base: SliceCounts,
) -> SliceCounts {
    let Shape {
        ranks: n,
        box_size: p,
        ..
    } = shape;
    let o = optimal;
    let mut counts = base;
    counts.rank_scale_up = o;
    counts.rank_scale_out = o;
    counts.slice_offset = o;
    match op {
        CollectiveOp::SimpleBroadcast | CollectiveOp::NoCollective => {
            counts.box_count = o;
            counts.slice_total = o;
        }
        CollectiveOp::Scatter => {
            counts.box_stride = counts.scale_up_stride * p;
            counts.box_count = o * p;
            counts.rank_scale_out = counts.box_count;
            counts.slice_total = o * n;
        }
        CollectiveOp::Gather | CollectiveOp::AllGather => {
            counts.box_count = o * p;
            counts.slice_total = o;
        }
        CollectiveOp::Broadcast => {
            counts.box_count = o * p;
            counts.slice_offset = counts.box_count;
            counts.slice_total = o * p;
        }
        CollectiveOp::SinglePeerBroadcast => {
            counts.scale_up_stride = o;
            counts.box_count = o * (p - 1);
            counts.rank_scale_out = counts.box_count;
            counts.slice_offset = counts.box_count;
            counts.slice_total = counts.box_count;
        }
        CollectiveOp::Reduce | CollectiveOp::AllReduce => {
            counts.scale_up_stride = o;
            counts.box_count = o * p;
            counts.box_stride = per_rank * p;
            counts.slice_offset = o * p;
            counts.slice_total = o * n;
        }
        CollectiveOp::AllToAll | CollectiveOp::ReduceScatter => {
            counts.box_count = o * p;
            counts.slice_total = o * n;
        }
    }
    counts
}

/// Counts of the final slice, which absorbs whatever the regular slices
/// did not cover.
fn last_slice_counts(
    op: CollectiveOp,
    policy: &OpPolicy,
    shape: Shape,
    regular: SliceCounts,
    slices: u32,
    calc: &dyn RemainderCalculator,
) -> SliceCounts {
    let Shape {
        count: c,
        ranks: n,
        box_size: p,
        boxes: b,
    } = shape;
    let before = u64::from(slices - 1);
    let mut last = regular;
    match op {
        CollectiveOp::SimpleBroadcast | CollectiveOp::NoCollective => {
            let total = c - regular.rank_scale_up * before;
            last.rank_scale_up = total;
            last.rank_scale_out = total;
            last.box_count = total;
            last.slice_total = total;
        }
        CollectiveOp::Gather | CollectiveOp::AllGather => {
            let total = c - regular.rank_scale_up * before;
            last.rank_scale_up = total;
            last.rank_scale_out = total;
            last.box_count = total * p;
            last.slice_total = total;
        }
        CollectiveOp::Broadcast => {
            let total = c - regular.box_count * before;
            last.rank_scale_up = calc.div(total, p);
            last.rank_scale_out = last.rank_scale_up;
            last.scale_up_stride = last.rank_scale_up;
            last.box_count = total;
            last.box_stride = 0;
            last.remainder = calc.remainder_count(total, last.rank_scale_up, p);
            last.slice_total = total;
        }
        CollectiveOp::SinglePeerBroadcast => {
            let total = c - regular.box_count * before;
            last.rank_scale_up = calc.div(total, p - 1);
            last.scale_up_stride = last.rank_scale_up;
            last.box_count = total;
            last.box_stride = 0;
            last.rank_scale_out = total;
            last.slice_total = total;
        }
        CollectiveOp::Scatter => {
            let total = c - regular.rank_scale_up * n * before;
            last.rank_scale_up = total / n;
            last.box_count = last.rank_scale_up * p;
            last.rank_scale_out = last.box_count;
            last.slice_total = total;
        }
        CollectiveOp::AllToAll => {
            let total = c / n - regular.rank_scale_up * before;
            last.rank_scale_up = total;
            last.box_count = total * p;
            last.rank_scale_out = total;
            last.slice_total = total * n;
        }
        CollectiveOp::ReduceScatter => {
            let total = c - regular.box_count * b * before;
            last.rank_scale_up = total / n;
            last.box_count = last.rank_scale_up * p;
            last.rank_scale_out = last.rank_scale_up;
            last.slice_total = total;
        }
        CollectiveOp::Reduce | CollectiveOp::AllReduce => {
            let total = c - regular.box_count * b * before;
            last.rank_scale_up = calc.div(total, n);
            last.remainder = calc.remainder_count(total, last.rank_scale_up, n);
            last.rank_scale_out = last.rank_scale_up;
            last.scale_up_stride = last.rank_scale_up;
            last.box_count = last.rank_scale_up * p;
            last.slice_total = total;
        }
    }
    last.has_buffer_size =
        policy.remainder_allowed && last.box_count != last.rank_scale_up * p;
    last
}

fn scaleout_longterm_amount(
    op: CollectiveOp,
    multi_box: bool,
    reduction_buffers: u32,
    box_iterations: u32,
) -> u32 {
    let reduces = matches!(
        op,
        CollectiveOp::ReduceScatter | CollectiveOp::AllReduce | CollectiveOp::Reduce
    );
    let amount = if multi_box && reduces {
        if reduction_buffers >= box_iterations {
            1
        } else if 2 * reduction_buffers >= box_iterations {
            box_iterations + 1 - reduction_buffers
        } else {
            reduction_buffers + 1
        }
    } else {
        1
    };
    invariant!(
        amount <= reduction_buffers + 1,
        "longterm amount {amount} exceeds reduction buffers {reduction_buffers} + 1"
    );
    amount
}

impl OperationContext {
    /// Call parameters with the resolved operation kind.
    pub fn params(&self) -> &CollectiveParams {
        &self.params
    }

    pub fn op(&self) -> CollectiveOp {
        self.params.op
    }

    /// Operation kind as requested, before any broadcast downgrade.
    pub fn requested_op(&self) -> CollectiveOp {
        self.requested_op
    }

    pub fn policy(&self) -> &'static OpPolicy {
        policy(self.params.op)
    }

    pub fn flags(&self) -> &PlanFlags {
        &self.flags
    }

    pub fn comm_id(&self) -> CommId {
        self.comm_id
    }

    pub fn my_rank(&self) -> Rank {
        self.my_rank
    }

    pub fn my_box(&self) -> BoxId {
        self.my_box
    }

    pub fn rank_in_box(&self) -> u32 {
        self.rank_in_box
    }

    pub fn box_size(&self) -> u32 {
        self.box_size
    }

    pub fn comm_size(&self) -> u32 {
        self.comm_size
    }

    pub fn root_box(&self) -> Option<BoxId> {
        self.root_box
    }

    pub fn data_type_size(&self) -> u64 {
        self.data_type_size
    }

    pub fn total_count_per_rank(&self) -> u64 {
        self.total_count_per_rank
    }

    pub fn box_iterations(&self) -> u32 {
        self.box_iterations
    }

    pub fn slice_iterations(&self) -> u32 {
        self.slice_iterations
    }

    /// Staging buffer capacity in elements.
    pub fn buffer_count(&self) -> u64 {
        self.buffer_count
    }

    /// Elements per regular slice.
    pub fn optimal_count(&self) -> u64 {
        self.optimal_count
    }

    pub fn all2all_iterations(&self) -> u32 {
        self.all2all_iterations
    }

    /// Elements between consecutive all-to-all iterations.
    pub fn all2all_stride_count(&self) -> u64 {
        self.all2all_stride_count
    }

    /// Byte offset of `all2all_iter` into the box share. Zero unless the
    /// share is split over several iterations.
    pub fn all2all_offset(&self, all2all_iter: u32) -> u64 {
        if self.op() != CollectiveOp::AllToAll || self.all2all_iterations <= 1 {
            return 0;
        }
        self.all2all_stride_count * u64::from(all2all_iter) * self.data_type_size
    }

    pub fn scaleout_reduction_buffers(&self) -> u32 {
        self.scaleout_reduction_buffers
    }

    pub fn scaleout_longterm_amount(&self) -> u32 {
        self.scaleout_longterm_amount
    }

    pub fn collective_ctr(&self) -> u64 {
        self.collective_ctr
    }

    pub fn max_qp_sets(&self) -> u32 {
        self.max_qp_sets
    }

    pub fn is_last_slice(&self, slice_iter: u32) -> bool {
        slice_iter + 1 == self.slice_iterations
    }

    /// Counts for `slice_iter` before any per-box adjustment.
    pub fn counts(&self, slice_iter: u32) -> &SliceCounts {
        invariant!(
            slice_iter < self.slice_iterations,
            "slice {slice_iter} out of {} slices",
            self.slice_iterations
        );
        if self.is_last_slice(slice_iter) {
            &self.last
        } else {
            &self.counts
        }
    }

    /// Scale-out connection set used by `slice_iter`. Identical on every
    /// rank for the same call and slice.
    pub fn qp_set(&self, slice_iter: u32) -> u32 {
        ((self.collective_ctr + u64::from(slice_iter)) % u64::from(self.max_qp_sets.max(1))) as u32
    }

    pub fn address_offset(&self, slice_iter: u32) -> u64 {
        u64::from(slice_iter) * self.counts.slice_offset * self.data_type_size
    }

    pub fn send_address(&self, slice_iter: u32) -> u64 {
        self.params.send_addr + self.address_offset(slice_iter)
    }

    pub fn recv_address(&self, slice_iter: u32) -> u64 {
        self.params.recv_addr + self.address_offset(slice_iter)
    }

    /// Scale-up stride of `slice_iter`.
    pub fn stride_count(&self, slice_iter: u32) -> u64 {
        let counts = self.counts(slice_iter);
        if self.flags.is_complex {
            counts.rank_scale_up
        } else {
            counts.scale_up_stride
        }
    }

    pub fn chunk_count_to_clear(&self, slice_iter: u32) -> u64 {
        let correction = if self.op() == CollectiveOp::AllToAll {
            u64::from(self.box_size)
        } else {
            1
        };
        self.counts(slice_iter).rank_scale_up * correction
    }

    pub fn next_box(&self, box_num: BoxId) -> BoxId {
        (box_num + 1) % self.box_iterations
    }

    pub fn prev_box(&self, box_num: BoxId) -> BoxId {
        (box_num + self.box_iterations - 1) % self.box_iterations
    }

    /// The rank in `box_num` sharing the local in-box position.
    pub fn box_representative(&self, box_num: BoxId) -> Rank {
        box_num * self.box_size + self.rank_in_box
    }

    /// Box-hop index at which data from `box_num` is received.
    pub fn box_iter_recv(&self, box_num: BoxId) -> u32 {
        let hop = self.box_iterations + self.my_box - box_num;
        if hop >= self.box_iterations {
            hop - self.box_iterations
        } else {
            hop
        }
    }

    /// The receive from `box_num` falls within the final reduction buffers.
    pub fn is_edge_iteration(&self, box_num: BoxId) -> bool {
        self.box_iter_recv(box_num) + self.scaleout_reduction_buffers >= self.box_iterations
    }

    /// Whether box hop `box_iter` of `current_op` must hold a long-term
    /// ordering resource.
    pub fn is_longterm_required(&self, current_op: CollectiveOp, box_iter: u32, all2all_iter: u32) -> bool {
        let self_box = box_iter == 0;
        let root_box = self.flags.is_root_box;
        let flags = &self.flags;
        match self.op() {
            CollectiveOp::Broadcast => {
                current_op == CollectiveOp::Scatter
                    && !flags.is_root
                    && ((root_box && self_box) || (!root_box && box_iter == 1))
            }
            CollectiveOp::SinglePeerBroadcast => {
                current_op == CollectiveOp::Scatter
                    && !flags.is_root_or_root_peer()
                    && ((root_box && self_box) || (!root_box && box_iter == 1))
            }
            CollectiveOp::Reduce => {
                current_op == CollectiveOp::ReduceScatter
                    && self_box
                    && (flags.is_multi_box || !flags.is_root)
            }
            CollectiveOp::ReduceScatter => {
                current_op == CollectiveOp::ReduceScatter && flags.is_multi_box && self_box
            }
            CollectiveOp::AllReduce => current_op == CollectiveOp::ReduceScatter && self_box,
            CollectiveOp::AllToAll => self.all2all_iterations > 1 && !self_box && all2all_iter == 0,
            _ => false,
        }
    }

    /// Number of ordering points the long-term resource spans from
    /// `box_iter` on.
    pub fn longterm_target(&self, box_iter: u32) -> u32 {
        let boxes = self.box_iterations;
        let multi = self.flags.is_multi_box;
        match self.op() {
            CollectiveOp::Broadcast => {
                let target = boxes.min(2);
                if self.flags.is_root_box { target } else { target - 1 }
            }
            CollectiveOp::SinglePeerBroadcast => 1,
            CollectiveOp::ReduceScatter => boxes - 1 - box_iter,
            CollectiveOp::Reduce => {
                if !self.flags.is_root_box {
                    boxes
                } else if self.flags.is_root && multi {
                    boxes - 1
                } else if multi {
                    boxes
                } else {
                    1
                }
            }
            CollectiveOp::AllReduce => {
                if multi {
                    boxes + 1
                } else {
                    1
                }
            }
            CollectiveOp::AllToAll => self.all2all_iterations - 1,
            _ => 0,
        }
    }

    /// Scale-up buffers are synchronised through the long-term resource.
    pub fn sync_up_buffer_with_ltu(&self, current_op: CollectiveOp) -> bool {
        self.flags.is_multi_box
            && current_op == CollectiveOp::ReduceScatter
            && !self.flags.host_nic
            && self.box_size > 1
    }

    pub fn is_send_addr_valid(&self) -> bool {
        let op = self.op();
        self.policy().send_addr_rule(op).holds(self.flags.is_root)
    }

    pub fn is_recv_addr_valid(&self) -> bool {
        let op = self.op();
        self.policy().recv_addr_rule(op).holds(self.flags.is_root)
    }

    /// Bytes addressed through the send buffer. Fatal for operations
    /// without a send buffer rule.
    pub fn send_addr_size(&self) -> u64 {
        let op = self.op();
        self.policy().send_addr_rule(op);
        self.params.size_bytes()
    }

    pub fn recv_addr_size(&self) -> u64 {
        let op = self.op();
        self.policy().recv_addr_rule(op);
        let bytes = self.params.size_bytes();
        match op {
            CollectiveOp::AllGather => bytes * u64::from(self.comm_size),
            CollectiveOp::ReduceScatter => bytes / u64::from(self.comm_size),
            _ => bytes,
        }
    }
}
