//! Static per-operation policy.
//!
//! Everything the planner needs to know about an operation kind lives in one
//! table indexed by [`CollectiveOp::index`]. `None` marks a rule the operation
//! does not define; consulting it is an internal error.

use super::collective::{CollectiveOp, CollectiveOp as Op, Direction};
use crate::comm::BoxId;
use crate::error::invariant_violation;

/// Granularity slice sizes are rounded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divisor {
    CommSize,
    BoxSize,
    BoxSizeMinusOne,
    One,
}

impl Divisor {
    pub fn resolve(self, comm_size: u32, box_size: u32) -> u64 {
        let value = match self {
            Divisor::CommSize => comm_size,
            Divisor::BoxSize => box_size,
            Divisor::BoxSizeMinusOne => box_size.saturating_sub(1),
            Divisor::One => 1,
        };
        crate::invariant!(
            value > 0,
            "divisor {self:?} resolves to zero (comm size {comm_size}, box size {box_size})"
        );
        u64::from(value)
    }
}

/// When the send and receive buffers describe an in-place call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InPlaceRule {
    SameAddress,
    /// `recv == send + (bytes / comm_size) * rank`
    RecvAtRankShare,
    /// `send == recv + bytes * rank`
    SendAtRankShare,
    /// Same address, but 16-bit and multi-box reductions never run in place.
    SameAddressUnlessWidened,
    /// Identical buffers are rejected outright.
    Forbidden,
    Never,
}

/// Inputs of the in-place test.
#[derive(Debug, Clone, Copy)]
pub struct InPlaceInput {
    pub send_addr: u64,
    pub recv_addr: u64,
    pub size_bytes: u64,
    pub rank: u32,
    pub comm_size: u32,
    pub is_16bit: bool,
    pub multi_box: bool,
}

impl InPlaceRule {
    pub fn evaluate(self, input: &InPlaceInput) -> bool {
        let InPlaceInput {
            send_addr,
            recv_addr,
            size_bytes,
            rank,
            comm_size,
            is_16bit,
            multi_box,
        } = *input;
        match self {
            InPlaceRule::SameAddress => send_addr == recv_addr,
            InPlaceRule::RecvAtRankShare => {
                recv_addr == send_addr + (size_bytes / u64::from(comm_size)) * u64::from(rank)
            }
            InPlaceRule::SendAtRankShare => send_addr == recv_addr + size_bytes * u64::from(rank),
            InPlaceRule::SameAddressUnlessWidened => {
                !is_16bit && !multi_box && send_addr == recv_addr
            }
            InPlaceRule::Forbidden => {
                crate::invariant!(
                    send_addr != recv_addr,
                    "in-place all-to-all is unsupported (send {send_addr:#x} == recv {recv_addr:#x})"
                );
                false
            }
            InPlaceRule::Never => false,
        }
    }
}

/// Which ranks carry a meaningful send or receive address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrRule {
    Always,
    RootOnly,
}

impl AddrRule {
    pub fn holds(self, is_root: bool) -> bool {
        match self {
            AddrRule::Always => true,
            AddrRule::RootOnly => is_root,
        }
    }
}

/// Scale-out predicate of a sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutRule {
    /// Every remote box is exchanged with.
    Symmetric,
    AllGather,
    Scatter,
    Gather,
    SimpleBroadcast,
}

/// Facts about one box hop consulted by [`ScaleOutRule::required`].
#[derive(Debug, Clone, Copy)]
pub struct ScaleOutQuery {
    pub collective_op: CollectiveOp,
    pub direction: Direction,
    pub box_num: BoxId,
    pub my_box: BoxId,
    pub box_count: u32,
    pub root_box: Option<BoxId>,
    pub is_root: bool,
    pub is_root_peer: bool,
}

impl ScaleOutQuery {
    fn next_box(&self) -> BoxId {
        (self.my_box + 1) % self.box_count
    }

    fn prev_box(&self) -> BoxId {
        (self.my_box + self.box_count - 1) % self.box_count
    }
}

impl ScaleOutRule {
    /// Own-box hops are filtered by the caller.
    pub fn required(self, q: &ScaleOutQuery) -> bool {
        let send = q.direction.is_send();
        let single_peer = q.collective_op == CollectiveOp::SinglePeerBroadcast;
        match self {
            ScaleOutRule::Symmetric => true,
            ScaleOutRule::AllGather => !matches!(
                q.collective_op,
                CollectiveOp::Broadcast | CollectiveOp::SinglePeerBroadcast
            ),
            ScaleOutRule::Scatter => {
                if send {
                    q.box_num == q.next_box()
                        && Some(q.box_num) != q.root_box
                        && (!single_peer || q.is_root || q.is_root_peer)
                } else {
                    q.box_num == q.prev_box()
                        && Some(q.my_box) != q.root_box
                        && (!single_peer || q.is_root_peer)
                }
            }
            ScaleOutRule::Gather => {
                if send {
                    Some(q.box_num) == q.root_box
                } else {
                    Some(q.my_box) == q.root_box
                }
            }
            ScaleOutRule::SimpleBroadcast => {
                if send {
                    q.is_root
                } else {
                    q.is_root_peer && Some(q.box_num) == q.root_box
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpPolicy {
    pub divisor: Divisor,
    pub in_place: Option<InPlaceRule>,
    pub send_addr: Option<AddrRule>,
    pub recv_addr: Option<AddrRule>,
    /// Decomposed into sub-operations with separately strided data.
    pub complex: bool,
    /// Per-rank shares round up and the last rank holds the remainder.
    pub remainder_allowed: bool,
    pub reduction: bool,
    pub scale_out: Option<ScaleOutRule>,
    pub sub_ops: &'static [CollectiveOp],
}

static POLICIES: [OpPolicy; CollectiveOp::COUNT] = [
    // AllReduce
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::SameAddress),
        send_addr: Some(AddrRule::Always),
        recv_addr: Some(AddrRule::Always),
        complex: true,
        remainder_allowed: true,
        reduction: true,
        scale_out: None,
        sub_ops: &[Op::ReduceScatter, Op::AllGather],
    },
    // ReduceScatter
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::RecvAtRankShare),
        send_addr: Some(AddrRule::Always),
        recv_addr: Some(AddrRule::Always),
        complex: false,
        remainder_allowed: false,
        reduction: true,
        scale_out: Some(ScaleOutRule::Symmetric),
        sub_ops: &[Op::ReduceScatter],
    },
    // AllGather
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::SendAtRankShare),
        send_addr: Some(AddrRule::Always),
        recv_addr: Some(AddrRule::Always),
        complex: false,
        remainder_allowed: false,
        reduction: false,
        scale_out: Some(ScaleOutRule::AllGather),
        sub_ops: &[Op::AllGather],
    },
    // Gather
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::SameAddress),
        send_addr: None,
        recv_addr: None,
        complex: false,
        remainder_allowed: false,
        reduction: false,
        scale_out: Some(ScaleOutRule::Gather),
        sub_ops: &[Op::Gather],
    },
    // Scatter
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: None,
        send_addr: None,
        recv_addr: None,
        complex: false,
        remainder_allowed: false,
        reduction: false,
        scale_out: Some(ScaleOutRule::Scatter),
        sub_ops: &[Op::Scatter],
    },
    // Broadcast
    OpPolicy {
        divisor: Divisor::BoxSize,
        in_place: Some(InPlaceRule::SameAddress),
        send_addr: Some(AddrRule::RootOnly),
        recv_addr: Some(AddrRule::Always),
        complex: true,
        remainder_allowed: true,
        reduction: false,
        scale_out: None,
        sub_ops: &[Op::Scatter, Op::AllGather],
    },
    // SimpleBroadcast
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::SameAddress),
        send_addr: Some(AddrRule::RootOnly),
        recv_addr: Some(AddrRule::Always),
        complex: false,
        remainder_allowed: false,
        reduction: false,
        scale_out: Some(ScaleOutRule::SimpleBroadcast),
        sub_ops: &[Op::SimpleBroadcast],
    },
    // SinglePeerBroadcast
    OpPolicy {
        divisor: Divisor::BoxSizeMinusOne,
        in_place: Some(InPlaceRule::SameAddress),
        send_addr: Some(AddrRule::RootOnly),
        recv_addr: Some(AddrRule::Always),
        complex: true,
        remainder_allowed: true,
        reduction: false,
        scale_out: None,
        sub_ops: &[Op::Scatter, Op::AllGather],
    },
    // AllToAll
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::Forbidden),
        send_addr: Some(AddrRule::Always),
        recv_addr: Some(AddrRule::Always),
        complex: false,
        remainder_allowed: false,
        reduction: false,
        scale_out: Some(ScaleOutRule::Symmetric),
        sub_ops: &[Op::AllToAll],
    },
    // Reduce
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::SameAddressUnlessWidened),
        send_addr: Some(AddrRule::Always),
        recv_addr: Some(AddrRule::RootOnly),
        complex: true,
        remainder_allowed: true,
        reduction: true,
        scale_out: None,
        sub_ops: &[Op::ReduceScatter, Op::Gather],
    },
    // NoCollective
    OpPolicy {
        divisor: Divisor::CommSize,
        in_place: Some(InPlaceRule::Never),
        send_addr: None,
        recv_addr: None,
        complex: false,
        remainder_allowed: false,
        reduction: false,
        scale_out: None,
        sub_ops: &[],
    },
];

pub fn policy(op: CollectiveOp) -> &'static OpPolicy {
    &POLICIES[op.index()]
}

/// Ordered sub-operations executed for `op`.
pub fn sub_ops(op: CollectiveOp) -> &'static [CollectiveOp] {
    policy(op).sub_ops
}

impl OpPolicy {
    pub fn in_place_rule(&self, op: CollectiveOp) -> InPlaceRule {
        self.in_place.unwrap_or_else(|| {
            invariant_violation(format_args!("no in-place rule for {op:?}"))
        })
    }

    pub fn scale_out_rule(&self, op: CollectiveOp) -> ScaleOutRule {
        self.scale_out.unwrap_or_else(|| {
            invariant_violation(format_args!("{op:?} has no scale-out rule as a sub-operation"))
        })
    }

    pub fn send_addr_rule(&self, op: CollectiveOp) -> AddrRule {
        self.send_addr.unwrap_or_else(|| {
            invariant_violation(format_args!("no send address rule for {op:?}"))
        })
    }

    pub fn recv_addr_rule(&self, op: CollectiveOp) -> AddrRule {
        self.recv_addr.unwrap_or_else(|| {
            invariant_violation(format_args!("no recv address rule for {op:?}"))
        })
    }
}
