//! Collective planning
//!
//! Turns a collective call into its per-rank plan and the concrete legs each
//! slice and box hop executes.

mod collective;
mod emit;
mod p2p;
mod plan;
mod policy;
mod remainder;
mod slice;

pub use collective::{CollectiveOp, CollectiveParams, DataType, Direction, ReduceOp};
pub use emit::{AddressGenerator, CallPlan, CallResources, FlatAddressGenerator, LegDescriptor};
pub use p2p::{PointToPointLeg, SendRecvRequest, specialize_p2p};
pub use plan::{OperationContext, PlanFlags, Planner, SliceCounts};
pub use policy::{
    AddrRule, Divisor, InPlaceInput, InPlaceRule, OpPolicy, ScaleOutQuery, ScaleOutRule, policy,
    sub_ops,
};
pub use remainder::{DefaultRemainder, RemainderCalculator};
pub use slice::{ScaleOutLeg, ScaleUpLeg, SliceLeg};
