//! Communicator topology
//!
//! Rank set, box membership and the cached rank subsets the planner consults.

mod communicator;
mod rank_set;

pub type Rank = u32;
pub type BoxId = u32;
pub type CommId = u32;

pub use communicator::{Communicator, Inclusion};
pub use rank_set::RankSet;
