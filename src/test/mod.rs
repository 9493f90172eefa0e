use crate::comm::Communicator;
use crate::config::PlannerConfig;

mod emit;
mod slice;

pub(crate) fn comm_with(cfg: &PlannerConfig, size: u32, rank: u32, box_size: u32) -> Communicator {
    Communicator::initialize(0, size, rank, box_size, cfg).expect("valid communicator")
}

pub(crate) fn comm(size: u32, rank: u32, box_size: u32) -> Communicator {
    comm_with(&PlannerConfig::default(), size, rank, box_size)
}
