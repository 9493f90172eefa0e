//! Planning engine for collective communication across boxes of
//! accelerators.
//!
//! A call enters through [`cc::Planner`], which derives an immutable
//! [`cc::OperationContext`] from the call parameters and the
//! [`comm::Communicator`] topology. The specializers then turn each slice and
//! box hop into concrete legs, drawing staging slots from
//! [`pool::DeviceBufferPool`] and connections from the [`qp`] managers.

pub mod cc;
pub mod comm;
pub mod config;
pub mod error;
pub mod pool;
pub mod qp;

#[cfg(test)]
mod test;
