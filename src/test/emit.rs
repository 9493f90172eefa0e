use super::{comm, comm_with};
use crate::cc::{
    CallResources, CollectiveOp, CollectiveParams, DataType, Direction, FlatAddressGenerator,
    LegDescriptor, Planner, SendRecvRequest,
};
use crate::comm::Communicator;
use crate::config::PlannerConfig;
use crate::pool::{DeviceBufferPool, PoolId};
use crate::qp::{Fabric, QP_ROLES, QpManager, QpRole, Qpn, ScaleOutQpManager, ScaleUpQpManager};

struct Fixture {
    pools: DeviceBufferPool,
    scale_up: ScaleUpQpManager,
    scale_out: ScaleOutQpManager,
}

impl Fixture {
    fn new(cfg: &PlannerConfig, c: &Communicator) -> Self {
        let sets = cfg.caps.max_qp_sets;
        let mut scale_up = ScaleUpQpManager::default();
        let mut scale_out = ScaleOutQpManager::new(sets);
        let up: Vec<Qpn> = (0..QP_ROLES as u32).map(|i| Qpn(0x10 + i)).collect();
        scale_up.register_qps(c, c.my_rank(), &up).unwrap();
        let per_rank = sets * QP_ROLES as u32;
        for remote in 0..c.size() {
            if c.same_box(remote, c.my_rank()) {
                continue;
            }
            let base = 0x1000 + remote * per_rank;
            let qps: Vec<Qpn> = (0..per_rank).map(|i| Qpn(base + i)).collect();
            scale_out.register_qps(c, remote, &qps).unwrap();
        }
        Self {
            pools: DeviceBufferPool::new(&cfg.pools).unwrap(),
            scale_up,
            scale_out,
        }
    }

    fn resources(&mut self, completion_base: u64) -> CallResources<'_> {
        CallResources {
            pools: &mut self.pools,
            scale_up: &self.scale_up,
            scale_out: &self.scale_out,
            addresses: &FlatAddressGenerator,
            completion_base,
        }
    }
}

fn all_reduce(count: u64) -> CollectiveParams {
    CollectiveParams::new(CollectiveOp::AllReduce, DataType::Float32, count)
        .with_buffers(0x1000, 0x8000_0000)
}

#[test]
fn call_walks_slices_ops_hops_and_directions_in_order() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);

    let plan = planner.emit_call(&mut c, &all_reduce(4096), &mut fx.resources(100));
    assert_eq!(plan.context.slice_iterations(), 1);
    assert_eq!(plan.legs.len(), 12);

    let shape: Vec<(CollectiveOp, u32, Direction, Fabric)> = plan
        .legs
        .iter()
        .map(|leg| (leg.current_op, leg.box_hop, leg.direction, leg.fabric))
        .collect();
    use CollectiveOp::{AllGather as Ag, ReduceScatter as Rs};
    use Direction::{Recv, Send};
    use Fabric::{ScaleOut as Out, ScaleUp as Up};
    assert_eq!(
        shape,
        [
            (Rs, 0, Send, Up),
            (Rs, 0, Recv, Up),
            (Rs, 1, Send, Up),
            (Rs, 1, Send, Out),
            (Rs, 1, Recv, Up),
            (Rs, 1, Recv, Out),
            (Ag, 0, Send, Up),
            (Ag, 0, Recv, Up),
            (Ag, 1, Send, Up),
            (Ag, 1, Send, Out),
            (Ag, 1, Recv, Up),
            (Ag, 1, Recv, Out),
        ]
    );
    for (i, leg) in plan.legs.iter().enumerate() {
        assert_eq!(leg.seq, i as u64);
        assert_eq!(leg.completion_target, 100 + i as u64 + 1);
        assert_eq!(leg.op, CollectiveOp::AllReduce);
    }
}

#[test]
fn counters_advance_once_per_call_and_per_scale_out_leg() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);

    planner.emit_call(&mut c, &all_reduce(4096), &mut fx.resources(0));
    assert_eq!(c.collective_ctr(), 1);
    assert_eq!(c.send_ctr(4), 2);
    assert_eq!(c.recv_ctr(4), 2);
    assert_eq!(c.send_ctr(1), 0);
}

#[test]
fn qp_set_rotates_between_calls() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);

    let first = planner.emit_call(&mut c, &all_reduce(4096), &mut fx.resources(0));
    let second = planner.emit_call(&mut c, &all_reduce(4096), &mut fx.resources(12));
    let out_qpn = |legs: &[LegDescriptor]| {
        legs.iter()
            .find(|leg| leg.fabric == Fabric::ScaleOut)
            .map(|leg| (leg.qp_set, leg.qpn))
            .expect("scale-out leg")
    };
    let (set_a, qpn_a) = out_qpn(first.legs.as_slice());
    let (set_b, qpn_b) = out_qpn(second.legs.as_slice());
    assert_eq!((set_a, set_b), (0, 1));
    assert_eq!(qpn_a, fx.scale_out.qpn(c.id(), 4, 0, QpRole::RsSend));
    assert_eq!(qpn_b, fx.scale_out.qpn(c.id(), 4, 1, QpRole::RsSend));
    assert_ne!(qpn_a, qpn_b);
}

#[test]
fn staged_legs_claim_consecutive_slots() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);
    let rs_base = fx.pools.base_addr(PoolId::ReduceScaleUp);
    let slot = fx.pools.slot_bytes(PoolId::ReduceScaleUp);

    let plan = planner.emit_call(&mut c, &all_reduce(4096), &mut fx.resources(0));
    let staged: Vec<u64> = plan
        .legs
        .iter()
        .filter(|leg| leg.pool == Some(PoolId::ReduceScaleUp))
        .map(|leg| leg.staging_slot.expect("staged"))
        .collect();
    assert_eq!(staged, [rs_base, rs_base + slot, rs_base + 2 * slot, rs_base + 3 * slot]);
    assert_eq!(fx.pools.current_index(PoolId::ReduceScaleUp), 4);
    assert_eq!(fx.pools.current_index(PoolId::ScaleOut), 2);

    for leg in &plan.legs {
        assert_eq!(leg.staging_slot.is_some(), leg.pool.is_some());
        if leg.fabric == Fabric::ScaleUp {
            if let Some(staging) = leg.staging_slot {
                assert_eq!(leg.address, staging);
            }
        }
    }
    // The slot after each claim waits for the claiming leg.
    let first = &plan.legs[0];
    assert_eq!(fx.pools.target_of(PoolId::ReduceScaleUp, 1), first.completion_target);
}

#[test]
fn emitted_qps_resolve_back_to_their_roles() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);

    let plan = planner.emit_call(&mut c, &all_reduce(4096), &mut fx.resources(0));
    for leg in &plan.legs {
        assert!(leg.qpn.is_valid(), "leg {} has no QP", leg.seq);
        let expected = QpRole::for_op(leg.current_op, leg.direction);
        match leg.fabric {
            Fabric::ScaleUp => {
                assert_eq!(fx.scale_up.role_of(c.id(), 0, leg.qpn, 0), expected);
                assert_eq!(leg.remote_rank, None);
            }
            Fabric::ScaleOut => {
                assert_eq!(fx.scale_out.role_of(c.id(), 4, leg.qpn, 0), expected);
                assert_eq!(leg.remote_rank, Some(4));
                assert!(leg.disregard_rank);
            }
        }
    }
}

#[test]
fn single_rank_boxes_emit_scale_out_only() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(4, 0, 1);
    let mut fx = Fixture::new(&cfg, &c);
    let p = CollectiveParams::new(CollectiveOp::AllGather, DataType::Float32, 64)
        .with_buffers(0x1000, 0x8000_0000);

    let plan = planner.emit_call(&mut c, &p, &mut fx.resources(0));
    assert_eq!(plan.legs.len(), 6);
    assert!(plan.legs.iter().all(|leg| leg.fabric == Fabric::ScaleOut));
    for peer in 1..4 {
        assert_eq!(c.send_ctr(peer), 1);
        assert_eq!(c.recv_ctr(peer), 1);
    }
}

#[test]
#[should_panic(expected = "invariant violation")]
fn emit_call_rejects_send_recv() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(8, 0, 8);
    let mut fx = Fixture::new(&cfg, &c);
    let p = CollectiveParams::new(CollectiveOp::NoCollective, DataType::Float32, 16);
    planner.emit_call(&mut c, &p, &mut fx.resources(0));
}

fn request(direction: Direction, remote_rank: u32, slice_iter: u32) -> SendRecvRequest {
    SendRecvRequest {
        direction,
        remote_rank,
        data_type: DataType::Float32,
        address: 0x2000,
        count: 256,
        slice_iter,
    }
}

#[test]
fn send_recv_group_picks_fabric_per_peer() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let mut c = comm(8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);
    let requests = [request(Direction::Send, 5, 1), request(Direction::Recv, 2, 0)];

    let legs = planner.emit_send_recv(&mut c, &requests, &mut fx.resources(0));
    assert_eq!(legs.len(), 2);

    let out = &legs[0];
    assert_eq!(out.fabric, Fabric::ScaleOut);
    assert_eq!(out.qp_set, 1);
    assert_eq!(out.qpn, fx.scale_out.qpn(c.id(), 5, 1, QpRole::RsSend));
    assert_eq!(out.pool, None);

    let up = &legs[1];
    assert_eq!(up.fabric, Fabric::ScaleUp);
    assert_eq!(up.remote_rank, Some(2));
    assert_eq!(up.qpn, fx.scale_up.qpn(c.id(), 2, 0, QpRole::RsRecv));
    assert!(legs.iter().all(|leg| leg.disregard_rank));

    assert_eq!(c.send_ctr(5), 1);
    assert_eq!(c.recv_ctr(2), 1);
    assert_eq!(c.collective_ctr(), 0);
}

#[test]
fn host_nic_stages_scale_out_sends() {
    let cfg = PlannerConfig {
        host_nic: true,
        ..PlannerConfig::default()
    };
    let planner = Planner::new(cfg.clone());
    let mut c = comm_with(&cfg, 8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);
    let base = fx.pools.base_addr(PoolId::ScaleOut);

    let legs = planner.emit_send_recv(
        &mut c,
        &[request(Direction::Send, 4, 0), request(Direction::Send, 1, 1)],
        &mut fx.resources(0),
    );
    assert_eq!(legs[0].pool, Some(PoolId::ScaleOut));
    assert_eq!(legs[0].staging_slot, Some(base));
    assert_eq!(legs[1].staging_slot, None);
    assert_eq!(fx.pools.current_index(PoolId::ScaleOut), 1);
}

#[test]
fn host_nic_all_to_all_moves_the_whole_box_share() {
    let cfg = PlannerConfig {
        host_nic: true,
        ..PlannerConfig::default()
    };
    let planner = Planner::new(cfg.clone());
    let mut c = comm_with(&cfg, 8, 0, 4);
    let mut fx = Fixture::new(&cfg, &c);
    let per_rank = 60_000;
    let p = CollectiveParams::new(CollectiveOp::AllToAll, DataType::Float32, 8 * per_rank)
        .with_buffers(0x1000, 0x8000_0000);

    let plan = planner.emit_call(&mut c, &p, &mut fx.resources(0));
    let ctx = &plan.context;
    assert!(!ctx.flags().is_slicing);
    assert_eq!(ctx.optimal_count(), 65_536);
    assert_eq!(ctx.all2all_iterations(), 4);

    let sends: Vec<&LegDescriptor> = plan
        .legs
        .iter()
        .filter(|leg| leg.fabric == Fabric::ScaleOut && leg.direction == Direction::Send)
        .collect();
    let cells: Vec<u64> = sends.iter().map(|leg| leg.cell_count).collect();
    assert_eq!(cells, [65_536, 65_536, 65_536, 43_392]);
    assert_eq!(cells.iter().sum::<u64>(), 4 * per_rank);
    let iters: Vec<u32> = sends.iter().map(|leg| leg.all2all_iter).collect();
    assert_eq!(iters, [0, 1, 2, 3]);
    // Only the first round takes the long-term resource.
    let ordered: Vec<bool> = sends.iter().map(|leg| leg.longterm_ordering).collect();
    assert_eq!(ordered, [true, false, false, false]);

    let recv_cells: u64 = plan
        .legs
        .iter()
        .filter(|leg| leg.fabric == Fabric::ScaleOut && leg.direction == Direction::Recv)
        .map(|leg| leg.cell_count)
        .sum();
    assert_eq!(recv_cells, 4 * per_rank);

    // Scale-up legs are not repeated per round.
    let scale_up = plan.legs.iter().filter(|leg| leg.fabric == Fabric::ScaleUp).count();
    assert_eq!(scale_up, 4);
    assert_eq!(c.send_ctr(4), 4);
    assert_eq!(c.recv_ctr(4), 4);
}

#[test]
fn all_to_all_rounds_advance_through_the_user_buffer() {
    let cfg = PlannerConfig::default();
    let planner = Planner::new(cfg.clone());
    let c = comm(8, 0, 4);
    let per_rank = 100_000;
    let p = CollectiveParams::new(CollectiveOp::AllToAll, DataType::Float32, 8 * per_rank)
        .with_buffers(0x1000, 0x8000_0000);
    let ctx = planner.plan(&p, &c);
    assert!(ctx.flags().is_slicing);
    assert_eq!(ctx.all2all_iterations(), 4);

    let stride = ctx.counts(0).rank_scale_up;
    let offsets: Vec<u64> = (0..4)
        .map(|round| {
            let leg = planner.specialize(&ctx, CollectiveOp::AllToAll, 1, 0, round, Direction::Send);
            leg.scale_out.expect("all-to-all crosses boxes").iter_offset
        })
        .collect();
    assert_eq!(offsets, [0, stride * 4, stride * 8, stride * 12]);
}
