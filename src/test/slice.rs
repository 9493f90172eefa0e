use super::{comm, comm_with};
use crate::cc::{
    CollectiveOp, CollectiveParams, DataType, Direction, Planner, SendRecvRequest, specialize_p2p,
};
use crate::config::PlannerConfig;
use crate::pool::PoolId;

fn all_reduce(dtype: DataType, count: u64) -> CollectiveParams {
    CollectiveParams::new(CollectiveOp::AllReduce, dtype, count).with_buffers(0x1000, 0x8000_0000)
}

#[test]
fn box_hops_walk_forward_for_send_and_backward_for_recv() {
    let planner = Planner::new(PlannerConfig::default());
    let c = comm(16, 5, 4);
    let ctx = planner.plan(&all_reduce(DataType::Float32, 1 << 20), &c);
    assert_eq!(ctx.my_box(), 1);

    let send = planner.specialize(&ctx, CollectiveOp::ReduceScatter, 1, 0, 0, Direction::Send);
    let recv = planner.specialize(&ctx, CollectiveOp::ReduceScatter, 1, 0, 0, Direction::Recv);
    assert_eq!(send.box_num, 2);
    assert_eq!(recv.box_num, 0);

    let out = send.scale_out.expect("reduce-scatter crosses boxes");
    assert_eq!(out.remote_box, 2);
    assert_eq!(out.remote_rank, 9);
    assert_eq!(out.qp_set, ctx.qp_set(0));
    assert_eq!(out.pool, Some(PoolId::ScaleOut));
    assert!(!send.hierarchical_first);

    let own = planner.specialize(&ctx, CollectiveOp::ReduceScatter, 0, 0, 0, Direction::Send);
    assert!(own.scale_out.is_none());
    assert!(own.hierarchical_first);
    assert!(own.longterm_ordering);
    assert_eq!(own.scale_up.pool, Some(PoolId::ReduceScaleUp));
}

#[test]
fn reductions_start_past_the_reduction_buffers() {
    let cfg = PlannerConfig {
        scaleout_reduction_buffers: 2,
        ..PlannerConfig::default()
    };
    let planner = Planner::new(cfg.clone());
    let c = comm_with(&cfg, 16, 0, 4);
    let ctx = planner.plan(&all_reduce(DataType::Float32, 1 << 20), &c);
    let reducing: Vec<bool> = (1..4)
        .map(|hop| {
            let leg = planner.specialize(&ctx, CollectiveOp::ReduceScatter, hop, 0, 0, Direction::Send);
            leg.scale_out.expect("scale-out leg").do_reduction
        })
        .collect();
    assert_eq!(reducing, [false, true, true]);
    let recv = planner.specialize(&ctx, CollectiveOp::ReduceScatter, 1, 0, 0, Direction::Recv);
    assert!(!recv.scale_out.expect("scale-out leg").do_reduction);
}

#[test]
fn sixteen_bit_reduction_receives_widen() {
    let planner = Planner::new(PlannerConfig::default());
    let c = comm(8, 0, 8);
    let ctx = planner.plan(&all_reduce(DataType::Bfloat16, 1 << 16), &c);
    let rs_recv = planner.specialize(&ctx, CollectiveOp::ReduceScatter, 0, 0, 0, Direction::Recv);
    let rs_send = planner.specialize(&ctx, CollectiveOp::ReduceScatter, 0, 0, 0, Direction::Send);
    let ag_recv = planner.specialize(&ctx, CollectiveOp::AllGather, 0, 0, 0, Direction::Recv);
    assert_eq!(rs_recv.data_type, DataType::Float32);
    assert_eq!(rs_send.data_type, DataType::Bfloat16);
    assert_eq!(ag_recv.data_type, DataType::Bfloat16);
}

#[test]
fn all_gather_waits_for_reduce_scatter() {
    let planner = Planner::new(PlannerConfig::default());
    let c = comm(16, 0, 4);
    let ctx = planner.plan(&all_reduce(DataType::Float32, 1 << 20), &c);
    let own = planner.specialize(&ctx, CollectiveOp::AllGather, 0, 0, 0, Direction::Send);
    assert!(own.scale_up.wait_for_reduce_scatter);
    // Box 1 is the next box, whose previous box is mine.
    let next = planner.specialize(&ctx, CollectiveOp::AllGather, 1, 0, 0, Direction::Send);
    assert!(!next.scale_up.wait_for_reduce_scatter);
    assert!(next.scale_out.expect("scale-out").wait_for_reduce_scatter);
}

#[test]
fn broadcast_scatter_only_feeds_the_next_box() {
    let planner = Planner::new(PlannerConfig::default());
    let p = CollectiveParams::new(CollectiveOp::Broadcast, DataType::Float32, 1 << 20)
        .with_buffers(0x1000, 0x1000)
        .with_root(0);
    let c = comm(16, 1, 4);
    let ctx = planner.plan(&p, &c);
    assert_eq!(ctx.op(), CollectiveOp::Broadcast);
    assert!(ctx.flags().is_root_box);

    let to_next = planner.specialize(&ctx, CollectiveOp::Scatter, 1, 0, 0, Direction::Send);
    assert!(to_next.scale_out.is_some());
    let further = planner.specialize(&ctx, CollectiveOp::Scatter, 2, 0, 0, Direction::Send);
    assert!(further.scale_out.is_none());
    // The root box never receives the scatter.
    let recv = planner.specialize(&ctx, CollectiveOp::Scatter, 1, 0, 0, Direction::Recv);
    assert!(recv.scale_out.is_none());
    // Broadcast all-gather stays inside the box.
    let ag = planner.specialize(&ctx, CollectiveOp::AllGather, 1, 0, 0, Direction::Send);
    assert!(ag.scale_out.is_none());
}

#[test]
#[should_panic(expected = "invariant violation")]
fn foreign_sub_operation_is_fatal() {
    let planner = Planner::new(PlannerConfig::default());
    let ctx = planner.plan(&all_reduce(DataType::Float32, 1024), &comm(8, 0, 8));
    planner.specialize(&ctx, CollectiveOp::Gather, 0, 0, 0, Direction::Send);
}

#[test]
fn point_to_point_rotates_sets_by_position() {
    let cfg = PlannerConfig::default();
    let c = comm(16, 0, 8);
    let req = SendRecvRequest {
        direction: Direction::Send,
        remote_rank: 9,
        data_type: DataType::Int32,
        address: 0x4000,
        count: 128,
        slice_iter: 5,
    };
    let leg = specialize_p2p(&c, &cfg, &req);
    assert!(leg.scale_out);
    assert_eq!(leg.remote_box, 1);
    assert_eq!(leg.qp_set, 5 % c.max_qp_sets());
    assert_eq!(leg.size_bytes(), 512);
    assert_eq!(leg.pool, None);

    let local = specialize_p2p(&c, &cfg, &SendRecvRequest { remote_rank: 3, ..req });
    assert!(!local.scale_out);
}
