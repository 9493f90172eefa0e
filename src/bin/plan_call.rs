use clap::Parser;
use collplan::cc::{
    CallResources, CollectiveOp, CollectiveParams, DataType, FlatAddressGenerator, Planner,
};
use collplan::comm::{Communicator, Inclusion};
use collplan::config::PlannerConfig;
use collplan::pool::DeviceBufferPool;
use collplan::qp::{QP_ROLES, QpManager, Qpn, ScaleOutQpManager, ScaleUpQpManager};
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Debug, Parser)]
#[command(
    name = "plan-call",
    about = "Plan one collective call on one rank and print its legs"
)]
struct Args {
    /// Number of ranks in the communicator
    #[arg(long, default_value_t = 8)]
    comm_size: u32,

    /// Ranks per box
    #[arg(long, default_value_t = 8)]
    box_size: u32,

    /// Local rank
    #[arg(long, default_value_t = 0)]
    rank: u32,

    /// Collective: all_reduce, reduce_scatter, all_gather, broadcast, all2all, reduce, ...
    #[arg(long, default_value = "all_reduce")]
    op: String,

    /// Element count
    #[arg(long, default_value_t = 1024)]
    count: u64,

    /// Element type: f32, bf16, f16, i32, ...
    #[arg(long, default_value = "f32")]
    dtype: String,

    /// Root rank for rooted collectives
    #[arg(long)]
    root: Option<u32>,

    #[arg(long, default_value_t = 0x7000_0000_0000)]
    send_addr: u64,

    #[arg(long, default_value_t = 0x7800_0000_0000)]
    recv_addr: u64,

    /// Planner configuration JSON; missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the full plan as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Only print the plan summary line
    #[arg(long)]
    quiet: bool,
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("error: {msg}");
    process::exit(2);
}

/// Deterministic QP numbers so every leg resolves to a registered QP.
fn register_connections(
    comm: &Communicator,
    cfg: &PlannerConfig,
    scale_up: &mut ScaleUpQpManager,
    scale_out: &mut ScaleOutQpManager,
) {
    let up: Vec<Qpn> = (0..QP_ROLES as u32).map(|i| Qpn(0x10 + i)).collect();
    scale_up
        .register_qps(comm, comm.my_rank(), &up)
        .unwrap_or_else(|e| fail(e));
    let per_rank = QP_ROLES as u32 * cfg.caps.max_qp_sets;
    for remote in comm.outer_ranks(Inclusion::Exclusive) {
        let base = 0x1000 + remote * per_rank;
        let qps: Vec<Qpn> = (0..per_rank).map(|i| Qpn(base + i)).collect();
        scale_out
            .register_qps(comm, remote, &qps)
            .unwrap_or_else(|e| fail(e));
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => PlannerConfig::load(path).unwrap_or_else(|e| fail(e)),
        None => PlannerConfig::default(),
    };
    let op = CollectiveOp::parse(&args.op).unwrap_or_else(|e| fail(e));
    if op == CollectiveOp::NoCollective {
        fail("send/recv is not a collective call");
    }
    let data_type = DataType::parse(&args.dtype).unwrap_or_else(|e| fail(e));

    let mut comm = Communicator::initialize(0, args.comm_size, args.rank, args.box_size, &cfg)
        .unwrap_or_else(|e| fail(e));
    let mut pools = DeviceBufferPool::new(&cfg.pools).unwrap_or_else(|e| fail(e));
    let mut scale_up = ScaleUpQpManager::new();
    let mut scale_out = ScaleOutQpManager::new(cfg.caps.max_qp_sets);
    register_connections(&comm, &cfg, &mut scale_up, &mut scale_out);

    let mut params =
        CollectiveParams::new(op, data_type, args.count).with_buffers(args.send_addr, args.recv_addr);
    if let Some(root) = args.root {
        params = params.with_root(root);
    }

    let planner = Planner::new(cfg);
    let addresses = FlatAddressGenerator;
    let mut res = CallResources {
        pools: &mut pools,
        scale_up: &scale_up,
        scale_out: &scale_out,
        addresses: &addresses,
        completion_base: 0,
    };
    let plan = planner.emit_call(&mut comm, &params, &mut res);
    let ctx = &plan.context;

    println!(
        "plan op={:?} resolved={:?} rank={} box={} boxes={} slices={} optimal_count={} in_place={} legs={}",
        ctx.requested_op(),
        ctx.op(),
        ctx.my_rank(),
        ctx.my_box(),
        ctx.box_iterations(),
        ctx.slice_iterations(),
        ctx.optimal_count(),
        ctx.flags().in_place,
        plan.legs.len()
    );
    if !args.quiet {
        for leg in &plan.legs {
            println!(
                "leg seq={} fabric={:?} current_op={:?} dir={:?} slice={} hop={} box={} remote={:?} addr={:#x} cell={} stride={} qpn={} set={} pool={:?}",
                leg.seq,
                leg.fabric,
                leg.current_op,
                leg.direction,
                leg.slice_iter,
                leg.box_hop,
                leg.box_num,
                leg.remote_rank,
                leg.address,
                leg.cell_count,
                leg.stride_count,
                leg.qpn.0,
                leg.qp_set,
                leg.pool
            );
        }
    }

    if let Some(path) = args.json {
        let json = serde_json::to_string_pretty(&plan).expect("serialize plan");
        fs::write(&path, json).expect("write plan json");
        eprintln!("wrote plan to {}", path.display());
    }
}
