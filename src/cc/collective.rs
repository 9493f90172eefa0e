//! Collective call vocabulary: operation kinds, element types, reduction
//! operators and the captured call parameters.

use serde::{Deserialize, Serialize};

use crate::comm::Rank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveOp {
    AllReduce,
    ReduceScatter,
    AllGather,
    Gather,
    Scatter,
    Broadcast,
    SimpleBroadcast,
    SinglePeerBroadcast,
    AllToAll,
    Reduce,
    /// Direct send/recv; never decomposed.
    NoCollective,
}

impl CollectiveOp {
    pub const COUNT: usize = 11;
    pub const ALL: [CollectiveOp; Self::COUNT] = [
        CollectiveOp::AllReduce,
        CollectiveOp::ReduceScatter,
        CollectiveOp::AllGather,
        CollectiveOp::Gather,
        CollectiveOp::Scatter,
        CollectiveOp::Broadcast,
        CollectiveOp::SimpleBroadcast,
        CollectiveOp::SinglePeerBroadcast,
        CollectiveOp::AllToAll,
        CollectiveOp::Reduce,
        CollectiveOp::NoCollective,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(Self::AllReduce);
        }
        let compact: String = normalized
            .chars()
            .filter(|ch| *ch != '_' && *ch != '-')
            .collect();
        let compact = compact.as_str();
        let compact = compact.strip_suffix("async").unwrap_or(compact);
        match compact {
            "allreduce" => Ok(Self::AllReduce),
            "reducescatter" => Ok(Self::ReduceScatter),
            "allgather" => Ok(Self::AllGather),
            "gather" => Ok(Self::Gather),
            "scatter" => Ok(Self::Scatter),
            "broadcast" | "bcast" => Ok(Self::Broadcast),
            "simplebroadcast" => Ok(Self::SimpleBroadcast),
            "singlepeerbroadcast" => Ok(Self::SinglePeerBroadcast),
            "alltoall" | "all2all" => Ok(Self::AllToAll),
            "reduce" => Ok(Self::Reduce),
            "sendrecv" | "send" | "recv" | "p2p" | "nocollective" => Ok(Self::NoCollective),
            _ => Err(format!("unknown collective op: {raw}")),
        }
    }

    pub fn is_broadcast_family(self) -> bool {
        matches!(
            self,
            Self::Broadcast | Self::SinglePeerBroadcast | Self::SimpleBroadcast
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Send, Direction::Recv];

    pub fn is_send(self) -> bool {
        self == Direction::Send
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int8,
    Uint8,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float16,
    Bfloat16,
    Float32,
    Float64,
}

impl DataType {
    pub fn size_bytes(self) -> u64 {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Float16 | Self::Bfloat16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    /// 16-bit float types accumulate through a 32-bit intermediate.
    pub fn is_16bit_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Bfloat16)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "i8" | "int8" => Ok(Self::Int8),
            "u8" | "uint8" => Ok(Self::Uint8),
            "i32" | "int32" => Ok(Self::Int32),
            "u32" | "uint32" => Ok(Self::Uint32),
            "i64" | "int64" => Ok(Self::Int64),
            "u64" | "uint64" => Ok(Self::Uint64),
            "f16" | "fp16" | "float16" => Ok(Self::Float16),
            "bf16" | "bfloat16" => Ok(Self::Bfloat16),
            "f32" | "fp32" | "float32" | "float" => Ok(Self::Float32),
            "f64" | "fp64" | "float64" | "double" => Ok(Self::Float64),
            _ => Err(format!("unknown data type: {raw}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Prod,
    Max,
    Min,
    Avg,
    None,
}

/// Parameters of one collective call, captured once and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectiveParams {
    pub op: CollectiveOp,
    pub data_type: DataType,
    /// Element count. For AllGather and ReduceScatter this is the send count.
    pub count: u64,
    pub send_addr: u64,
    pub recv_addr: u64,
    pub root: Option<Rank>,
    pub reduce_op: ReduceOp,
}

impl CollectiveParams {
    pub fn new(op: CollectiveOp, data_type: DataType, count: u64) -> Self {
        Self {
            op,
            data_type,
            count,
            send_addr: 0,
            recv_addr: 0,
            root: None,
            reduce_op: ReduceOp::None,
        }
    }

    pub fn with_buffers(mut self, send_addr: u64, recv_addr: u64) -> Self {
        self.send_addr = send_addr;
        self.recv_addr = recv_addr;
        self
    }

    pub fn with_root(mut self, root: Rank) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_reduce_op(mut self, reduce_op: ReduceOp) -> Self {
        self.reduce_op = reduce_op;
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.count * self.data_type.size_bytes()
    }
}
