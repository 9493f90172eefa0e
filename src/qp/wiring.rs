//! NIC wiring snapshot supplied by the device layer.

use serde::{Deserialize, Serialize};

use super::{Fabric, Qpn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicInfo {
    pub index: u32,
    pub fabric: Fabric,
    /// Added to a registered base QP number to address this NIC.
    pub qp_offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicWiring {
    nics: Vec<NicInfo>,
    active_mask: u64,
}

impl NicWiring {
    pub fn new(nics: Vec<NicInfo>, active_mask: u64) -> Self {
        Self { nics, active_mask }
    }

    pub fn is_active(&self, nic: u32) -> bool {
        nic < 64 && self.active_mask & (1u64 << nic) != 0
    }

    /// Active NICs serving `fabric`.
    pub fn active(&self, fabric: Fabric) -> impl Iterator<Item = &NicInfo> + '_ {
        self.nics
            .iter()
            .filter(move |nic| nic.fabric == fabric && self.is_active(nic.index))
    }

    pub fn nic(&self, index: u32) -> Option<&NicInfo> {
        self.nics.iter().find(|nic| nic.index == index)
    }
}

/// Driver-level QP teardown.
pub trait QpTransport {
    fn destroy_qp(&mut self, nic: u32, qpn: Qpn);
}
