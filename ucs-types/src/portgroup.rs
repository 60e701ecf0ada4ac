// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::port::Bag;
use crate::port::RecordError;
use crate::port::EXTRA_MODE;
use crate::port::EXTRA_VIF_PORT_ID;
use crate::MacAddr;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use ucs_common::typed_uuid::MachineUuid;
use ucs_common::typed_uuid::PortgroupUuid;

/// A portgroup as the topology store persists it
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PortgroupRecord {
    pub id: PortgroupUuid,
    pub machine_id: MachineUuid,
    pub address: MacAddr,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Bonding mode of a portgroup
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BondMode {
    /// Mode 0: an ordinary bond member set.
    Standard,
    /// Mode 4: the machine's first bond.  Members carry no access VLAN.
    Primary,
}

impl BondMode {
    pub fn as_u32(self) -> u32 {
        match self {
            BondMode::Standard => 0,
            BondMode::Primary => 4,
        }
    }
}

/// A bonded interface spanning every uplink of a machine
#[derive(Clone, Debug, PartialEq)]
pub struct Portgroup {
    pub id: PortgroupUuid,
    pub machine_id: MachineUuid,
    pub address: MacAddr,
    pub vif_port_id: Option<String>,
    pub mode: BondMode,
    other_extra: Map<String, Value>,
}

impl Portgroup {
    pub fn new(
        machine_id: MachineUuid,
        address: MacAddr,
        vif_port_id: String,
        mode: BondMode,
    ) -> Portgroup {
        Portgroup {
            id: PortgroupUuid::new_v4(),
            machine_id,
            address,
            vif_port_id: Some(vif_port_id),
            mode,
            other_extra: Map::new(),
        }
    }

    pub fn from_record(
        record: PortgroupRecord,
    ) -> Result<Portgroup, RecordError> {
        let PortgroupRecord { id, machine_id, address, mut extra } = record;
        let bag = Bag { id: *id.as_untyped_uuid(), extra: &extra };
        let vif_port_id = bag.opt_str(EXTRA_VIF_PORT_ID)?.map(str::to_string);
        let mode = match bag.opt_u32(EXTRA_MODE)? {
            None | Some(0) => BondMode::Standard,
            Some(4) => BondMode::Primary,
            Some(other) => {
                return Err(RecordError::UnknownMode {
                    id: *id.as_untyped_uuid(),
                    value: Value::from(other),
                })
            }
        };
        extra.remove(EXTRA_VIF_PORT_ID);
        extra.remove(EXTRA_MODE);
        Ok(Portgroup {
            id,
            machine_id,
            address,
            vif_port_id,
            mode,
            other_extra: extra,
        })
    }

    pub fn to_record(&self) -> PortgroupRecord {
        let mut extra = self.other_extra.clone();
        if let Some(vif) = &self.vif_port_id {
            extra.insert(EXTRA_VIF_PORT_ID.to_string(), Value::from(vif.clone()));
        }
        extra.insert(EXTRA_MODE.to_string(), Value::from(self.mode.as_u32()));
        PortgroupRecord {
            id: self.id,
            machine_id: self.machine_id,
            address: self.address,
            extra,
        }
    }
}

impl TryFrom<PortgroupRecord> for Portgroup {
    type Error = RecordError;

    fn try_from(record: PortgroupRecord) -> Result<Self, Self::Error> {
        Portgroup::from_record(record)
    }
}
