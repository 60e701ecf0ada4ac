// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Machines and the facts discovered about them

use crate::LocalLinkConnection;
use crate::MacAddr;
use parse_display::Display;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use ucs_common::api::Error;
use ucs_common::typed_uuid::MachineUuid;

/// Key holding the number of physical uplinks.
pub const DRIVER_INFO_UPLINKS: &str = "uplinks";
/// Key holding the link aggregation flag.
pub const DRIVER_INFO_VPC: &str = "vPC";

/// Key holding the MAC of uplink `n`.
pub fn uplink_mac_key(n: u32) -> String {
    format!("uplink{}-mac", n)
}

/// Key holding the switch connection of uplink `n`.
pub fn uplink_local_link_key(n: u32) -> String {
    format!("uplink{}-local-link", n)
}

#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
}

/// Provisioning state of a machine
///
/// Only the states this workspace reads or writes are listed.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProvisionState {
    Available,
    Manageable,
    Inspecting,
    InspectFail,
    Deploying,
    DeployWait,
    Active,
    Cleaning,
    CleanWait,
    Error,
}

/// A bare-metal machine
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Machine {
    pub id: MachineUuid,
    pub power_state: PowerState,
    pub provision_state: ProvisionState,
    /// Persistent facts about the machine (uplinks, their MACs and switch
    /// connections, vendor flags).
    pub driver_info: Map<String, Value>,
}

impl Machine {
    pub fn new(id: MachineUuid, provision_state: ProvisionState) -> Machine {
        Machine {
            id,
            power_state: PowerState::Off,
            provision_state,
            driver_info: Map::new(),
        }
    }

    /// Record the physical uplinks found on the hardware.
    pub fn set_uplinks(&mut self, macs: &[MacAddr]) {
        self.driver_info
            .insert(DRIVER_INFO_UPLINKS.to_string(), Value::from(macs.len()));
        for (n, mac) in (0u32..).zip(macs) {
            self.driver_info
                .insert(uplink_mac_key(n), Value::String(mac.to_string()));
        }
    }

    /// Record the switch port uplink `n` is cabled to.
    pub fn set_uplink_local_link(
        &mut self,
        n: u32,
        link: &LocalLinkConnection,
    ) -> Result<(), Error> {
        let value = serde_json::to_value(link)?;
        self.driver_info.insert(uplink_local_link_key(n), value);
        Ok(())
    }

    pub fn set_vpc(&mut self, enabled: bool) {
        self.driver_info
            .insert(DRIVER_INFO_VPC.to_string(), Value::Bool(enabled));
    }
}

/// Validated view of [`Machine::driver_info`]
#[derive(Clone, Debug, PartialEq)]
pub struct DriverInfo {
    pub machine_id: MachineUuid,
    pub uplinks: NonZeroU32,
    /// MAC of each uplink, indexed by uplink number
    pub uplink_macs: Vec<MacAddr>,
    /// Switch connection of each uplink that has been inspected
    pub local_links: BTreeMap<u32, LocalLinkConnection>,
    /// Link aggregation is enabled
    pub vpc: bool,
}

impl DriverInfo {
    /// Returns the switch connection of uplink `n`.
    pub fn local_link(&self, n: u32) -> Result<&LocalLinkConnection, Error> {
        self.local_links.get(&n).ok_or_else(|| Error::MissingConfig {
            machine: self.machine_id,
            params: vec![uplink_local_link_key(n)],
        })
    }

    pub fn uplink_mac(&self, n: u32) -> Result<MacAddr, Error> {
        self.uplink_macs.get(n as usize).copied().ok_or_else(|| {
            Error::MissingConfig {
                machine: self.machine_id,
                params: vec![uplink_mac_key(n)],
            }
        })
    }
}

/// Validate the facts every vNIC operation depends on.
///
/// Fails with [`Error::MissingConfig`] listing every absent or unreadable
/// key.  Switch connections are optional here and checked when a binding
/// needs them.
pub fn parse_driver_info(machine: &Machine) -> Result<DriverInfo, Error> {
    let info = &machine.driver_info;
    let mut missing = Vec::new();

    let uplinks = info
        .get(DRIVER_INFO_UPLINKS)
        .and_then(value_as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .and_then(NonZeroU32::new);
    let Some(uplinks) = uplinks else {
        return Err(Error::MissingConfig {
            machine: machine.id,
            params: vec![DRIVER_INFO_UPLINKS.to_string()],
        });
    };

    let mut uplink_macs = Vec::with_capacity(uplinks.get() as usize);
    let mut local_links = BTreeMap::new();
    for n in 0..uplinks.get() {
        let key = uplink_mac_key(n);
        match info
            .get(&key)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<MacAddr>().ok())
        {
            Some(mac) => uplink_macs.push(mac),
            None => missing.push(key),
        }

        if let Some(link) = info
            .get(&uplink_local_link_key(n))
            .and_then(|v| LocalLinkConnection::from_value(v).ok())
        {
            local_links.insert(n, link);
        }
    }

    if !missing.is_empty() {
        return Err(Error::MissingConfig { machine: machine.id, params: missing });
    }

    let vpc = info.get(DRIVER_INFO_VPC).map(value_as_bool).unwrap_or(false);

    Ok(DriverInfo {
        machine_id: machine.id,
        uplinks,
        uplink_macs,
        local_links,
        vpc,
    })
}

// Facts are often written by operators as strings.
fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
