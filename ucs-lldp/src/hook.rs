// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::patcher::PatchOp;
use crate::patcher::PortPatcher;
use crate::tlv::decode_tlvs;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use ucs_common::api::Error;
use ucs_types::MacAddr;

/// Hardware inventory reported by the inspection ramdisk
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Inventory {
    /// Interface name to the `(type, hex value)` TLVs received on it
    #[serde(default)]
    pub lldp_info: BTreeMap<String, Vec<(u8, String)>>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InterfaceInfo {
    pub mac: MacAddr,
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

/// The part of the inspection payload this hook reads
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct InspectionData {
    #[serde(default)]
    pub inventory: Inventory,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceInfo>,
}

/// Populates each port's `local_link_connection` from LLDP
pub struct LldpHook {
    log: Logger,
    patcher: Arc<dyn PortPatcher>,
}

impl LldpHook {
    pub fn new(log: &Logger, patcher: Arc<dyn PortPatcher>) -> Self {
        LldpHook { log: log.new(o!("component" => "LldpHook")), patcher }
    }

    /// Patch every port whose interface reported the switch port it is
    /// cabled to.
    ///
    /// The port's `switch_id` is the interface's own MAC.  Interfaces
    /// without TLVs, without inventory or without a port id are skipped.
    /// Returns the number of ports patched.
    pub async fn before_update(
        &self,
        data: &InspectionData,
    ) -> Result<usize, Error> {
        let lldp_info = &data.inventory.lldp_info;
        debug!(self.log, "received LLDP TLVs"; "interfaces" => lldp_info.len());

        let mut patched = 0;
        for (ifname, tlvs) in lldp_info {
            let log = self.log.new(o!("interface" => ifname.clone()));
            let Some(interface) = data.interfaces.get(ifname) else {
                debug!(log, "no inventory for interface");
                continue;
            };
            if tlvs.is_empty() {
                continue;
            }

            let info = match decode_tlvs(tlvs) {
                Ok(info) => info,
                Err(e) => {
                    warn!(log, "failed to decode LLDP TLVs"; "error" => %e);
                    continue;
                }
            };
            let Some(port_id) = info.port_id else {
                info!(log, "required field port_id is not present");
                continue;
            };

            let switch_info = Value::Object(info.switch_info).to_string();
            let patches = vec![
                PatchOp::add_local_link(
                    "switch_id",
                    Value::from(interface.mac.to_string()),
                ),
                PatchOp::add_local_link("port_id", Value::from(port_id)),
                PatchOp::add_local_link("switch_info", Value::from(switch_info)),
            ];
            self.patcher.patch_port(interface.mac, &patches).await?;
            patched += 1;
        }
        Ok(patched)
    }
}
