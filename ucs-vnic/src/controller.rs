// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creation and removal of individual vNICs

use crate::hardware::HardwareError;
use crate::hardware::HardwareHandle;
use crate::hardware::HardwareSession;
use crate::hardware::Uplink;
use crate::hardware::VnicConfig;
use crate::hardware::DEFAULT_MTU;
use crate::uplink::next_uplink;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use ucs_common::api::Error;
use ucs_common::api::LookupType;
use ucs_common::api::ResourceType;
use ucs_common::typed_uuid::MachineUuid;
use ucs_types::DriverInfo;
use ucs_types::MacAddr;
use ucs_types::VnicRef;

/// Parameters for [`VnicController::add_vnic`]
#[derive(Clone, Debug)]
pub struct AddVnic<'a> {
    pub vnic: &'a VnicRef,
    /// `None` lets the hardware pick an address.
    pub mac: Option<MacAddr>,
    pub vlan: Option<u32>,
    pub pxe: bool,
    /// Pin to this uplink instead of the round-robin choice.
    pub uplink: Option<u32>,
}

/// Issues vNIC configuration to a machine's management controller
///
/// Holds no state of its own.  A session is opened per call and released
/// when the call returns.
pub struct VnicController {
    log: Logger,
    hardware: Arc<dyn HardwareSession>,
}

impl VnicController {
    pub fn new(log: &Logger, hardware: Arc<dyn HardwareSession>) -> Self {
        VnicController {
            log: log.new(o!("component" => "VnicController")),
            hardware,
        }
    }

    pub async fn open(
        &self,
        machine: MachineUuid,
    ) -> Result<Box<dyn HardwareHandle>, Error> {
        self.hardware
            .open(machine)
            .await
            .map_err(|e| hardware_error(machine, e))
    }

    /// Create or reconfigure a vNIC, returning its address.
    pub async fn add_vnic(
        &self,
        info: &DriverInfo,
        request: AddVnic<'_>,
    ) -> Result<MacAddr, Error> {
        let mut handle = self.open(info.machine_id).await?;
        self.add_vnic_with(handle.as_mut(), info, request).await
    }

    /// Like [`VnicController::add_vnic`], on an already open session.
    pub async fn add_vnic_with(
        &self,
        handle: &mut dyn HardwareHandle,
        info: &DriverInfo,
        request: AddVnic<'_>,
    ) -> Result<MacAddr, Error> {
        let machine = info.machine_id;
        let uplink = request.uplink.unwrap_or_else(|| match request.vnic {
            VnicRef::Slot(slot) => next_uplink(*slot, info.uplinks),
            VnicRef::Named(_) => 0,
        });
        let name = request.vnic.interface_name();
        let config = VnicConfig {
            dn: vnic_dn(handle.adapter_dn(), &name),
            name,
            mtu: DEFAULT_MTU,
            pxe_boot: request.pxe,
            mac: request.mac,
            uplink_port: uplink,
            vlan: request.vlan,
        };
        let log = self.log.new(o!(
            "machine_id" => machine.to_string(),
            "dn" => config.dn.clone(),
        ));
        debug!(log, "writing vNIC configuration";
            "uplink" => uplink,
            "vlan" => ?config.vlan,
            "pxe" => config.pxe_boot,
        );

        let outcome = handle
            .write_vnic_config(&config)
            .await
            .map_err(|e| hardware_error(machine, e))?;
        if let Some(code) = outcome.error_code.filter(|c| !c.is_empty() && c != "0")
        {
            warn!(log, "hardware rejected vNIC configuration"; "code" => &code);
            return Err(Error::HardwareConfig { machine, code });
        }

        let mac = match (request.mac, outcome.assigned_mac) {
            (Some(mac), _) => mac,
            (None, Some(assigned)) => assigned,
            (None, None) => {
                return Err(Error::internal_error(&format!(
                    "hardware did not report an address for {}",
                    config.dn
                )))
            }
        };
        info!(log, "added vNIC"; "mac" => %mac, "uplink" => uplink);
        Ok(mac)
    }

    /// Remove a vNIC.
    ///
    /// The built-in interfaces (one per uplink, slots below the uplink count)
    /// cannot be removed and are reset to their defaults instead.
    pub async fn delete_vnic(
        &self,
        info: &DriverInfo,
        vnic: &VnicRef,
    ) -> Result<(), Error> {
        let mut handle = self.open(info.machine_id).await?;
        self.delete_vnic_with(handle.as_mut(), info, vnic).await
    }

    pub async fn delete_vnic_with(
        &self,
        handle: &mut dyn HardwareHandle,
        info: &DriverInfo,
        vnic: &VnicRef,
    ) -> Result<(), Error> {
        let machine = info.machine_id;
        if let Some(slot) = vnic.slot().filter(|s| *s < info.uplinks.get()) {
            debug!(self.log, "resetting built-in vNIC";
                "machine_id" => %machine,
                "slot" => slot,
            );
            let request = AddVnic {
                vnic,
                mac: None,
                vlan: None,
                pxe: false,
                uplink: Some(slot),
            };
            self.add_vnic_with(handle, info, request).await?;
            return Ok(());
        }

        let dn = vnic_dn(handle.adapter_dn(), &vnic.interface_name());
        match handle.remove_vnic(&dn).await {
            Ok(()) => {
                info!(self.log, "removed vNIC";
                    "machine_id" => %machine,
                    "dn" => &dn,
                );
                Ok(())
            }
            Err(e) => Err(hardware_error(machine, e)),
        }
    }

    /// Returns the physical uplinks of the adapter, ordered by port.
    pub async fn uplinks_with(
        &self,
        handle: &mut dyn HardwareHandle,
        machine: MachineUuid,
    ) -> Result<Vec<Uplink>, Error> {
        let mut uplinks = handle
            .list_uplinks()
            .await
            .map_err(|e| hardware_error(machine, e))?;
        uplinks.sort_by_key(|u| u.port_id);
        Ok(uplinks)
    }

    /// Returns the address an existing vNIC currently carries.
    pub async fn vnic_mac_with(
        &self,
        handle: &mut dyn HardwareHandle,
        machine: MachineUuid,
        vnic: &VnicRef,
    ) -> Result<MacAddr, Error> {
        let dn = vnic_dn(handle.adapter_dn(), &vnic.interface_name());
        handle.vnic_mac(&dn).await.map_err(|e| hardware_error(machine, e))
    }
}

/// Distinguished name of interface `name` on adapter `adapter_dn`.
pub fn vnic_dn(adapter_dn: &str, name: &str) -> String {
    format!("{}/host-eth-{}", adapter_dn, name)
}

fn hardware_error(machine: MachineUuid, error: HardwareError) -> Error {
    match error {
        HardwareError::Call { code, .. } => {
            Error::HardwareConfig { machine, code }
        }
        HardwareError::NotFound { dn } => {
            LookupType::ByName(dn).into_not_found(ResourceType::Vnic)
        }
        e @ HardwareError::Session { .. } => Error::internal_error(&e.to_string()),
    }
}
