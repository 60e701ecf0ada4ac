// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the server's management controller

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use ucs_common::typed_uuid::MachineUuid;
use ucs_types::MacAddr;

pub const DEFAULT_MTU: u32 = 1500;

/// Configuration written for one host ethernet interface
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VnicConfig {
    /// `<adapter-dn>/host-eth-<name>`
    pub dn: String,
    pub name: String,
    pub mtu: u32,
    pub pxe_boot: bool,
    /// `None` asks the hardware to assign an address.
    pub mac: Option<MacAddr>,
    pub uplink_port: u32,
    /// Access VLAN.  `None` leaves the interface untagged.
    pub vlan: Option<u32>,
}

impl VnicConfig {
    /// Attributes of the interface object, as sent on the wire.
    pub fn attributes(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("name", self.name.clone()),
            ("mtu", self.mtu.to_string()),
            (
                "pxeBoot",
                if self.pxe_boot { "enabled" } else { "disabled" }.to_string(),
            ),
            ("Dn", self.dn.clone()),
            (
                "mac",
                self.mac.map_or_else(|| "AUTO".to_string(), |m| m.to_string()),
            ),
            ("uplinkPort", self.uplink_port.to_string()),
        ])
    }

    /// Attributes of the child VLAN profile.
    pub fn vlan_profile_attributes(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("vlanMode", "ACCESS".to_string()),
            (
                "vlan",
                self.vlan.map_or_else(|| "NONE".to_string(), |v| v.to_string()),
            ),
        ])
    }
}

/// What the hardware reported for a configuration write
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WriteOutcome {
    /// Non-empty when the hardware rejected the write.
    pub error_code: Option<String>,
    /// Address chosen by the hardware when none was requested.
    pub assigned_mac: Option<MacAddr>,
}

/// A physical uplink port on the network adapter
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Uplink {
    pub port_id: u32,
    pub mac: MacAddr,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HardwareError {
    #[error("failed to open management session for {machine}: {message}")]
    Session { machine: MachineUuid, message: String },
    #[error("{method} failed with error code {code}")]
    Call { method: &'static str, code: String },
    #[error("no object exists at {dn}")]
    NotFound { dn: String },
}

/// Opens management sessions to machines
#[async_trait]
pub trait HardwareSession: Send + Sync {
    /// Log in to the machine's management controller.
    ///
    /// The session is released when the returned handle is dropped.
    async fn open(
        &self,
        machine: MachineUuid,
    ) -> Result<Box<dyn HardwareHandle>, HardwareError>;
}

/// An open management session
#[async_trait]
pub trait HardwareHandle: Send {
    /// Distinguished name of the network adapter.
    fn adapter_dn(&self) -> &str;

    async fn write_vnic_config(
        &mut self,
        config: &VnicConfig,
    ) -> Result<WriteOutcome, HardwareError>;

    async fn remove_vnic(&mut self, dn: &str) -> Result<(), HardwareError>;

    async fn list_uplinks(&mut self) -> Result<Vec<Uplink>, HardwareError>;

    /// Address of an existing interface.
    async fn vnic_mac(&mut self, dn: &str) -> Result<MacAddr, HardwareError>;
}
