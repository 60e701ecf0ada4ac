// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence of machines, ports and portgroups
//!
//! The store is the single source of truth for port and portgroup state.
//! Every save is atomic for one record; nothing here spans records, so the
//! lifecycle code persists after each externally visible step.

mod in_memory;

pub use in_memory::InMemoryTopologyStore;
pub use in_memory::TopologySnapshot;

use async_trait::async_trait;
use ucs_common::api::Error;
use ucs_common::typed_uuid::MachineUuid;
use ucs_common::typed_uuid::PortUuid;
use ucs_common::typed_uuid::PortgroupUuid;
use ucs_types::MacAddr;
use ucs_types::Machine;
use ucs_types::Port;
use ucs_types::Portgroup;
use ucs_types::ProvisionState;

/// Record store for the machine topology
///
/// Lists are returned in creation order.
#[async_trait]
pub trait TopologyStore: Send + Sync {
    async fn machine_create(&self, machine: &Machine) -> Result<(), Error>;
    async fn machine_get(&self, id: MachineUuid) -> Result<Machine, Error>;
    async fn machine_save(&self, machine: &Machine) -> Result<(), Error>;
    /// Remove a machine along with every port and portgroup it owns.
    async fn machine_destroy(&self, id: MachineUuid) -> Result<(), Error>;
    async fn machine_list_by_provision_state(
        &self,
        state: ProvisionState,
    ) -> Result<Vec<Machine>, Error>;

    async fn port_create(&self, port: &Port) -> Result<(), Error>;
    async fn port_get(&self, id: PortUuid) -> Result<Port, Error>;
    async fn port_get_by_address(&self, address: MacAddr)
        -> Result<Port, Error>;
    async fn port_save(&self, port: &Port) -> Result<(), Error>;
    async fn port_destroy(&self, id: PortUuid) -> Result<(), Error>;
    async fn port_list_by_machine(
        &self,
        machine_id: MachineUuid,
    ) -> Result<Vec<Port>, Error>;
    async fn port_list_by_portgroup(
        &self,
        portgroup_id: PortgroupUuid,
    ) -> Result<Vec<Port>, Error>;

    async fn portgroup_create(&self, portgroup: &Portgroup)
        -> Result<(), Error>;
    async fn portgroup_get(&self, id: PortgroupUuid)
        -> Result<Portgroup, Error>;
    async fn portgroup_save(&self, portgroup: &Portgroup) -> Result<(), Error>;
    async fn portgroup_destroy(&self, id: PortgroupUuid) -> Result<(), Error>;
    async fn portgroup_list_by_machine(
        &self,
        machine_id: MachineUuid,
    ) -> Result<Vec<Portgroup>, Error>;
}
