// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`TopologyStore`] that keeps generic records in memory

use crate::TopologyStore;
use async_trait::async_trait;
use slog::debug;
use slog::o;
use slog::Logger;
use std::sync::Mutex;
use ucs_common::api::Error;
use ucs_common::api::LookupType;
use ucs_common::api::ResourceType;
use ucs_common::typed_uuid::MachineUuid;
use ucs_common::typed_uuid::PortUuid;
use ucs_common::typed_uuid::PortgroupUuid;
use ucs_types::MacAddr;
use ucs_types::Machine;
use ucs_types::Port;
use ucs_types::PortRecord;
use ucs_types::Portgroup;
use ucs_types::PortgroupRecord;
use ucs_types::ProvisionState;

/// Everything the store holds, in creation order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopologySnapshot {
    pub machines: Vec<Machine>,
    pub ports: Vec<PortRecord>,
    pub portgroups: Vec<PortgroupRecord>,
}

pub struct InMemoryTopologyStore {
    log: Logger,
    inner: Mutex<TopologySnapshot>,
}

impl InMemoryTopologyStore {
    pub fn new(log: &Logger) -> InMemoryTopologyStore {
        InMemoryTopologyStore {
            log: log.new(o!("component" => "InMemoryTopologyStore")),
            inner: Mutex::new(TopologySnapshot::default()),
        }
    }

    /// Returns a copy of every stored record.
    pub fn snapshot(&self) -> TopologySnapshot {
        self.inner.lock().unwrap().clone()
    }

    /// Store a port record as-is, without going through [`Port`].
    pub fn insert_port_record(&self, record: PortRecord) {
        self.inner.lock().unwrap().ports.push(record);
    }
}

fn port_not_found(id: PortUuid) -> Error {
    Error::not_found_by_id(ResourceType::Port, id.as_untyped_uuid())
}

fn portgroup_not_found(id: PortgroupUuid) -> Error {
    Error::not_found_by_id(ResourceType::Portgroup, id.as_untyped_uuid())
}

fn machine_not_found(id: MachineUuid) -> Error {
    Error::not_found_by_id(ResourceType::Machine, id.as_untyped_uuid())
}

fn decode_ports<'a>(
    records: impl Iterator<Item = &'a PortRecord>,
) -> Result<Vec<Port>, Error> {
    records
        .map(|r| Port::from_record(r.clone()).map_err(Error::from))
        .collect()
}

#[async_trait]
impl TopologyStore for InMemoryTopologyStore {
    async fn machine_create(&self, machine: &Machine) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.machines.iter().any(|m| m.id == machine.id) {
            return Err(Error::internal_error(&format!(
                "machine {} already exists",
                machine.id
            )));
        }
        inner.machines.push(machine.clone());
        Ok(())
    }

    async fn machine_get(&self, id: MachineUuid) -> Result<Machine, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .machines
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| machine_not_found(id))
    }

    async fn machine_save(&self, machine: &Machine) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .machines
            .iter_mut()
            .find(|m| m.id == machine.id)
            .ok_or_else(|| machine_not_found(machine.id))?;
        *slot = machine.clone();
        Ok(())
    }

    async fn machine_destroy(&self, id: MachineUuid) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.machines.len();
        inner.machines.retain(|m| m.id != id);
        if inner.machines.len() == before {
            return Err(machine_not_found(id));
        }
        inner.ports.retain(|p| p.machine_id != id);
        inner.portgroups.retain(|pg| pg.machine_id != id);
        debug!(self.log, "destroyed machine"; "machine_id" => %id);
        Ok(())
    }

    async fn machine_list_by_provision_state(
        &self,
        state: ProvisionState,
    ) -> Result<Vec<Machine>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .machines
            .iter()
            .filter(|m| m.provision_state == state)
            .cloned()
            .collect())
    }

    async fn port_create(&self, port: &Port) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.machines.iter().any(|m| m.id == port.machine_id) {
            return Err(machine_not_found(port.machine_id));
        }
        if inner.ports.iter().any(|p| p.id == port.id) {
            return Err(Error::internal_error(&format!(
                "port {} already exists",
                port.id
            )));
        }
        if inner.ports.iter().any(|p| p.address == port.address) {
            return Err(Error::internal_error(&format!(
                "a port with address {} already exists",
                port.address
            )));
        }
        inner.ports.push(port.to_record());
        debug!(self.log, "created port";
            "machine_id" => %port.machine_id,
            "port_id" => %port.id,
            "address" => %port.address,
        );
        Ok(())
    }

    async fn port_get(&self, id: PortUuid) -> Result<Port, Error> {
        let inner = self.inner.lock().unwrap();
        let record = inner
            .ports
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| port_not_found(id))?;
        Ok(Port::from_record(record.clone())?)
    }

    async fn port_get_by_address(
        &self,
        address: MacAddr,
    ) -> Result<Port, Error> {
        let inner = self.inner.lock().unwrap();
        let record = inner
            .ports
            .iter()
            .find(|p| p.address == address)
            .ok_or_else(|| {
                LookupType::ByMac(address.to_string())
                    .into_not_found(ResourceType::Port)
            })?;
        Ok(Port::from_record(record.clone())?)
    }

    async fn port_save(&self, port: &Port) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .ports
            .iter_mut()
            .find(|p| p.id == port.id)
            .ok_or_else(|| port_not_found(port.id))?;
        *slot = port.to_record();
        Ok(())
    }

    async fn port_destroy(&self, id: PortUuid) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.ports.len();
        inner.ports.retain(|p| p.id != id);
        if inner.ports.len() == before {
            return Err(port_not_found(id));
        }
        debug!(self.log, "destroyed port"; "port_id" => %id);
        Ok(())
    }

    async fn port_list_by_machine(
        &self,
        machine_id: MachineUuid,
    ) -> Result<Vec<Port>, Error> {
        let inner = self.inner.lock().unwrap();
        decode_ports(inner.ports.iter().filter(|p| p.machine_id == machine_id))
    }

    async fn port_list_by_portgroup(
        &self,
        portgroup_id: PortgroupUuid,
    ) -> Result<Vec<Port>, Error> {
        let inner = self.inner.lock().unwrap();
        decode_ports(
            inner
                .ports
                .iter()
                .filter(|p| p.portgroup_id == Some(portgroup_id)),
        )
    }

    async fn portgroup_create(
        &self,
        portgroup: &Portgroup,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.machines.iter().any(|m| m.id == portgroup.machine_id) {
            return Err(machine_not_found(portgroup.machine_id));
        }
        if inner.portgroups.iter().any(|pg| pg.id == portgroup.id) {
            return Err(Error::internal_error(&format!(
                "portgroup {} already exists",
                portgroup.id
            )));
        }
        inner.portgroups.push(portgroup.to_record());
        debug!(self.log, "created portgroup";
            "machine_id" => %portgroup.machine_id,
            "portgroup_id" => %portgroup.id,
        );
        Ok(())
    }

    async fn portgroup_get(
        &self,
        id: PortgroupUuid,
    ) -> Result<Portgroup, Error> {
        let inner = self.inner.lock().unwrap();
        let record = inner
            .portgroups
            .iter()
            .find(|pg| pg.id == id)
            .ok_or_else(|| portgroup_not_found(id))?;
        Ok(Portgroup::from_record(record.clone())?)
    }

    async fn portgroup_save(&self, portgroup: &Portgroup) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .portgroups
            .iter_mut()
            .find(|pg| pg.id == portgroup.id)
            .ok_or_else(|| portgroup_not_found(portgroup.id))?;
        *slot = portgroup.to_record();
        Ok(())
    }

    async fn portgroup_destroy(&self, id: PortgroupUuid) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.portgroups.len();
        inner.portgroups.retain(|pg| pg.id != id);
        if inner.portgroups.len() == before {
            return Err(portgroup_not_found(id));
        }
        debug!(self.log, "destroyed portgroup"; "portgroup_id" => %id);
        Ok(())
    }

    async fn portgroup_list_by_machine(
        &self,
        machine_id: MachineUuid,
    ) -> Result<Vec<Portgroup>, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .portgroups
            .iter()
            .filter(|pg| pg.machine_id == machine_id)
            .map(|r| Portgroup::from_record(r.clone()).map_err(Error::from))
            .collect()
    }
}
