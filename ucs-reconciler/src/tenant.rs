// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tenant network activation
//!
//! Tenant ports are recorded `DOWN` by an attach request and activated in
//! bulk here.  A failure on one port marks that port `ERROR` and the pass
//! carries on.

use crate::reconciler::LifecycleReconciler;
use serde::Serialize;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use ucs_common::api::Error;
use ucs_common::api::ResourceType;
use ucs_common::typed_uuid::MachineUuid;
use ucs_common::typed_uuid::PortgroupUuid;
use ucs_types::parse_driver_info;
use ucs_types::BondMode;
use ucs_types::DriverInfo;
use ucs_types::Port;
use ucs_types::PortAttachment;
use ucs_types::Portgroup;
use ucs_types::TenantState;
use ucs_types::VnicRef;
use ucs_vnic::uplink::next_uplink;
use ucs_vnic::AddVnic;
use ucs_vnic::HardwareHandle;

/// Outcome of one `configure_tenant_networks` pass
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TenantSummary {
    /// ports brought up and bound
    pub configured: usize,
    /// ports left in `ERROR`
    pub failed: usize,
}

/// A bond member whose vNIC is up but whose portgroup is not yet bound
struct PendingMember {
    port: Port,
    slot: u32,
}

fn set_tenant_state(port: &mut Port, state: TenantState) {
    if let PortAttachment::Tenant(tenant) = &mut port.attachment {
        tenant.state = state;
    }
}

impl LifecycleReconciler {
    /// Bring up a vNIC for every `DOWN` tenant port of the machine.
    ///
    /// Slots are handed out in store order, starting after the highest slot
    /// of a tenant port already up and advancing only when a port comes up.
    /// Ports outside a portgroup are bound as they come up; each portgroup
    /// is bound once, after all its members are up, with one switch
    /// connection per member.
    pub async fn configure_tenant_networks(
        &self,
        machine_id: MachineUuid,
    ) -> Result<TenantSummary, Error> {
        let log = self.log.new(o!("machine_id" => machine_id.to_string()));
        let machine = self.powered_machine(machine_id).await?;
        let info = parse_driver_info(&machine)?;

        let all_ports = self.store.port_list_by_machine(machine_id).await?;
        // Slots of tenant ports already up stay taken.
        let mut slot = all_ports
            .iter()
            .filter_map(|p| p.attachment.tenant().and_then(|t| t.vnic_id()))
            .max()
            .map_or(0, |last| last + 1);
        let ports: Vec<Port> = all_ports
            .into_iter()
            .filter(|p| {
                p.attachment
                    .tenant()
                    .is_some_and(|t| t.state == TenantState::Down)
            })
            .collect();
        let mut summary = TenantSummary::default();
        if ports.is_empty() {
            return Ok(summary);
        }

        let groups: BTreeMap<PortgroupUuid, Portgroup> = self
            .store
            .portgroup_list_by_machine(machine_id)
            .await?
            .into_iter()
            .map(|g| (g.id, g))
            .collect();

        let mut handle = self.vnics.open(machine_id).await?;
        let mut pending: BTreeMap<PortgroupUuid, Vec<PendingMember>> =
            BTreeMap::new();
        for mut port in ports {
            let Some(tenant) = port.attachment.tenant().cloned() else {
                continue;
            };
            let log = log.new(o!("port_id" => port.id.to_string()));
            let group = port.portgroup_id.and_then(|id| groups.get(&id));
            let vlan = match group {
                Some(group) if group.mode == BondMode::Primary => None,
                _ => tenant.seg_id,
            };

            let vnic = VnicRef::Slot(slot);
            let request = AddVnic {
                vnic: &vnic,
                mac: Some(port.address),
                vlan,
                pxe: port.pxe_enabled,
                uplink: None,
            };
            if let Err(e) =
                self.vnics.add_vnic_with(handle.as_mut(), &info, request).await
            {
                warn!(log, "failed to add tenant vNIC"; "error" => %e);
                set_tenant_state(&mut port, TenantState::Error);
                self.store.port_save(&port).await?;
                summary.failed += 1;
                continue;
            }

            if let Some(group) = group {
                set_tenant_state(&mut port, TenantState::Up { vnic_id: slot });
                self.store.port_save(&port).await?;
                pending
                    .entry(group.id)
                    .or_default()
                    .push(PendingMember { port, slot });
                slot += 1;
                continue;
            }

            let bound = match tenant.vif_port_id.as_deref() {
                Some(vif) => self.bind(&info, vif, &[slot]).await,
                None => Err(Error::internal_error(&format!(
                    "tenant port {} has no virtual port",
                    port.id
                ))),
            };
            match bound {
                Ok(()) => {
                    set_tenant_state(
                        &mut port,
                        TenantState::Up { vnic_id: slot },
                    );
                    self.store.port_save(&port).await?;
                    info!(log, "tenant port up"; "vnic_id" => slot);
                    summary.configured += 1;
                    slot += 1;
                }
                Err(e) => {
                    warn!(log, "failed to bind tenant port"; "error" => %e);
                    self.discard_vnic(&log, handle.as_mut(), &info, slot).await;
                    set_tenant_state(&mut port, TenantState::Error);
                    self.store.port_save(&port).await?;
                    summary.failed += 1;
                }
            }
        }

        for (group_id, members) in pending {
            let log = log.new(o!("portgroup_id" => group_id.to_string()));
            let slots: Vec<u32> = members.iter().map(|m| m.slot).collect();
            let vif =
                groups.get(&group_id).and_then(|g| g.vif_port_id.as_deref());
            let bound = match vif {
                Some(vif) => self.bind(&info, vif, &slots).await,
                None => Err(Error::internal_error(&format!(
                    "portgroup {} has no virtual port",
                    group_id
                ))),
            };
            match bound {
                Ok(()) => {
                    info!(log, "portgroup bound"; "members" => members.len());
                    summary.configured += members.len();
                }
                Err(e) => {
                    warn!(log, "failed to bind portgroup"; "error" => %e);
                    for PendingMember { mut port, slot } in members {
                        self.discard_vnic(&log, handle.as_mut(), &info, slot)
                            .await;
                        set_tenant_state(&mut port, TenantState::Error);
                        self.store.port_save(&port).await?;
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(log, "configured tenant networks";
            "configured" => summary.configured,
            "failed" => summary.failed,
        );
        Ok(summary)
    }

    /// Bind `vif` to the switch ports behind the uplinks of `slots`.
    async fn bind(
        &self,
        info: &DriverInfo,
        vif: &str,
        slots: &[u32],
    ) -> Result<(), Error> {
        let links = slots
            .iter()
            .map(|slot| {
                info.local_link(next_uplink(*slot, info.uplinks)).cloned()
            })
            .collect::<Result<Vec<_>, Error>>()?;
        self.binder.update_binding(vif, info.machine_id, &links).await
    }

    async fn discard_vnic(
        &self,
        log: &Logger,
        handle: &mut dyn HardwareHandle,
        info: &DriverInfo,
        slot: u32,
    ) {
        let vnic = VnicRef::Slot(slot);
        if let Err(e) = self.vnics.delete_vnic_with(handle, info, &vnic).await {
            warn!(log, "failed to remove vNIC"; "slot" => slot, "error" => %e);
        }
    }

    /// Tear down the vNIC of every `UP` tenant port of the machine.
    ///
    /// Virtual ports stay as they are.  A portgroup left with no `UP`
    /// member is destroyed along with its member records.  Every port is
    /// attempted; the first failure is returned at the end.
    pub async fn unconfigure_tenant_networks(
        &self,
        machine_id: MachineUuid,
    ) -> Result<(), Error> {
        let log = self.log.new(o!("machine_id" => machine_id.to_string()));
        let machine = self.powered_machine(machine_id).await?;
        let info = parse_driver_info(&machine)?;

        let ports: Vec<Port> = self
            .store
            .port_list_by_machine(machine_id)
            .await?
            .into_iter()
            .filter(|p| p.attachment.tenant().and_then(|t| t.vnic_id()).is_some())
            .collect();
        if ports.is_empty() {
            return Ok(());
        }

        let mut handle = self.vnics.open(machine_id).await?;
        let mut first_error = None;
        let mut groups = BTreeSet::new();
        for mut port in ports {
            let Some(vnic_id) = port.attachment.tenant().and_then(|t| t.vnic_id())
            else {
                continue;
            };
            let log = log.new(o!("port_id" => port.id.to_string()));
            let vnic = VnicRef::Slot(vnic_id);
            match self.vnics.delete_vnic_with(handle.as_mut(), &info, &vnic).await
            {
                Ok(())
                | Err(Error::ObjectNotFound {
                    type_name: ResourceType::Vnic, ..
                }) => (),
                Err(e) => {
                    warn!(log, "failed to remove tenant vNIC"; "error" => %e);
                    first_error.get_or_insert(e);
                    continue;
                }
            }
            set_tenant_state(&mut port, TenantState::Down);
            if let Err(e) = self.store.port_save(&port).await {
                warn!(log, "failed to record tenant port down"; "error" => %e);
                first_error.get_or_insert(e);
                continue;
            }
            info!(log, "tenant port down"; "vnic_id" => vnic_id);
            if let Some(group_id) = port.portgroup_id {
                groups.insert(group_id);
            }
        }

        for group_id in groups {
            if let Err(e) = self.retire_portgroup(&log, group_id).await {
                warn!(log, "failed to remove portgroup";
                    "portgroup_id" => %group_id,
                    "error" => %e,
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Destroy a portgroup and its members once none of them is up.
    async fn retire_portgroup(
        &self,
        log: &Logger,
        group_id: PortgroupUuid,
    ) -> Result<(), Error> {
        let members = self.store.port_list_by_portgroup(group_id).await?;
        let up = members
            .iter()
            .any(|p| p.attachment.tenant().and_then(|t| t.vnic_id()).is_some());
        if up {
            return Ok(());
        }
        for member in &members {
            self.store.port_destroy(member.id).await?;
        }
        self.store.portgroup_destroy(group_id).await?;
        info!(log, "removed portgroup";
            "portgroup_id" => %group_id,
            "members" => members.len(),
        );
        Ok(())
    }
}
