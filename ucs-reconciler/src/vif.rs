// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hypervisor-side VIF plugging
//!
//! The hypervisor plugs an instance's VIFs by submitting attach requests and
//! then waiting for the topology store to show the corresponding ports up.

use crate::passthru::AttachRequest;
use crate::passthru::VendorPassthru;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use ucs_common::api::Error;
use ucs_common::config::HypervisorConfig;
use ucs_common::typed_uuid::MachineUuid;
use ucs_db::TopologyStore;
use ucs_networking::NetworkClient;
use ucs_networking::VirtualPortBinder;
use ucs_types::MacAddr;
use ucs_types::Port;
use ucs_types::TenantState;

/// A virtual interface of an instance
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Vif {
    /// virtual port id
    pub id: String,
    pub network_id: String,
    pub address: MacAddr,
}

/// Where the vNIC behind a VIF stands
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Readiness {
    Pending,
    Ready,
    Failed,
}

fn tenant_state(port: &Port) -> Option<&TenantState> {
    port.attachment.tenant().map(|t| &t.state)
}

pub struct VifPlugger {
    log: Logger,
    config: HypervisorConfig,
    passthru: VendorPassthru,
    binder: VirtualPortBinder,
    store: Arc<dyn TopologyStore>,
}

impl VifPlugger {
    pub fn new(
        log: &Logger,
        config: HypervisorConfig,
        passthru: VendorPassthru,
        network: Arc<dyn NetworkClient>,
        store: Arc<dyn TopologyStore>,
    ) -> VifPlugger {
        let log = log.new(o!("component" => "VifPlugger"));
        VifPlugger {
            binder: VirtualPortBinder::new(&log, network),
            log,
            config,
            passthru,
            store,
        }
    }

    /// Attach every VIF and wait for its vNIC to come up.
    pub async fn plug_vifs(
        &self,
        machine_id: MachineUuid,
        vifs: &[Vif],
    ) -> Result<(), Error> {
        for vif in vifs {
            let log = self.log.new(o!(
                "machine_id" => machine_id.to_string(),
                "vif_port_id" => vif.id.clone(),
            ));
            let vlan = self.binder.segmentation_id(&vif.network_id).await?;
            let request = AttachRequest {
                mac: vif.address,
                vif_port_id: vif.id.clone(),
                vlan: Some(vlan),
                pxe: false,
            };
            let task = self.passthru.add_vnic(machine_id, request).await?;
            join(task).await?;
            debug!(log, "attach accepted, waiting for vNIC"; "vlan" => vlan);
            self.wait_for_vnic(machine_id, vif).await?;
            info!(log, "plugged VIF");
        }
        Ok(())
    }

    /// Detach every VIF.
    pub async fn unplug_vifs(
        &self,
        machine_id: MachineUuid,
        vifs: &[Vif],
    ) -> Result<(), Error> {
        for vif in vifs {
            let task = self.passthru.delete_vnic(machine_id, &vif.id).await?;
            join(task).await?;
            info!(self.log, "unplugged VIF";
                "machine_id" => %machine_id,
                "vif_port_id" => &vif.id,
            );
        }
        Ok(())
    }

    /// Addresses to give the instance's interfaces.  The virtual network
    /// assigns them, so there are none to suggest.
    pub fn macs_for_instance(
        &self,
        _machine_id: MachineUuid,
    ) -> Option<Vec<MacAddr>> {
        None
    }

    async fn wait_for_vnic(
        &self,
        machine_id: MachineUuid,
        vif: &Vif,
    ) -> Result<(), Error> {
        let deadline = Instant::now() + self.config.vnic_wait_timeout_secs;
        loop {
            match self.readiness(machine_id, vif.address).await? {
                Readiness::Ready => return Ok(()),
                Readiness::Failed => {
                    return Err(Error::internal_error(&format!(
                        "vNIC for {} on machine {} failed to come up",
                        vif.id, machine_id
                    )))
                }
                Readiness::Pending => (),
            }
            if Instant::now() >= deadline {
                return Err(Error::internal_error(&format!(
                    "timed out waiting for vNIC for {} on machine {}",
                    vif.id, machine_id
                )));
            }
            tokio::time::sleep(self.config.vnic_wait_interval_secs).await;
        }
    }

    async fn readiness(
        &self,
        machine_id: MachineUuid,
        address: MacAddr,
    ) -> Result<Readiness, Error> {
        let port = match self.store.port_get_by_address(address).await {
            Ok(port) => port,
            Err(Error::ObjectNotFound { .. }) => {
                return self.group_readiness(machine_id, address).await
            }
            Err(e) => return Err(e),
        };
        Ok(match tenant_state(&port) {
            Some(TenantState::Up { .. }) => Readiness::Ready,
            Some(TenantState::Error) => Readiness::Failed,
            _ => Readiness::Pending,
        })
    }

    /// With link aggregation the VIF's address is the portgroup's; the bond
    /// is usable once any member is up.
    async fn group_readiness(
        &self,
        machine_id: MachineUuid,
        address: MacAddr,
    ) -> Result<Readiness, Error> {
        let groups = self.store.portgroup_list_by_machine(machine_id).await?;
        let Some(group) = groups.into_iter().find(|g| g.address == address)
        else {
            return Ok(Readiness::Pending);
        };
        let members = self.store.port_list_by_portgroup(group.id).await?;
        let states: Vec<_> = members.iter().filter_map(tenant_state).collect();
        if states.iter().any(|s| matches!(s, TenantState::Up { .. })) {
            Ok(Readiness::Ready)
        } else if !states.is_empty()
            && states.iter().all(|s| **s == TenantState::Error)
        {
            Ok(Readiness::Failed)
        } else {
            Ok(Readiness::Pending)
        }
    }
}

/// Wait for an accepted request to complete.
async fn join(task: JoinHandle<Result<(), Error>>) -> Result<(), Error> {
    task.await.map_err(|e| {
        Error::internal_error(&format!("request task failed: {}", e))
    })?
}
