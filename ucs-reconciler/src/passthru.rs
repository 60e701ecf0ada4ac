// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tenant attach and detach requests
//!
//! An attach request only records intent: it creates `DOWN` tenant ports
//! (and, with link aggregation, the portgroup that bonds them) for the next
//! `configure_tenant_networks` pass to activate.  Requests are accepted
//! under the machine's exclusive lock and completed on a spawned task that
//! holds the lock until it is done.

use crate::interfaces::LockMode;
use crate::interfaces::MachineLock;
use crate::interfaces::MachineLocker;
use serde::Deserialize;
use serde::Serialize;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use ucs_common::api::Error;
use ucs_common::api::ResourceType;
use ucs_common::typed_uuid::MachineUuid;
use ucs_db::TopologyStore;
use ucs_types::parse_driver_info;
use ucs_types::BondMode;
use ucs_types::MacAddr;
use ucs_types::Port;
use ucs_types::PortAttachment;
use ucs_types::Portgroup;
use ucs_types::TenantAttachment;
use ucs_types::TenantState;
use ucs_vnic::uplink::derive_bond_member_mac;

/// Parameters of an attach request
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AttachRequest {
    pub mac: MacAddr,
    /// virtual port the tenant attaches through
    pub vif_port_id: String,
    pub vlan: Option<u32>,
    #[serde(default)]
    pub pxe: bool,
}

/// What a detach request resolved to
#[derive(Clone, Debug)]
enum DetachTarget {
    Port(Port),
    Portgroup(Portgroup),
}

#[derive(Clone)]
pub struct VendorPassthru {
    log: Logger,
    store: Arc<dyn TopologyStore>,
    locks: Arc<dyn MachineLocker>,
}

impl VendorPassthru {
    pub fn new(
        log: &Logger,
        store: Arc<dyn TopologyStore>,
        locks: Arc<dyn MachineLocker>,
    ) -> VendorPassthru {
        VendorPassthru {
            log: log.new(o!("component" => "VendorPassthru")),
            store,
            locks,
        }
    }

    /// Accept an attach request.
    ///
    /// Fails right away if the machine is unknown or busy.  Otherwise the
    /// returned task completes the request.
    pub async fn add_vnic(
        &self,
        machine_id: MachineUuid,
        request: AttachRequest,
    ) -> Result<JoinHandle<Result<(), Error>>, Error> {
        let lock = self.lock(machine_id).await?;
        let this = self.clone();
        Ok(self.spawn_locked(lock, "attach", async move {
            this.request_attach(machine_id, &request).await
        }))
    }

    /// Accept a detach request.
    ///
    /// Unlike attach, the virtual port is resolved before the request is
    /// accepted, so an unknown `vif_port_id` fails right away.
    pub async fn delete_vnic(
        &self,
        machine_id: MachineUuid,
        vif_port_id: &str,
    ) -> Result<JoinHandle<Result<(), Error>>, Error> {
        let lock = self.lock(machine_id).await?;
        let target = self.find_target(machine_id, vif_port_id).await?;
        let this = self.clone();
        Ok(self.spawn_locked(lock, "detach", async move {
            this.detach(machine_id, target).await
        }))
    }

    async fn lock(
        &self,
        machine_id: MachineUuid,
    ) -> Result<Box<dyn MachineLock>, Error> {
        self.store.machine_get(machine_id).await?;
        self.locks.acquire(machine_id, LockMode::Exclusive).await
    }

    fn spawn_locked<F>(
        &self,
        lock: Box<dyn MachineLock>,
        what: &'static str,
        body: F,
    ) -> JoinHandle<Result<(), Error>>
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let log = self.log.new(o!(
            "machine_id" => lock.machine().to_string(),
            "request" => what,
        ));
        tokio::spawn(async move {
            let result = body.await;
            if let Err(e) = &result {
                error!(log, "request failed"; "error" => %e);
            }
            drop(lock);
            result
        })
    }

    /// Record the intent to attach a tenant network.
    pub async fn request_attach(
        &self,
        machine_id: MachineUuid,
        request: &AttachRequest,
    ) -> Result<(), Error> {
        let log = self.log.new(o!(
            "machine_id" => machine_id.to_string(),
            "vif_port_id" => request.vif_port_id.clone(),
        ));
        let machine = self.store.machine_get(machine_id).await?;
        let info = parse_driver_info(&machine)?;

        if !info.vpc {
            let mut port = Port::new(
                machine_id,
                request.mac,
                PortAttachment::Tenant(TenantAttachment {
                    vif_port_id: Some(request.vif_port_id.clone()),
                    seg_id: request.vlan,
                    state: TenantState::Down,
                }),
            );
            port.pxe_enabled = request.pxe;
            self.store.port_create(&port).await?;
            info!(log, "recorded tenant port"; "port_id" => %port.id);
            return Ok(());
        }

        let existing = self.store.portgroup_list_by_machine(machine_id).await?;
        let mode = if existing.is_empty() {
            BondMode::Primary
        } else {
            BondMode::Standard
        };

        // Take the first block of member addresses that no port of the
        // machine still holds.  Released bond members keep their addresses,
        // so counting portgroups is not enough.  The ports are read under
        // the machine's exclusive lock.
        let base = info.uplink_mac(0)?;
        let taken: BTreeSet<MacAddr> = self
            .store
            .port_list_by_machine(machine_id)
            .await?
            .into_iter()
            .map(|p| p.address)
            .collect();
        let group_index = (0..=u32::MAX)
            .find(|&index| {
                (0..info.uplinks.get()).all(|member| {
                    let mac = derive_bond_member_mac(
                        base,
                        info.uplinks,
                        index,
                        member,
                    );
                    !taken.contains(&mac)
                })
            })
            .ok_or_else(|| {
                Error::internal_error("no free bond member addresses")
            })?;
        let group = Portgroup::new(
            machine_id,
            request.mac,
            request.vif_port_id.clone(),
            mode,
        );
        self.store.portgroup_create(&group).await?;

        let mut members = Vec::new();
        for member in 0..info.uplinks.get() {
            let mut port = Port::new(
                machine_id,
                derive_bond_member_mac(base, info.uplinks, group_index, member),
                PortAttachment::Tenant(TenantAttachment {
                    vif_port_id: None,
                    seg_id: request.vlan,
                    state: TenantState::Down,
                }),
            );
            port.portgroup_id = Some(group.id);
            port.pxe_enabled = request.pxe;
            if let Err(e) = self.store.port_create(&port).await {
                warn!(log, "failed to record bond member, undoing attach";
                    "error" => %e,
                );
                self.discard_group(&log, &group, &members).await;
                return Err(e);
            }
            members.push(port);
        }

        info!(log, "recorded tenant portgroup";
            "portgroup_id" => %group.id,
            "mode" => group.mode.as_u32(),
            "members" => members.len(),
        );
        Ok(())
    }

    async fn discard_group(
        &self,
        log: &Logger,
        group: &Portgroup,
        members: &[Port],
    ) {
        for port in members {
            if let Err(e) = self.store.port_destroy(port.id).await {
                warn!(log, "failed to remove bond member";
                    "port_id" => %port.id,
                    "error" => %e,
                );
            }
        }
        if let Err(e) = self.store.portgroup_destroy(group.id).await {
            warn!(log, "failed to remove portgroup"; "error" => %e);
        }
    }

    /// Undo an attach that has not been activated.
    pub async fn request_detach(
        &self,
        machine_id: MachineUuid,
        vif_port_id: &str,
    ) -> Result<(), Error> {
        let target = self.find_target(machine_id, vif_port_id).await?;
        self.detach(machine_id, target).await
    }

    async fn find_target(
        &self,
        machine_id: MachineUuid,
        vif_port_id: &str,
    ) -> Result<DetachTarget, Error> {
        let ports = self.store.port_list_by_machine(machine_id).await?;
        if let Some(port) = ports.into_iter().find(|p| {
            p.attachment.tenant().is_some()
                && p.vif_port_id() == Some(vif_port_id)
        }) {
            return Ok(DetachTarget::Port(port));
        }

        let groups = self.store.portgroup_list_by_machine(machine_id).await?;
        groups
            .into_iter()
            .find(|g| g.vif_port_id.as_deref() == Some(vif_port_id))
            .map(DetachTarget::Portgroup)
            .ok_or_else(|| {
                Error::not_found_by_vif(ResourceType::Port, vif_port_id)
            })
    }

    async fn detach(
        &self,
        machine_id: MachineUuid,
        target: DetachTarget,
    ) -> Result<(), Error> {
        let log = self.log.new(o!("machine_id" => machine_id.to_string()));
        match target {
            DetachTarget::Port(port) => {
                if is_up(&port) {
                    return Err(Error::internal_error(&format!(
                        "port {} is active; unconfigure tenant networks \
                        before detaching",
                        port.id
                    )));
                }
                self.store.port_destroy(port.id).await?;
                info!(log, "removed tenant port"; "port_id" => %port.id);
            }
            DetachTarget::Portgroup(group) => {
                let members = self.store.port_list_by_portgroup(group.id).await?;
                for mut port in members {
                    if is_up(&port) {
                        port.portgroup_id = None;
                        self.store.port_save(&port).await?;
                        info!(log, "released active bond member";
                            "port_id" => %port.id,
                        );
                    } else {
                        self.store.port_destroy(port.id).await?;
                    }
                }
                self.store.portgroup_destroy(group.id).await?;
                info!(log, "removed tenant portgroup";
                    "portgroup_id" => %group.id,
                );
            }
        }
        Ok(())
    }
}

fn is_up(port: &Port) -> bool {
    port.attachment.tenant().and_then(|t| t.vnic_id()).is_some()
}
