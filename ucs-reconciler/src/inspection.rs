// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware inspection
//!
//! Inspection records the adapter's uplinks, PXE boots the machine on the
//! provisioning VLAN through one vNIC per uplink (at most two), and leaves
//! it to the inspection service.  Once the service reports completion the
//! switch connections learned over LLDP are copied from the inspection
//! ports into the machine's facts.

use crate::reconciler::LifecycleReconciler;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use ucs_common::api::Error;
use ucs_common::api::ResourceType;
use ucs_common::typed_uuid::MachineUuid;
use ucs_types::parse_driver_info;
use ucs_types::DriverInfo;
use ucs_types::MacAddr;
use ucs_types::Port;
use ucs_types::PortAttachment;
use ucs_types::ProvisionState;
use ucs_types::VnicRef;
use ucs_vnic::AddVnic;
use ucs_vnic::HardwareHandle;

/// Most uplinks PXE booted during inspection
pub const MAX_INSPECTION_VNICS: u32 = 2;

impl LifecycleReconciler {
    /// Start inspecting a machine.
    ///
    /// Returns once the vNICs are in place and the inspection service has
    /// been asked to start; completion is picked up by the inspection
    /// monitor.
    pub async fn inspect_hardware(
        &self,
        machine_id: MachineUuid,
    ) -> Result<ProvisionState, Error> {
        let log = self.log.new(o!("machine_id" => machine_id.to_string()));
        let mut machine = self.powered_machine(machine_id).await?;

        let mut handle = self.vnics.open(machine_id).await?;
        let uplinks = self.vnics.uplinks_with(handle.as_mut(), machine_id).await?;
        let macs: Vec<MacAddr> = uplinks.iter().map(|u| u.mac).collect();
        machine.set_uplinks(&macs);
        self.store.machine_save(&machine).await?;
        info!(log, "recorded uplinks"; "uplinks" => macs.len());

        let info = parse_driver_info(&machine)?;
        let count = info.uplinks.get().min(MAX_INSPECTION_VNICS);
        let mut builtin = Vec::new();
        for slot in 0..count {
            let vnic = VnicRef::Slot(slot);
            let mac = self
                .vnics
                .vnic_mac_with(handle.as_mut(), machine_id, &vnic)
                .await?;
            builtin.push(mac);
        }
        let seg_id = self
            .binder
            .segmentation_id(&self.config.provisioning_network_id)
            .await?;

        let mut added = Vec::new();
        for (slot, mac) in (0..count).zip(builtin) {
            let vnic = VnicRef::Slot(slot);
            let request = AddVnic {
                vnic: &vnic,
                mac: Some(mac),
                vlan: Some(seg_id),
                pxe: true,
                uplink: Some(slot),
            };
            if let Err(e) =
                self.vnics.add_vnic_with(handle.as_mut(), &info, request).await
            {
                error!(log, "failed to add inspection vNIC";
                    "slot" => slot,
                    "error" => %e,
                );
                self.reset_slots(&log, handle.as_mut(), &info, &added).await;
                return Err(e);
            }
            added.push((slot, mac));
        }

        let mut created = Vec::new();
        for (slot, mac) in &added {
            let mut port = Port::new(
                machine_id,
                *mac,
                PortAttachment::Inspect { vnic_id: *slot, uplink: *slot },
            );
            port.pxe_enabled = true;
            if let Err(e) = self.store.port_create(&port).await {
                error!(log, "failed to record inspection port"; "error" => %e);
                for port in &created {
                    if let Err(e) = self.store.port_destroy(*port).await {
                        warn!(log, "failed to remove inspection port";
                            "error" => %e,
                        );
                    }
                }
                self.reset_slots(&log, handle.as_mut(), &info, &added).await;
                return Err(e);
            }
            created.push(port.id);
        }
        drop(handle);

        let inspector = self.inspector.clone();
        let task_log = log.clone();
        tokio::spawn(async move {
            if let Err(e) = inspector.start(machine_id).await {
                warn!(task_log, "failed to start inspection"; "error" => %e);
            }
        });

        info!(log, "inspection started";
            "vnics" => added.len(),
            "seg_id" => seg_id,
        );
        Ok(ProvisionState::Inspecting)
    }

    async fn reset_slots(
        &self,
        log: &Logger,
        handle: &mut dyn HardwareHandle,
        info: &DriverInfo,
        slots: &[(u32, MacAddr)],
    ) {
        for (slot, _) in slots {
            let vnic = VnicRef::Slot(*slot);
            if let Err(e) =
                self.vnics.delete_vnic_with(&mut *handle, info, &vnic).await
            {
                warn!(log, "failed to reset vNIC"; "slot" => slot, "error" => %e);
            }
        }
    }

    /// Harvest the switch connections found by inspection and remove the
    /// inspection vNICs and every port record of the machine.
    pub async fn finish_inspection(
        &self,
        machine_id: MachineUuid,
    ) -> Result<(), Error> {
        let log = self.log.new(o!("machine_id" => machine_id.to_string()));
        let mut machine = self.store.machine_get(machine_id).await?;
        let info = parse_driver_info(&machine)?;
        let ports = self.store.port_list_by_machine(machine_id).await?;

        let mut handle = None;
        for port in ports {
            let PortAttachment::Inspect { vnic_id, uplink } = port.attachment
            else {
                self.store.port_destroy(port.id).await?;
                continue;
            };
            match port.local_link() {
                Some(link) => {
                    machine.set_uplink_local_link(uplink, &link)?;
                    info!(log, "recorded switch connection";
                        "uplink" => uplink,
                        "switch_id" => &link.switch_id,
                        "port_id" => &link.port_id,
                    );
                }
                None => {
                    warn!(log, "no switch connection found for uplink";
                        "uplink" => uplink,
                    );
                }
            }

            if handle.is_none() {
                handle = Some(self.vnics.open(machine_id).await?);
            }
            if let Some(handle) = handle.as_mut() {
                let vnic = VnicRef::Slot(vnic_id);
                match self
                    .vnics
                    .delete_vnic_with(handle.as_mut(), &info, &vnic)
                    .await
                {
                    Ok(())
                    | Err(Error::ObjectNotFound {
                        type_name: ResourceType::Vnic, ..
                    }) => (),
                    Err(e) => return Err(e),
                }
            }
            self.store.port_destroy(port.id).await?;
        }

        self.store.machine_save(&machine).await?;
        info!(log, "inspection finished");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reconciler::test::Harness;
    use crate::reconciler::test::PROVISIONING_NET;
    use ucs_db::TopologyStore;
    use assert_matches::assert_matches;
    use serde_json::json;
    use ucs_test_utils::dev::test_setup_log;
    use ucs_types::Machine;
    use ucs_vnic::fakes::FakeHardware;

    async fn uninspected(harness: &Harness) -> MachineUuid {
        let machine =
            Machine::new(MachineUuid::new_v4(), ProvisionState::Inspecting);
        harness.store.machine_create(&machine).await.unwrap();
        machine.id
    }

    /// Wait for the detached start request to run.
    async fn started(harness: &Harness) -> Vec<MachineUuid> {
        for _ in 0..100 {
            let started = harness.inspector.started();
            if !started.is_empty() {
                return started;
            }
            tokio::task::yield_now().await;
        }
        harness.inspector.started()
    }

    #[tokio::test]
    async fn test_inspect_hardware() {
        let logctx = test_setup_log("test_inspect_hardware");
        let harness = Harness::new(&logctx.log, 4);
        let machine = uninspected(&harness).await;

        let state = harness.reconciler.inspect_hardware(machine).await.unwrap();
        assert_eq!(state, ProvisionState::Inspecting);
        assert_eq!(started(&harness).await, vec![machine]);

        let saved = harness.store.machine_get(machine).await.unwrap();
        let info = parse_driver_info(&saved).unwrap();
        assert_eq!(info.uplinks.get(), 4);
        assert_eq!(info.uplink_mac(3).unwrap(), FakeHardware::uplink_mac(3));

        // Only the first two uplinks boot.
        let ports = harness.store.port_list_by_machine(machine).await.unwrap();
        assert_eq!(ports.len(), 2);
        for (n, port) in ports.iter().enumerate() {
            let n = n as u32;
            assert_eq!(port.address, FakeHardware::builtin_mac(n));
            assert_eq!(
                port.attachment,
                PortAttachment::Inspect { vnic_id: n, uplink: n }
            );
            let slot = harness.hardware.slot(n).unwrap();
            assert_eq!(slot.vlan, Some(100));
            assert!(slot.pxe_boot);
            assert_eq!(slot.uplink_port, n);
        }
        assert_eq!(harness.hardware.slot(2).unwrap().vlan, None);
        // Inspection boots without a virtual port.
        assert!(harness.network.creates().is_empty());
        assert_eq!(harness.hardware.open_sessions(), 0);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_inspect_hardware_failure() {
        let logctx = test_setup_log("test_inspect_hardware_failure");
        let harness = Harness::new(&logctx.log, 2);
        let machine = uninspected(&harness).await;
        harness.hardware.fail_slot(1, "500");

        assert_matches!(
            harness.reconciler.inspect_hardware(machine).await,
            Err(Error::HardwareConfig { .. })
        );
        assert!(harness
            .store
            .port_list_by_machine(machine)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(harness.hardware.slot(0).unwrap().vlan, None);
        assert!(!harness.hardware.slot(0).unwrap().pxe_boot);
        assert!(harness.inspector.started().is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_inspect_missing_network() {
        let logctx = test_setup_log("test_inspect_missing_network");
        let harness = Harness::new(&logctx.log, 2);
        let machine = uninspected(&harness).await;
        harness.network.add_network(PROVISIONING_NET, None);

        assert_matches!(
            harness.reconciler.inspect_hardware(machine).await,
            Err(Error::NetworkBinding { .. })
        );
        assert!(harness.hardware.writes().is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_finish_inspection() {
        let logctx = test_setup_log("test_finish_inspection");
        let harness = Harness::new(&logctx.log, 2);
        let machine = uninspected(&harness).await;
        harness.reconciler.inspect_hardware(machine).await.unwrap();

        // LLDP found the switch behind uplink 1 only.
        let ports = harness.store.port_list_by_machine(machine).await.unwrap();
        let mut port = ports[1].clone();
        port.local_link_connection = json!({
            "switch_id": "30:f7:0d:9c:a6:44",
            "port_id": "Ethernet1/29",
            "switch_info": "{\"system_name\":\"sw-lab-n3k-2\"}",
        })
        .as_object()
        .unwrap()
        .clone();
        harness.store.port_save(&port).await.unwrap();

        harness.reconciler.finish_inspection(machine).await.unwrap();
        assert!(harness
            .store
            .port_list_by_machine(machine)
            .await
            .unwrap()
            .is_empty());
        let saved = harness.store.machine_get(machine).await.unwrap();
        let info = parse_driver_info(&saved).unwrap();
        assert_matches!(info.local_link(0), Err(Error::MissingConfig { .. }));
        assert_eq!(info.local_link(1).unwrap().port_id, "Ethernet1/29");
        assert!(!harness.hardware.slot(0).unwrap().pxe_boot);
        assert!(!harness.hardware.slot(1).unwrap().pxe_boot);

        // Nothing left to clean up.
        harness.reconciler.finish_inspection(machine).await.unwrap();
        logctx.cleanup_successful();
    }
}
