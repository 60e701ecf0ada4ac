// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared setup for the reconciler integration tests

use slog::Logger;
use std::sync::Arc;
use ucs_common::config::NetworkConfig;
use ucs_common::typed_uuid::MachineUuid;
use ucs_db::InMemoryTopologyStore;
use ucs_db::TopologyStore;
use ucs_networking::fakes::FakeNetworkClient;
use ucs_reconciler::fakes::FakeBootConfig;
use ucs_reconciler::fakes::FakeInspector;
use ucs_reconciler::fakes::FakeLocks;
use ucs_reconciler::fakes::FakePower;
use ucs_reconciler::Collaborators;
use ucs_reconciler::LifecycleReconciler;
use ucs_reconciler::VendorPassthru;
use ucs_types::LocalLinkConnection;
use ucs_types::MacAddr;
use ucs_types::Machine;
use ucs_types::Port;
use ucs_types::ProvisionState;
use ucs_types::TenantState;
use ucs_vnic::fakes::FakeHardware;

pub const PROVISIONING_NET: &str = "provisioning-net";
pub const PROVISIONING_SEG: u32 = 100;
pub const CLEANING_NET: &str = "cleaning-net";
pub const TENANT_NET: &str = "tenant-net";
pub const TENANT_SEG: u32 = 400;
pub const SWITCH_ID: &str = "30:f7:0d:9c:a6:44";

/// A reconciler wired to fakes of everything it talks to
pub struct ControlPlane {
    pub store: Arc<InMemoryTopologyStore>,
    pub hardware: FakeHardware,
    pub network: Arc<FakeNetworkClient>,
    pub power: Arc<FakePower>,
    pub inspector: Arc<FakeInspector>,
    pub locks: FakeLocks,
    pub reconciler: Arc<LifecycleReconciler>,
    pub passthru: VendorPassthru,
}

impl ControlPlane {
    pub fn new(log: &Logger, uplinks: u32) -> ControlPlane {
        let store = Arc::new(InMemoryTopologyStore::new(log));
        let hardware = FakeHardware::new(uplinks);
        let network = Arc::new(FakeNetworkClient::new());
        network.add_network(PROVISIONING_NET, Some(PROVISIONING_SEG));
        network.add_network(CLEANING_NET, Some(200));
        network.add_network(TENANT_NET, Some(TENANT_SEG));
        let power = Arc::new(FakePower::new());
        let inspector = Arc::new(FakeInspector::new());
        let locks = FakeLocks::new();
        let reconciler = Arc::new(LifecycleReconciler::new(
            log,
            NetworkConfig {
                provisioning_network_id: PROVISIONING_NET.to_string(),
                cleaning_network_id: CLEANING_NET.to_string(),
            },
            Collaborators {
                store: store.clone(),
                hardware: Arc::new(hardware.clone()),
                network: network.clone(),
                power: power.clone(),
                boot: Arc::new(FakeBootConfig),
                inspector: inspector.clone(),
            },
        ));
        let passthru =
            VendorPassthru::new(log, store.clone(), Arc::new(locks.clone()));
        ControlPlane {
            store,
            hardware,
            network,
            power,
            inspector,
            locks,
            reconciler,
            passthru,
        }
    }

    /// Enroll a machine whose `uplinks` uplinks are known but not yet
    /// traced to a switch port.
    pub async fn enroll(
        &self,
        uplinks: u32,
        state: ProvisionState,
    ) -> MachineUuid {
        let mut machine = Machine::new(MachineUuid::new_v4(), state);
        let macs: Vec<MacAddr> =
            (0..uplinks).map(FakeHardware::uplink_mac).collect();
        machine.set_uplinks(&macs);
        self.store.machine_create(&machine).await.unwrap();
        machine.id
    }

    /// Enroll a machine with every uplink cabled to `SWITCH_ID`.
    pub async fn enroll_cabled(
        &self,
        uplinks: u32,
        state: ProvisionState,
    ) -> MachineUuid {
        let id = self.enroll(uplinks, state).await;
        let mut machine = self.store.machine_get(id).await.unwrap();
        for n in 0..uplinks {
            machine
                .set_uplink_local_link(n, &switch_port(n))
                .unwrap();
        }
        self.store.machine_save(&machine).await.unwrap();
        id
    }

    pub async fn ports(&self, machine: MachineUuid) -> Vec<Port> {
        self.store.port_list_by_machine(machine).await.unwrap()
    }
}

/// The switch port uplink `n` is cabled to
pub fn switch_port(n: u32) -> LocalLinkConnection {
    LocalLinkConnection {
        switch_id: SWITCH_ID.to_string(),
        port_id: format!("Ethernet1/{}", n + 1),
        switch_info: None,
    }
}

pub fn tenant_state(port: &Port) -> TenantState {
    port.attachment.tenant().unwrap().state.clone()
}
