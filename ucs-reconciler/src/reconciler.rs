// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning and cleaning network attachment
//!
//! Attaching creates the virtual port first and the vNIC second, undoing the
//! port if the hardware refuses the vNIC.  Detaching runs the other way:
//! the vNIC goes first and the port record is marked down before the
//! virtual port is deleted, so an interrupted detach can simply be run
//! again.

use crate::interfaces::BootConfig;
use crate::interfaces::InspectorClient;
use crate::interfaces::PowerControl;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::Logger;
use std::net::IpAddr;
use std::sync::Arc;
use ucs_common::api::Error;
use ucs_common::api::ResourceType;
use ucs_common::config::NetworkConfig;
use ucs_common::typed_uuid::MachineUuid;
use ucs_db::TopologyStore;
use ucs_networking::BindingContext;
use ucs_networking::NetworkClient;
use ucs_networking::VirtualPortBinder;
use ucs_types::parse_driver_info;
use ucs_types::AttachmentKind;
use ucs_types::DriverInfo;
use ucs_types::Machine;
use ucs_types::PhaseAttachment;
use ucs_types::PhaseState;
use ucs_types::Port;
use ucs_types::PortAttachment;
use ucs_types::PowerState;
use ucs_types::ProvisionState;
use ucs_types::VnicRef;
use ucs_vnic::AddVnic;
use ucs_vnic::HardwareHandle;
use ucs_vnic::HardwareSession;
use ucs_vnic::VnicController;

/// Slot the provisioning and cleaning vNIC always occupies
pub const PHASE_VNIC_SLOT: u32 = 0;

/// Lifecycle phases that attach a machine to a service network
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkPhase {
    Provisioning,
    Cleaning,
}

impl NetworkPhase {
    pub fn kind(self) -> AttachmentKind {
        match self {
            NetworkPhase::Provisioning => AttachmentKind::Deploy,
            NetworkPhase::Cleaning => AttachmentKind::Clean,
        }
    }

    fn attachment(self, attachment: PhaseAttachment) -> PortAttachment {
        match self {
            NetworkPhase::Provisioning => PortAttachment::Deploy(attachment),
            NetworkPhase::Cleaning => PortAttachment::Clean(attachment),
        }
    }
}

/// Everything the reconciler talks to
pub struct Collaborators {
    pub store: Arc<dyn TopologyStore>,
    pub hardware: Arc<dyn HardwareSession>,
    pub network: Arc<dyn NetworkClient>,
    pub power: Arc<dyn PowerControl>,
    pub boot: Arc<dyn BootConfig>,
    pub inspector: Arc<dyn InspectorClient>,
}

/// Drives a machine's vNICs, virtual ports and port records through each
/// lifecycle phase
///
/// Callers hold the machine's exclusive lock for the duration of every
/// operation.  Nothing is cached between calls; every operation starts from
/// the records in the topology store.
pub struct LifecycleReconciler {
    pub(crate) log: Logger,
    pub(crate) config: NetworkConfig,
    pub(crate) store: Arc<dyn TopologyStore>,
    pub(crate) vnics: VnicController,
    pub(crate) binder: VirtualPortBinder,
    pub(crate) power: Arc<dyn PowerControl>,
    pub(crate) boot: Arc<dyn BootConfig>,
    pub(crate) inspector: Arc<dyn InspectorClient>,
}

impl LifecycleReconciler {
    pub fn new(
        log: &Logger,
        config: NetworkConfig,
        collaborators: Collaborators,
    ) -> LifecycleReconciler {
        let log = log.new(o!("component" => "LifecycleReconciler"));
        LifecycleReconciler {
            vnics: VnicController::new(&log, collaborators.hardware),
            binder: VirtualPortBinder::new(&log, collaborators.network),
            store: collaborators.store,
            power: collaborators.power,
            boot: collaborators.boot,
            inspector: collaborators.inspector,
            config,
            log,
        }
    }

    pub fn store(&self) -> &Arc<dyn TopologyStore> {
        &self.store
    }

    fn network_id(&self, phase: NetworkPhase) -> &str {
        match phase {
            NetworkPhase::Provisioning => &self.config.provisioning_network_id,
            NetworkPhase::Cleaning => &self.config.cleaning_network_id,
        }
    }

    /// Load a machine, powering it on first if it is off.
    pub(crate) async fn powered_machine(
        &self,
        machine_id: MachineUuid,
    ) -> Result<Machine, Error> {
        let mut machine = self.store.machine_get(machine_id).await?;
        if machine.power_state != PowerState::On {
            info!(self.log, "powering on machine"; "machine_id" => %machine_id);
            self.power.ensure_powered_on(machine_id).await?;
            machine.power_state = PowerState::On;
            self.store.machine_save(&machine).await?;
        }
        Ok(machine)
    }

    /// Attach the machine to the network of `phase`.
    ///
    /// Returns the address the machine will boot with, if the network
    /// assigned one.
    pub async fn add_phase_network(
        &self,
        machine_id: MachineUuid,
        phase: NetworkPhase,
    ) -> Result<Option<IpAddr>, Error> {
        let log = self.log.new(o!(
            "machine_id" => machine_id.to_string(),
            "phase" => phase.kind().to_string(),
        ));
        let machine = self.powered_machine(machine_id).await?;
        let info = parse_driver_info(&machine)?;

        let binding = match info.local_link(0) {
            Ok(link) => Some(BindingContext {
                host_id: machine_id,
                local_links: vec![link.clone()],
            }),
            Err(_) => {
                debug!(log, "uplink 0 not inspected, creating unbound port");
                None
            }
        };
        let network_id = self.network_id(phase);
        let created = self
            .binder
            .create_port(
                network_id,
                binding.as_ref(),
                self.boot.dhcp_options(&machine),
            )
            .await?;

        let vnic = VnicRef::Slot(PHASE_VNIC_SLOT);
        let request = AddVnic {
            vnic: &vnic,
            mac: Some(created.mac),
            vlan: Some(created.segmentation_id),
            pxe: true,
            uplink: None,
        };
        if let Err(e) = self.vnics.add_vnic(&info, request).await {
            error!(log, "failed to add vNIC, removing virtual port";
                "vif_port_id" => &created.port_id,
                "error" => %e,
            );
            self.discard_virtual_port(&log, &created.port_id).await;
            return Err(e);
        }

        let mut port = Port::new(
            machine_id,
            created.mac,
            phase.attachment(PhaseAttachment {
                vif_port_id: created.port_id.clone(),
                seg_id: Some(created.segmentation_id),
                state: PhaseState::Up(vnic.clone()),
            }),
        );
        port.pxe_enabled = true;
        if let Err(e) = self.store.port_create(&port).await {
            error!(log, "failed to record port, undoing attachment";
                "error" => %e,
            );
            if let Err(e) = self.vnics.delete_vnic(&info, &vnic).await {
                error!(log, "failed to remove vNIC"; "error" => %e);
            }
            self.discard_virtual_port(&log, &created.port_id).await;
            return Err(e);
        }

        info!(log, "attached network";
            "network_id" => network_id,
            "vif_port_id" => &created.port_id,
            "seg_id" => created.segmentation_id,
        );
        Ok(created.fixed_ip)
    }

    /// Detach the machine from the network of `phase`.
    pub async fn remove_phase_network(
        &self,
        machine_id: MachineUuid,
        phase: NetworkPhase,
    ) -> Result<(), Error> {
        let log = self.log.new(o!(
            "machine_id" => machine_id.to_string(),
            "phase" => phase.kind().to_string(),
        ));
        let machine = self.powered_machine(machine_id).await?;
        let info = parse_driver_info(&machine)?;

        let ports: Vec<Port> = self
            .store
            .port_list_by_machine(machine_id)
            .await?
            .into_iter()
            .filter(|p| p.attachment.kind() == Some(phase.kind()))
            .collect();
        if ports.is_empty() {
            debug!(log, "no ports to detach");
            return Ok(());
        }

        let mut handle = self.vnics.open(machine_id).await?;
        for port in ports {
            self.tear_down_phase_port(&log, handle.as_mut(), &info, port)
                .await?;
        }
        Ok(())
    }

    async fn tear_down_phase_port(
        &self,
        log: &Logger,
        handle: &mut dyn HardwareHandle,
        info: &DriverInfo,
        mut port: Port,
    ) -> Result<(), Error> {
        let Some(phase) = port.attachment.phase().cloned() else {
            return Err(Error::internal_error(&format!(
                "port {} is not a provisioning or cleaning port",
                port.id
            )));
        };

        if let PhaseState::Up(vnic) = &phase.state {
            match self.vnics.delete_vnic_with(handle, info, vnic).await {
                Ok(())
                | Err(Error::ObjectNotFound {
                    type_name: ResourceType::Vnic, ..
                }) => (),
                Err(e) => return Err(e),
            }
            let down = PhaseAttachment { state: PhaseState::Down, ..phase.clone() };
            port.attachment = match port.attachment {
                PortAttachment::Deploy(_) => PortAttachment::Deploy(down),
                _ => PortAttachment::Clean(down),
            };
            self.store.port_save(&port).await?;
        }

        self.binder.delete_port(&phase.vif_port_id).await?;
        self.store.port_destroy(port.id).await?;
        info!(log, "detached network";
            "port_id" => %port.id,
            "vif_port_id" => &phase.vif_port_id,
        );
        Ok(())
    }

    async fn discard_virtual_port(&self, log: &Logger, port_id: &str) {
        if let Err(e) = self.binder.delete_port(port_id).await {
            error!(log, "failed to remove virtual port";
                "vif_port_id" => port_id,
                "error" => %e,
            );
        }
    }

    /// Prepare a machine to boot its deploy ramdisk.
    pub async fn prepare_deploy(
        &self,
        machine_id: MachineUuid,
    ) -> Result<ProvisionState, Error> {
        self.add_phase_network(machine_id, NetworkPhase::Provisioning).await?;
        Ok(ProvisionState::DeployWait)
    }

    pub async fn clean_up_deploy(
        &self,
        machine_id: MachineUuid,
    ) -> Result<(), Error> {
        self.remove_phase_network(machine_id, NetworkPhase::Provisioning).await
    }

    /// Attach the cleaning network and reboot into the cleaning ramdisk.
    pub async fn prepare_cleaning(
        &self,
        machine_id: MachineUuid,
    ) -> Result<ProvisionState, Error> {
        self.add_phase_network(machine_id, NetworkPhase::Cleaning).await?;
        self.power.reboot(machine_id).await?;
        Ok(ProvisionState::CleanWait)
    }

    pub async fn tear_down_cleaning(
        &self,
        machine_id: MachineUuid,
    ) -> Result<(), Error> {
        self.remove_phase_network(machine_id, NetworkPhase::Cleaning).await?;
        self.power.power_off(machine_id).await?;
        let mut machine = self.store.machine_get(machine_id).await?;
        machine.power_state = PowerState::Off;
        self.store.machine_save(&machine).await
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::fakes::FakeBootConfig;
    use crate::fakes::FakeInspector;
    use crate::fakes::FakePower;
    use crate::fakes::PowerAction;
    use crate::fakes::FAKE_BOOTFILE;
    use assert_matches::assert_matches;
    use ucs_db::InMemoryTopologyStore;
    use ucs_networking::fakes::FakeNetworkClient;
    use ucs_test_utils::dev::test_setup_log;
    use ucs_types::LocalLinkConnection;
    use ucs_types::MacAddr;
    use ucs_vnic::fakes::FakeHardware;

    pub const PROVISIONING_NET: &str = "provisioning-net";
    pub const CLEANING_NET: &str = "cleaning-net";

    pub struct Harness {
        pub store: Arc<InMemoryTopologyStore>,
        pub hardware: FakeHardware,
        pub network: Arc<FakeNetworkClient>,
        pub power: Arc<FakePower>,
        pub inspector: Arc<FakeInspector>,
        pub reconciler: Arc<LifecycleReconciler>,
    }

    impl Harness {
        pub fn new(log: &Logger, uplinks: u32) -> Harness {
            let store = Arc::new(InMemoryTopologyStore::new(log));
            let hardware = FakeHardware::new(uplinks);
            let network = Arc::new(FakeNetworkClient::new());
            network.add_network(PROVISIONING_NET, Some(100));
            network.add_network(CLEANING_NET, Some(200));
            let power = Arc::new(FakePower::new());
            let inspector = Arc::new(FakeInspector::new());
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
            Harness { store, hardware, network, power, inspector, reconciler }
        }

        /// Create an inspected machine with `uplinks` uplinks.
        pub async fn machine(
            &self,
            uplinks: u32,
            state: ProvisionState,
        ) -> MachineUuid {
            let mut machine = Machine::new(MachineUuid::new_v4(), state);
            let macs: Vec<MacAddr> =
                (0..uplinks).map(FakeHardware::uplink_mac).collect();
            machine.set_uplinks(&macs);
            for n in 0..uplinks {
                machine
                    .set_uplink_local_link(
                        n,
                        &LocalLinkConnection {
                            switch_id: "30:f7:0d:9c:a6:44".to_string(),
                            port_id: format!("Ethernet1/{}", n + 1),
                            switch_info: None,
                        },
                    )
                    .unwrap();
            }
            self.store.machine_create(&machine).await.unwrap();
            machine.id
        }
    }

    #[tokio::test]
    async fn test_add_provisioning_network() {
        let logctx = test_setup_log("test_add_provisioning_network");
        let harness = Harness::new(&logctx.log, 2);
        let machine = harness.machine(2, ProvisionState::Deploying).await;

        let ip = harness
            .reconciler
            .add_phase_network(machine, NetworkPhase::Provisioning)
            .await
            .unwrap();
        assert!(ip.is_some());
        assert_eq!(harness.power.calls(), vec![(machine, PowerAction::On)]);

        let creates = harness.network.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].network_id, PROVISIONING_NET);
        assert_eq!(creates[0].extra_dhcp_opts[0].opt_value, FAKE_BOOTFILE);
        let profile = creates[0].binding_profile.as_ref().unwrap();
        assert_eq!(profile.local_link_information[0].port_id, "Ethernet1/1");

        let slot = harness.hardware.slot(0).unwrap();
        assert_eq!(slot.vlan, Some(100));
        assert!(slot.pxe_boot);
        assert_eq!(slot.uplink_port, 0);

        let ports = harness.store.port_list_by_machine(machine).await.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(Some(ports[0].address), slot.mac);
        assert!(ports[0].pxe_enabled);
        assert_matches!(
            &ports[0].attachment,
            PortAttachment::Deploy(PhaseAttachment {
                seg_id: Some(100),
                state: PhaseState::Up(VnicRef::Slot(0)),
                ..
            })
        );

        // Already on: no second power action.
        harness
            .reconciler
            .remove_phase_network(machine, NetworkPhase::Provisioning)
            .await
            .unwrap();
        assert_eq!(harness.power.calls().len(), 1);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_add_phase_network_hardware_failure() {
        let logctx = test_setup_log("test_add_phase_network_hardware_failure");
        let harness = Harness::new(&logctx.log, 2);
        let machine = harness.machine(2, ProvisionState::Cleaning).await;
        harness.hardware.fail_slot(0, "117");

        let error = harness
            .reconciler
            .add_phase_network(machine, NetworkPhase::Cleaning)
            .await
            .unwrap_err();
        assert_matches!(error, Error::HardwareConfig { code, .. } if code == "117");

        let created = harness.network.creates();
        assert_eq!(created.len(), 1);
        assert!(harness.network.port_ids().is_empty());
        assert_eq!(harness.network.deletes().len(), 1);
        assert!(harness
            .store
            .port_list_by_machine(machine)
            .await
            .unwrap()
            .is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_add_phase_network_missing_config() {
        let logctx = test_setup_log("test_add_phase_network_missing_config");
        let harness = Harness::new(&logctx.log, 2);
        let machine = Machine::new(MachineUuid::new_v4(), ProvisionState::Deploying);
        harness.store.machine_create(&machine).await.unwrap();

        assert_matches!(
            harness
                .reconciler
                .add_phase_network(machine.id, NetworkPhase::Provisioning)
                .await,
            Err(Error::MissingConfig { .. })
        );
        assert!(harness.network.creates().is_empty());
        assert!(harness.hardware.writes().is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_remove_phase_network_is_reentrant() {
        let logctx = test_setup_log("test_remove_phase_network_is_reentrant");
        let harness = Harness::new(&logctx.log, 2);
        let machine = harness.machine(2, ProvisionState::Cleaning).await;
        harness
            .reconciler
            .add_phase_network(machine, NetworkPhase::Cleaning)
            .await
            .unwrap();
        let vif = harness.network.port_ids().pop().unwrap();

        // The virtual port can't be deleted: the vNIC is gone and the port
        // is recorded down.
        harness.network.fail_deletes("control plane unavailable");
        assert_matches!(
            harness
                .reconciler
                .remove_phase_network(machine, NetworkPhase::Cleaning)
                .await,
            Err(Error::NetworkBinding { .. })
        );
        let ports = harness.store.port_list_by_machine(machine).await.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(
            ports[0].attachment.phase().map(|p| &p.state),
            Some(&PhaseState::Down)
        );
        // Slot 0 is built in, so it was reset rather than removed.
        assert_eq!(harness.hardware.slot(0).unwrap().vlan, None);
        let writes = harness.hardware.writes().len();

        harness.network.heal();
        harness
            .reconciler
            .remove_phase_network(machine, NetworkPhase::Cleaning)
            .await
            .unwrap();
        assert!(!harness.network.port_exists(&vif));
        assert!(harness
            .store
            .port_list_by_machine(machine)
            .await
            .unwrap()
            .is_empty());
        // The retry did not touch the hardware.
        assert_eq!(harness.hardware.writes().len(), writes);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_cleaning_hooks() {
        let logctx = test_setup_log("test_cleaning_hooks");
        let harness = Harness::new(&logctx.log, 2);
        let machine = harness.machine(2, ProvisionState::Cleaning).await;

        assert_eq!(
            harness.reconciler.prepare_cleaning(machine).await.unwrap(),
            ProvisionState::CleanWait
        );
        harness.reconciler.tear_down_cleaning(machine).await.unwrap();
        assert_eq!(
            harness.power.calls(),
            vec![
                (machine, PowerAction::On),
                (machine, PowerAction::Reboot),
                (machine, PowerAction::Off),
            ]
        );
        let saved = harness.store.machine_get(machine).await.unwrap();
        assert_eq!(saved.power_state, PowerState::Off);
        logctx.cleanup_successful();
    }
}
