// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware inspection, from the first vNIC to a deployable machine

use crate::common::switch_port;
use crate::common::ControlPlane;
use crate::common::PROVISIONING_SEG;
use crate::common::SWITCH_ID;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use ucs_common::config::InspectionConfig;
use ucs_common::typed_uuid::MachineUuid;
use ucs_db::TopologyStore;
use ucs_lldp::tlv::TLV_TYPE_CHASSIS_ID;
use ucs_lldp::tlv::TLV_TYPE_PORT_ID;
use ucs_lldp::tlv::TLV_TYPE_SYSTEM_NAME;
use ucs_lldp::InspectionData;
use ucs_lldp::InterfaceInfo;
use ucs_lldp::Inventory;
use ucs_lldp::LldpHook;
use ucs_lldp::TopologyPortPatcher;
use ucs_reconciler::background;
use ucs_reconciler::background::ActivationReason;
use ucs_reconciler::background::Driver;
use ucs_reconciler::background::InspectionMonitor;
use ucs_reconciler::background::LastResultCompleted;
use ucs_reconciler::background::TaskHandle;
use ucs_reconciler::InspectionStatus;
use ucs_test_utils::dev::test_setup_log;
use ucs_types::parse_driver_info;
use ucs_types::PortAttachment;
use ucs_types::ProvisionState;
use ucs_vnic::fakes::FakeHardware;

const MONITOR_PERIOD: Duration = Duration::from_secs(60);

/// LLDP as a ramdisk would report it for each built-in interface: the
/// chassis MAC, the switch port name and the switch's system name.
fn lldp_report(uplinks: u32) -> InspectionData {
    let mut lldp_info = BTreeMap::new();
    let mut interfaces = BTreeMap::new();
    for n in 0..uplinks {
        let ifname = format!("eth{}", n);
        let port_name = switch_port(n).port_id;
        let chassis = SWITCH_ID.replace(':', "");
        lldp_info.insert(
            ifname.clone(),
            vec![
                (TLV_TYPE_CHASSIS_ID, format!("04{}", chassis)),
                (TLV_TYPE_PORT_ID, format!("05{}", hex(&port_name))),
                (TLV_TYPE_SYSTEM_NAME, hex("sw-lab-n3k-2")),
            ],
        );
        interfaces.insert(
            ifname,
            InterfaceInfo { mac: FakeHardware::builtin_mac(n), ip: None },
        );
    }
    InspectionData { inventory: Inventory { lldp_info }, interfaces }
}

fn hex(s: &str) -> String {
    s.bytes().map(|b| format!("{:02x}", b)).collect()
}

async fn wait_for_iteration(
    driver: &Driver,
    task: &TaskHandle,
    iteration: u64,
) -> LastResultCompleted {
    for _ in 0..300 {
        if let Some(last) = driver.task_status(task).last.completion() {
            if last.iteration == iteration {
                return last.clone();
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("monitor never reached iteration {}", iteration);
}

async fn provision_state(
    cp: &ControlPlane,
    id: MachineUuid,
) -> ProvisionState {
    cp.store.machine_get(id).await.unwrap().provision_state
}

#[tokio::test(start_paused = true)]
async fn test_inspection_lifecycle() {
    let logctx = test_setup_log("test_inspection_lifecycle");
    let log = &logctx.log;
    let cp = ControlPlane::new(log, 2);
    let machine = cp.enroll(2, ProvisionState::Inspecting).await;

    assert_eq!(
        cp.reconciler.inspect_hardware(machine).await.unwrap(),
        ProvisionState::Inspecting
    );
    let ports = cp.ports(machine).await;
    assert_eq!(ports.len(), 2);
    for (n, port) in (0..).zip(&ports) {
        assert_eq!(port.address, FakeHardware::builtin_mac(n));
        assert_eq!(
            port.attachment,
            PortAttachment::Inspect { vnic_id: n, uplink: n }
        );
        let slot = cp.hardware.slot(n).unwrap();
        assert_eq!(slot.vlan, Some(PROVISIONING_SEG));
        assert!(slot.pxe_boot);
    }
    // Inspection boots without a virtual port.
    assert!(cp.network.creates().is_empty());

    let (driver, monitor) = background::init(
        log,
        &InspectionConfig { status_check_period_secs: MONITOR_PERIOD },
        cp.reconciler.clone(),
        Arc::new(cp.locks.clone()),
    );
    assert_eq!(driver.task_period(&monitor), MONITOR_PERIOD);

    // The ramdisk is still running.
    let last = wait_for_iteration(&driver, &monitor, 1).await;
    assert_eq!(last.details["checked"], 1);
    assert_eq!(last.details["finished"], 0);
    assert_eq!(provision_state(&cp, machine).await, ProvisionState::Inspecting);

    // The ramdisk reports back, then the service declares it done.
    let hook = LldpHook::new(
        log,
        Arc::new(TopologyPortPatcher::new(log, cp.store.clone())),
    );
    assert_eq!(hook.before_update(&lldp_report(2)).await.unwrap(), 2);
    cp.inspector.set_status(
        machine,
        InspectionStatus { finished: true, error: None },
    );

    let last = wait_for_iteration(&driver, &monitor, 2).await;
    assert_eq!(last.reason, ActivationReason::Timeout);
    assert_eq!(last.details["finished"], 1);
    assert_eq!(provision_state(&cp, machine).await, ProvisionState::Manageable);
    assert!(cp.ports(machine).await.is_empty());
    assert_eq!(cp.hardware.slot(0).unwrap().vlan, None);
    assert_eq!(cp.inspector.started(), vec![machine]);

    // The machine can now be deployed through the switch ports LLDP found.
    let record = cp.store.machine_get(machine).await.unwrap();
    let info = parse_driver_info(&record).unwrap();
    let link = info.local_link(1).unwrap();
    assert_eq!(link.switch_id, FakeHardware::builtin_mac(1).to_string());
    assert_eq!(link.port_id, "Ethernet1/2");
    let switch_info = link.switch_info.as_deref().unwrap();
    assert!(switch_info.contains("sw-lab-n3k-2"));
    assert!(switch_info.contains(SWITCH_ID));

    cp.reconciler.prepare_deploy(machine).await.unwrap();
    let creates = cp.network.creates();
    let profile = creates[0].binding_profile.as_ref().unwrap();
    assert_eq!(profile.local_link_information[0].port_id, "Ethernet1/1");

    drop(driver);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_inspection_failure_keeps_ports() {
    let logctx = test_setup_log("test_inspection_failure_keeps_ports");
    let log = &logctx.log;
    let cp = ControlPlane::new(log, 2);
    let machine = cp.enroll(2, ProvisionState::Inspecting).await;
    cp.reconciler.inspect_hardware(machine).await.unwrap();
    cp.inspector.set_status(
        machine,
        InspectionStatus {
            finished: false,
            error: Some("no LLDP data received".to_string()),
        },
    );

    let mut driver = Driver::new();
    let monitor = driver.register(
        "inspection_monitor".to_string(),
        "completes inspections reported by the inspection service"
            .to_string(),
        MONITOR_PERIOD,
        Box::new(InspectionMonitor::new(
            log,
            cp.reconciler.clone(),
            Arc::new(cp.locks.clone()),
        )),
        log,
    );
    let last = wait_for_iteration(&driver, &monitor, 1).await;
    assert_eq!(last.details["failed"], 1);
    assert_eq!(
        provision_state(&cp, machine).await,
        ProvisionState::InspectFail
    );
    assert_eq!(cp.ports(machine).await.len(), 2);

    drop(driver);
    logctx.cleanup_successful();
}
