// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning and cleaning network scenarios

use crate::common::ControlPlane;
use crate::common::PROVISIONING_NET;
use crate::common::PROVISIONING_SEG;
use assert_matches::assert_matches;
use ucs_common::api::Error;
use ucs_db::TopologyStore;
use ucs_reconciler::fakes::PowerAction;
use ucs_reconciler::NetworkPhase;
use ucs_test_utils::dev::test_setup_log;
use ucs_types::PhaseState;
use ucs_types::PortAttachment;
use ucs_types::PowerState;
use ucs_types::ProvisionState;
use ucs_types::VnicRef;

#[tokio::test]
async fn test_deploy_on_powered_off_machine() {
    let logctx = test_setup_log("test_deploy_on_powered_off_machine");
    let cp = ControlPlane::new(&logctx.log, 2);
    let machine = cp.enroll_cabled(2, ProvisionState::Deploying).await;
    assert_eq!(
        cp.store.machine_get(machine).await.unwrap().power_state,
        PowerState::Off
    );

    assert_eq!(
        cp.reconciler.prepare_deploy(machine).await.unwrap(),
        ProvisionState::DeployWait
    );
    assert_eq!(cp.power.calls(), vec![(machine, PowerAction::On)]);
    assert_eq!(
        cp.store.machine_get(machine).await.unwrap().power_state,
        PowerState::On
    );

    let creates = cp.network.creates();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].network_id, PROVISIONING_NET);

    let slot = cp.hardware.slot(0).unwrap();
    assert_eq!(slot.vlan, Some(PROVISIONING_SEG));
    assert!(slot.pxe_boot);

    let ports = cp.ports(machine).await;
    assert_eq!(ports.len(), 1);
    assert_matches!(
        &ports[0].attachment,
        PortAttachment::Deploy(phase)
            if phase.state == PhaseState::Up(VnicRef::Slot(0))
    );
    let record = ports[0].to_record();
    assert_eq!(record.extra["type"], "deploy");
    assert_eq!(record.extra["state"], "UP");
    assert_eq!(record.extra["vnic_id"], 0);

    cp.reconciler.clean_up_deploy(machine).await.unwrap();
    assert!(cp.ports(machine).await.is_empty());
    assert!(cp.network.port_ids().is_empty());
    assert_eq!(cp.hardware.slot(0).unwrap().vlan, None);
    assert_eq!(cp.hardware.open_sessions(), 0);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_deploy_hardware_failure_rolls_back() {
    let logctx = test_setup_log("test_deploy_hardware_failure_rolls_back");
    let cp = ControlPlane::new(&logctx.log, 2);
    let machine = cp.enroll_cabled(2, ProvisionState::Deploying).await;
    cp.hardware.fail_slot(0, "500");
    let before = cp.store.snapshot();

    assert_matches!(
        cp.reconciler.prepare_deploy(machine).await,
        Err(Error::HardwareConfig { code, .. }) if code == "500"
    );
    assert_eq!(cp.network.creates().len(), 1);
    assert!(cp.network.port_ids().is_empty());
    assert!(cp.ports(machine).await.is_empty());

    // Only the power state moved.
    let mut after = cp.store.snapshot();
    let mut expected = before;
    for snapshot in [&mut after, &mut expected] {
        for m in snapshot.machines.iter_mut() {
            m.power_state = PowerState::On;
        }
    }
    assert_eq!(after, expected);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_cleaning_round_trip() {
    let logctx = test_setup_log("test_cleaning_round_trip");
    let cp = ControlPlane::new(&logctx.log, 2);
    let machine = cp.enroll_cabled(2, ProvisionState::Cleaning).await;

    assert_eq!(
        cp.reconciler.prepare_cleaning(machine).await.unwrap(),
        ProvisionState::CleanWait
    );
    let ports = cp.ports(machine).await;
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].attachment.kind(), Some(NetworkPhase::Cleaning.kind()));
    assert_eq!(cp.hardware.slot(0).unwrap().vlan, Some(200));

    // The virtual port can't be deleted the first time around.
    cp.network.fail_deletes("control plane unavailable");
    assert_matches!(
        cp.reconciler.tear_down_cleaning(machine).await,
        Err(Error::NetworkBinding { .. })
    );
    assert_eq!(cp.ports(machine).await.len(), 1);
    cp.network.heal();
    cp.reconciler.tear_down_cleaning(machine).await.unwrap();

    assert!(cp.ports(machine).await.is_empty());
    assert!(cp.network.port_ids().is_empty());
    assert_eq!(
        cp.power.calls(),
        vec![
            (machine, PowerAction::On),
            (machine, PowerAction::Reboot),
            (machine, PowerAction::Off),
        ]
    );
    assert_eq!(
        cp.store.machine_get(machine).await.unwrap().power_state,
        PowerState::Off
    );
    logctx.cleanup_successful();
}
