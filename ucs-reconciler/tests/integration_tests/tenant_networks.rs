// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tenant network activation scenarios

use crate::common::tenant_state;
use crate::common::ControlPlane;
use crate::common::TENANT_NET;
use crate::common::TENANT_SEG;
use std::collections::BTreeSet;
use ucs_db::TopologyStore;
use ucs_reconciler::AttachRequest;
use ucs_reconciler::TenantSummary;
use ucs_test_utils::dev::test_setup_log;
use ucs_types::BondMode;
use ucs_types::MacAddr;
use ucs_types::ProvisionState;
use ucs_types::TenantState;

fn request(cp: &ControlPlane, n: u64) -> AttachRequest {
    AttachRequest {
        mac: MacAddr::from_u64(0xfa16_3e00_3000 + n),
        vif_port_id: cp.network.add_port(TENANT_NET).id,
        vlan: Some(TENANT_SEG),
        pxe: false,
    }
}

#[tokio::test]
async fn test_bulk_configure_isolates_failures() {
    let logctx = test_setup_log("test_bulk_configure_isolates_failures");
    let cp = ControlPlane::new(&logctx.log, 2);
    let machine = cp.enroll_cabled(2, ProvisionState::Active).await;
    let requests: Vec<_> = (1..=3).map(|n| request(&cp, n)).collect();
    for r in &requests {
        cp.passthru.request_attach(machine, r).await.unwrap();
    }
    cp.hardware.fail_mac(requests[1].mac, "117");

    let summary =
        cp.reconciler.configure_tenant_networks(machine).await.unwrap();
    assert_eq!(summary, TenantSummary { configured: 2, failed: 1 });

    let port = |n: usize| {
        let address = requests[n].mac;
        let store = cp.store.clone();
        async move { store.port_get_by_address(address).await.unwrap() }
    };
    assert_eq!(tenant_state(&port(0).await), TenantState::Up { vnic_id: 0 });
    assert_eq!(tenant_state(&port(1).await), TenantState::Error);
    assert_eq!(tenant_state(&port(2).await), TenantState::Up { vnic_id: 1 });
    assert_eq!(
        port(1).await.to_record().extra["vnic_id"],
        serde_json::Value::Null
    );

    // Only the two good ports were bound, each to its own uplink.
    let updates = cp.network.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].0, requests[0].vif_port_id);
    assert_eq!(updates[1].0, requests[2].vif_port_id);
    assert_eq!(cp.hardware.slot(1).unwrap().mac, Some(requests[2].mac));
    assert_eq!(cp.hardware.open_sessions(), 0);

    // Failed ports are left for an operator; the pass doesn't retry them.
    let summary =
        cp.reconciler.configure_tenant_networks(machine).await.unwrap();
    assert_eq!(summary, TenantSummary::default());

    cp.reconciler.unconfigure_tenant_networks(machine).await.unwrap();
    let states: Vec<_> =
        cp.ports(machine).await.iter().map(tenant_state).collect();
    assert_eq!(
        states,
        vec![TenantState::Down, TenantState::Error, TenantState::Down]
    );
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_bonded_attach_and_configure() {
    let logctx = test_setup_log("test_bonded_attach_and_configure");
    let cp = ControlPlane::new(&logctx.log, 2);
    let machine = cp.enroll_cabled(2, ProvisionState::Active).await;
    let mut record = cp.store.machine_get(machine).await.unwrap();
    record.set_vpc(true);
    cp.store.machine_save(&record).await.unwrap();

    let r = request(&cp, 1);
    cp.passthru.request_attach(machine, &r).await.unwrap();
    let groups = cp.store.portgroup_list_by_machine(machine).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].mode, BondMode::Primary);
    assert_eq!(groups[0].to_record().extra["mode"], 4);

    let members = cp.store.port_list_by_portgroup(groups[0].id).await.unwrap();
    assert_eq!(members.len(), 2);
    let macs: BTreeSet<_> = members.iter().map(|p| p.address).collect();
    assert_eq!(macs.len(), 2);
    assert!(members.iter().all(|p| tenant_state(p) == TenantState::Down));

    let summary =
        cp.reconciler.configure_tenant_networks(machine).await.unwrap();
    assert_eq!(summary, TenantSummary { configured: 2, failed: 0 });
    // Members of the primary bond carry untagged traffic.
    assert_eq!(cp.hardware.slot(0).unwrap().vlan, None);
    assert_eq!(cp.hardware.slot(1).unwrap().uplink_port, 1);

    // The bond is bound once, through both switch ports.
    let updates = cp.network.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, r.vif_port_id);
    assert_eq!(updates[0].1.binding_profile.local_link_information.len(), 2);

    cp.reconciler.unconfigure_tenant_networks(machine).await.unwrap();
    assert!(cp.ports(machine).await.is_empty());
    assert!(cp
        .store
        .portgroup_list_by_machine(machine)
        .await
        .unwrap()
        .is_empty());
    logctx.cleanup_successful();
}
