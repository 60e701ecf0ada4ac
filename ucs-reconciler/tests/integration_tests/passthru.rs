// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attach and detach requests, from the request API and from the hypervisor

use crate::common::tenant_state;
use crate::common::ControlPlane;
use crate::common::TENANT_NET;
use assert_matches::assert_matches;
use std::time::Duration;
use ucs_common::api::Error;
use ucs_common::api::ResourceType;
use ucs_common::config::HypervisorConfig;
use ucs_db::TopologyStore;
use ucs_reconciler::AttachRequest;
use ucs_reconciler::Vif;
use ucs_reconciler::VifPlugger;
use ucs_test_utils::dev::test_setup_log;
use ucs_types::MacAddr;
use ucs_types::ProvisionState;
use ucs_types::TenantState;

#[tokio::test]
async fn test_attach_detach_leaves_no_trace() {
    let logctx = test_setup_log("test_attach_detach_leaves_no_trace");
    let cp = ControlPlane::new(&logctx.log, 2);
    let machine = cp.enroll_cabled(2, ProvisionState::Active).await;
    let other = cp.enroll_cabled(2, ProvisionState::Active).await;
    let before = cp.store.snapshot();

    let request = AttachRequest {
        mac: MacAddr::from_u64(0xfa16_3e00_4001),
        vif_port_id: "5b1c9a0e-vif".to_string(),
        vlan: Some(400),
        pxe: false,
    };

    // A busy machine rejects the request without recording anything.
    cp.locks.set_busy(machine, true);
    assert_matches!(
        cp.passthru.add_vnic(machine, request.clone()).await,
        Err(Error::LockConflict { .. })
    );
    cp.locks.set_busy(machine, false);

    // Requests against different machines proceed independently.
    let first = cp.passthru.add_vnic(machine, request.clone()).await.unwrap();
    let second = cp
        .passthru
        .add_vnic(
            other,
            AttachRequest {
                mac: MacAddr::from_u64(0xfa16_3e00_4002),
                ..request.clone()
            },
        )
        .await
        .unwrap();
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(cp.ports(machine).await.len(), 1);
    assert_eq!(cp.ports(other).await.len(), 1);

    assert_matches!(
        cp.passthru.delete_vnic(machine, "no-such-vif").await,
        Err(Error::ObjectNotFound { type_name: ResourceType::Port, .. })
    );
    let task = cp.passthru.delete_vnic(machine, "5b1c9a0e-vif").await.unwrap();
    task.await.unwrap().unwrap();
    let task = cp.passthru.delete_vnic(other, "5b1c9a0e-vif").await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(cp.store.snapshot(), before);
    assert!(!cp.locks.is_locked(machine));
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_hypervisor_plug() {
    let logctx = test_setup_log("test_hypervisor_plug");
    let cp = ControlPlane::new(&logctx.log, 2);
    let machine = cp.enroll_cabled(2, ProvisionState::Active).await;
    let plugger = VifPlugger::new(
        &logctx.log,
        HypervisorConfig {
            vnic_wait_interval_secs: Duration::from_millis(10),
            vnic_wait_timeout_secs: Duration::from_secs(10),
        },
        cp.passthru.clone(),
        cp.network.clone(),
        cp.store.clone(),
    );
    let vifs: Vec<_> = (1..=2)
        .map(|n| Vif {
            id: cp.network.add_port(TENANT_NET).id,
            network_id: TENANT_NET.to_string(),
            address: MacAddr::from_u64(0xfa16_3e00_5000 + n),
        })
        .collect();

    // Stands in for the conductor activating ports as they are recorded.
    let activate = async {
        let mut configured = 0;
        for _ in 0..1000 {
            let summary = cp
                .reconciler
                .configure_tenant_networks(machine)
                .await
                .unwrap();
            configured += summary.configured;
            if configured == vifs.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let (result, ()) =
        tokio::join!(plugger.plug_vifs(machine, &vifs), activate);
    result.unwrap();

    let states: Vec<_> =
        cp.ports(machine).await.iter().map(tenant_state).collect();
    assert_eq!(
        states,
        vec![TenantState::Up { vnic_id: 0 }, TenantState::Up { vnic_id: 1 }]
    );
    logctx.cleanup_successful();
}
