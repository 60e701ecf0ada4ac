// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task that watches machines under inspection and completes
//! their inspection once the inspection service is done with them

use super::BackgroundTask;
use crate::interfaces::InspectionStatus;
use crate::interfaces::LockMode;
use crate::interfaces::MachineLocker;
use crate::reconciler::LifecycleReconciler;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use ucs_common::api::Error;
use ucs_common::typed_uuid::MachineUuid;
use ucs_types::ProvisionState;

/// Polls the inspection service for every machine in `Inspecting`
///
/// Each machine is read under a shared lock.  The lock is upgraded only
/// once the service reports an error or completion; a machine whose lock
/// can't be had is left for the next activation.
pub struct InspectionMonitor {
    log: Logger,
    reconciler: Arc<LifecycleReconciler>,
    locks: Arc<dyn MachineLocker>,
}

#[derive(Debug, Default, Serialize)]
struct MonitorSummary {
    checked: usize,
    finished: usize,
    failed: usize,
    skipped: usize,
    error: Option<String>,
}

impl InspectionMonitor {
    pub fn new(
        log: &Logger,
        reconciler: Arc<LifecycleReconciler>,
        locks: Arc<dyn MachineLocker>,
    ) -> Self {
        InspectionMonitor {
            log: log.new(o!("component" => "InspectionMonitor")),
            reconciler,
            locks,
        }
    }

    async fn activate(&mut self) -> serde_json::Value {
        let mut summary = MonitorSummary::default();
        let store = self.reconciler.store();
        let machines = match store
            .machine_list_by_provision_state(ProvisionState::Inspecting)
            .await
        {
            Ok(machines) => machines,
            Err(e) => {
                warn!(self.log, "failed to list machines"; "error" => %e);
                summary.error = Some(e.to_string());
                return serde_json::json!(summary);
            }
        };

        for machine in machines {
            let machine_id = machine.id;
            let log = self.log.new(o!("machine_id" => machine_id.to_string()));

            let mut lock =
                match self.locks.acquire(machine_id, LockMode::Shared).await {
                    Ok(lock) => lock,
                    Err(e) => {
                        info!(log, "skipping machine"; "error" => %e);
                        summary.skipped += 1;
                        continue;
                    }
                };

            // The machine may have moved on since it was listed.
            match store.machine_get(machine_id).await {
                Ok(m) if m.provision_state == ProvisionState::Inspecting => (),
                Ok(m) => {
                    debug!(log, "machine no longer inspecting";
                        "provision_state" => %m.provision_state,
                    );
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    info!(log, "skipping machine"; "error" => %e);
                    summary.skipped += 1;
                    continue;
                }
            }
            summary.checked += 1;

            let status =
                match self.reconciler.inspector.get_status(machine_id).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(log, "failed to query inspection status";
                            "error" => %e,
                        );
                        summary.error = Some(e.to_string());
                        break;
                    }
                };
            if status.error.is_none() && !status.finished {
                continue;
            }

            if let Err(e) = lock.upgrade().await {
                warn!(log, "machine busy, will retry"; "error" => %e);
                summary.skipped += 1;
                continue;
            }
            match self.conclude(&log, machine_id, &status).await {
                Ok(ProvisionState::InspectFail) => summary.failed += 1,
                Ok(_) => summary.finished += 1,
                Err(e) => {
                    error!(log, "failed to complete inspection"; "error" => %e);
                }
            }
        }

        serde_json::json!(summary)
    }

    /// Move an inspected machine to its next state.
    async fn conclude(
        &self,
        log: &Logger,
        machine_id: MachineUuid,
        status: &InspectionStatus,
    ) -> Result<ProvisionState, Error> {
        let store = self.reconciler.store();
        let next = match &status.error {
            Some(message) => {
                error!(log, "inspection failed"; "error" => message);
                ProvisionState::InspectFail
            }
            None => {
                self.reconciler.finish_inspection(machine_id).await?;
                ProvisionState::Manageable
            }
        };
        let mut machine = store.machine_get(machine_id).await?;
        machine.provision_state = next;
        store.machine_save(&machine).await?;
        info!(log, "inspection complete"; "provision_state" => %next);
        Ok(next)
    }
}

impl BackgroundTask for InspectionMonitor {
    fn activate<'a>(&'a mut self) -> BoxFuture<'a, serde_json::Value> {
        self.activate().boxed()
    }
}
