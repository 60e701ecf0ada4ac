// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task initialization

use super::Driver;
use super::InspectionMonitor;
use super::TaskHandle;
use crate::interfaces::MachineLocker;
use crate::reconciler::LifecycleReconciler;
use slog::Logger;
use std::sync::Arc;
use ucs_common::config::InspectionConfig;

/// Kick off all background tasks
///
/// Returns a `Driver` that can be used for inspecting background tasks and
/// their state, along with the inspection monitor's handle.
pub fn init(
    log: &Logger,
    config: &InspectionConfig,
    reconciler: Arc<LifecycleReconciler>,
    locks: Arc<dyn MachineLocker>,
) -> (Driver, TaskHandle) {
    let mut driver = Driver::new();

    // Background task: inspection monitor
    let monitor = InspectionMonitor::new(log, reconciler, locks);
    let handle = driver.register(
        "inspection_monitor".to_string(),
        "completes hardware inspections once the inspection service is done"
            .to_string(),
        config.status_check_period_secs,
        Box::new(monitor),
        log,
    );

    (driver, handle)
}
