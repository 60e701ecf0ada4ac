// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only implementations of the reconciler's collaborators.

use crate::interfaces::BootConfig;
use crate::interfaces::InspectionStatus;
use crate::interfaces::InspectorClient;
use crate::interfaces::LockMode;
use crate::interfaces::MachineLock;
use crate::interfaces::MachineLocker;
use crate::interfaces::PowerControl;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use ucs_common::api::Error;
use ucs_common::typed_uuid::MachineUuid;
use ucs_networking::DhcpOption;
use ucs_types::Machine;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerAction {
    On,
    Reboot,
    Off,
}

#[derive(Default)]
struct FakePowerInner {
    calls: Vec<(MachineUuid, PowerAction)>,
    failure: Option<String>,
}

/// Records power actions instead of taking them.
#[derive(Default)]
pub struct FakePower {
    inner: Mutex<FakePowerInner>,
}

impl FakePower {
    pub fn new() -> FakePower {
        FakePower::default()
    }

    pub fn calls(&self) -> Vec<(MachineUuid, PowerAction)> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn fail(&self, message: &str) {
        self.inner.lock().unwrap().failure = Some(message.to_string());
    }

    fn record(
        &self,
        machine: MachineUuid,
        action: PowerAction,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push((machine, action));
        match &inner.failure {
            Some(message) => Err(Error::internal_error(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PowerControl for FakePower {
    async fn ensure_powered_on(&self, machine: MachineUuid) -> Result<(), Error> {
        self.record(machine, PowerAction::On)
    }

    async fn reboot(&self, machine: MachineUuid) -> Result<(), Error> {
        self.record(machine, PowerAction::Reboot)
    }

    async fn power_off(&self, machine: MachineUuid) -> Result<(), Error> {
        self.record(machine, PowerAction::Off)
    }
}

#[derive(Default)]
struct LockTable {
    shared: BTreeMap<MachineUuid, usize>,
    exclusive: BTreeSet<MachineUuid>,
    /// Machines some other party is operating on.
    busy: BTreeSet<MachineUuid>,
}

/// An in-process lock table.
#[derive(Clone, Default)]
pub struct FakeLocks {
    inner: Arc<Mutex<LockTable>>,
}

impl FakeLocks {
    pub fn new() -> FakeLocks {
        FakeLocks::default()
    }

    /// Make every exclusive acquisition or upgrade on `machine` conflict.
    pub fn set_busy(&self, machine: MachineUuid, busy: bool) {
        let mut table = self.inner.lock().unwrap();
        if busy {
            table.busy.insert(machine);
        } else {
            table.busy.remove(&machine);
        }
    }

    /// Returns whether any lock on `machine` is held.
    pub fn is_locked(&self, machine: MachineUuid) -> bool {
        let table = self.inner.lock().unwrap();
        table.exclusive.contains(&machine)
            || table.shared.get(&machine).copied().unwrap_or(0) > 0
    }
}

#[async_trait]
impl MachineLocker for FakeLocks {
    async fn acquire(
        &self,
        machine: MachineUuid,
        mode: LockMode,
    ) -> Result<Box<dyn MachineLock>, Error> {
        let mut table = self.inner.lock().unwrap();
        if table.exclusive.contains(&machine) {
            return Err(Error::LockConflict { machine });
        }
        match mode {
            LockMode::Shared => {
                *table.shared.entry(machine).or_default() += 1;
            }
            LockMode::Exclusive => {
                let shared = table.shared.get(&machine).copied().unwrap_or(0);
                if shared > 0 || table.busy.contains(&machine) {
                    return Err(Error::LockConflict { machine });
                }
                table.exclusive.insert(machine);
            }
        }
        Ok(Box::new(FakeLock { table: self.inner.clone(), machine, mode }))
    }
}

struct FakeLock {
    table: Arc<Mutex<LockTable>>,
    machine: MachineUuid,
    mode: LockMode,
}

#[async_trait]
impl MachineLock for FakeLock {
    fn machine(&self) -> MachineUuid {
        self.machine
    }

    fn mode(&self) -> LockMode {
        self.mode
    }

    async fn upgrade(&mut self) -> Result<(), Error> {
        if self.mode == LockMode::Exclusive {
            return Ok(());
        }
        let mut table = self.table.lock().unwrap();
        let shared = table.shared.get(&self.machine).copied().unwrap_or(0);
        if shared > 1 || table.busy.contains(&self.machine) {
            return Err(Error::LockConflict { machine: self.machine });
        }
        table.shared.remove(&self.machine);
        table.exclusive.insert(self.machine);
        self.mode = LockMode::Exclusive;
        Ok(())
    }
}

impl Drop for FakeLock {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap();
        match self.mode {
            LockMode::Exclusive => {
                table.exclusive.remove(&self.machine);
            }
            LockMode::Shared => {
                if let Some(count) = table.shared.get_mut(&self.machine) {
                    *count -= 1;
                    if *count == 0 {
                        table.shared.remove(&self.machine);
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct FakeInspectorInner {
    started: Vec<MachineUuid>,
    statuses: BTreeMap<MachineUuid, InspectionStatus>,
    status_queries: usize,
    status_failure: Option<String>,
}

/// An inspection service whose results are set by the test.
#[derive(Default)]
pub struct FakeInspector {
    inner: Mutex<FakeInspectorInner>,
}

impl FakeInspector {
    pub fn new() -> FakeInspector {
        FakeInspector::default()
    }

    pub fn started(&self) -> Vec<MachineUuid> {
        self.inner.lock().unwrap().started.clone()
    }

    pub fn set_status(&self, machine: MachineUuid, status: InspectionStatus) {
        self.inner.lock().unwrap().statuses.insert(machine, status);
    }

    pub fn fail_status(&self, message: &str) {
        self.inner.lock().unwrap().status_failure = Some(message.to_string());
    }

    pub fn status_queries(&self) -> usize {
        self.inner.lock().unwrap().status_queries
    }
}

#[async_trait]
impl InspectorClient for FakeInspector {
    async fn start(&self, machine: MachineUuid) -> Result<(), Error> {
        self.inner.lock().unwrap().started.push(machine);
        Ok(())
    }

    async fn get_status(
        &self,
        machine: MachineUuid,
    ) -> Result<InspectionStatus, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.status_queries += 1;
        if let Some(message) = &inner.status_failure {
            return Err(Error::internal_error(message));
        }
        Ok(inner.statuses.get(&machine).cloned().unwrap_or_default())
    }
}

/// Hands out one fixed boot file option.
pub struct FakeBootConfig;

pub const FAKE_BOOTFILE: &str = "pxelinux.0";

impl BootConfig for FakeBootConfig {
    fn dhcp_options(&self, _machine: &Machine) -> Vec<DhcpOption> {
        vec![DhcpOption {
            opt_name: "bootfile-name".to_string(),
            opt_value: FAKE_BOOTFILE.to_string(),
        }]
    }
}
