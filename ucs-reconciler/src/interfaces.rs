// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the collaborators the reconciler drives but does not own

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use ucs_common::api::Error;
use ucs_common::typed_uuid::MachineUuid;
use ucs_networking::DhcpOption;
use ucs_types::Machine;

/// Power control of a machine's baseboard
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Power the machine on, returning once it is confirmed on.
    async fn ensure_powered_on(&self, machine: MachineUuid) -> Result<(), Error>;

    async fn reboot(&self, machine: MachineUuid) -> Result<(), Error>;

    async fn power_off(&self, machine: MachineUuid) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Per-machine advisory locks
///
/// Acquisition never waits: a busy machine is reported as
/// [`Error::LockConflict`].
#[async_trait]
pub trait MachineLocker: Send + Sync {
    async fn acquire(
        &self,
        machine: MachineUuid,
        mode: LockMode,
    ) -> Result<Box<dyn MachineLock>, Error>;
}

/// A held lock.  Released when dropped.
#[async_trait]
pub trait MachineLock: Send + Sync {
    fn machine(&self) -> MachineUuid;

    fn mode(&self) -> LockMode;

    /// Convert a shared lock into an exclusive one.
    async fn upgrade(&mut self) -> Result<(), Error>;
}

/// Progress of an inspection as reported by the inspection service
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InspectionStatus {
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait InspectorClient: Send + Sync {
    async fn start(&self, machine: MachineUuid) -> Result<(), Error>;

    async fn get_status(
        &self,
        machine: MachineUuid,
    ) -> Result<InspectionStatus, Error>;
}

/// PXE boot configuration
///
/// Supplies the DHCP options a machine needs to network boot its ramdisk
/// from a provisioning or cleaning port.
pub trait BootConfig: Send + Sync {
    fn dhcp_options(&self, machine: &Machine) -> Vec<DhcpOption>;
}
