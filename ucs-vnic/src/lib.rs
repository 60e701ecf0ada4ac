// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Management of virtual NICs on UCS rack servers

mod controller;
mod hardware;
pub mod uplink;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use controller::vnic_dn;
pub use controller::AddVnic;
pub use controller::VnicController;
pub use hardware::HardwareError;
pub use hardware::HardwareHandle;
pub use hardware::HardwareSession;
pub use hardware::Uplink;
pub use hardware::VnicConfig;
pub use hardware::WriteOutcome;
pub use hardware::DEFAULT_MTU;
pub use ucs_types::VnicRef;
