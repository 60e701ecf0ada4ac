// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Switch port discovery from LLDP data gathered during inspection
//!
//! The inspection ramdisk reports, per interface, the raw TLVs received from
//! the neighboring switch.  [`LldpHook`] decodes them into a
//! `local_link_connection` and patches it onto the port with the
//! interface's MAC address.

mod hook;
mod patcher;
pub mod tlv;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use hook::InspectionData;
pub use hook::InterfaceInfo;
pub use hook::Inventory;
pub use hook::LldpHook;
pub use patcher::PatchOp;
pub use patcher::PortPatcher;
pub use patcher::TopologyPortPatcher;
