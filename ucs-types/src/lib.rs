// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Machine, port and portgroup model shared by the vNIC lifecycle crates
//!
//! Ports and portgroups are persisted as generic records with a free-form
//! attribute bag ([`PortRecord`], [`PortgroupRecord`]).  Everything above the
//! topology store works with the typed views ([`Port`], [`Portgroup`]),
//! which are converted at an explicit boundary so that malformed bags are
//! rejected once instead of being re-checked by convention everywhere.

mod link;
mod mac;
mod machine;
mod port;
mod portgroup;
mod vnic;

pub use link::LocalLinkConnection;
pub use mac::MacAddr;
pub use machine::*;
pub use port::*;
pub use portgroup::*;
pub use vnic::VnicRef;
pub use vnic::VNIC_NAME_MAX_LEN;
