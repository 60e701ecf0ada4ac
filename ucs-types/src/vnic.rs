// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Longest interface name the hardware accepts.
pub const VNIC_NAME_MAX_LEN: usize = 31;

/// How a vNIC is addressed on the hardware
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum VnicRef {
    /// A numbered slot, named `eth<slot>`.
    Slot(u32),
    /// An explicitly named vNIC (legacy provisioning ports use their virtual
    /// port id).
    Named(String),
}

impl VnicRef {
    /// Returns the interface name as the hardware knows it.
    pub fn interface_name(&self) -> String {
        match self {
            VnicRef::Slot(slot) => format!("eth{}", slot),
            VnicRef::Named(name) => {
                name.chars().take(VNIC_NAME_MAX_LEN).collect()
            }
        }
    }

    pub fn slot(&self) -> Option<u32> {
        match self {
            VnicRef::Slot(slot) => Some(*slot),
            VnicRef::Named(_) => None,
        }
    }
}

impl fmt::Display for VnicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.interface_name())
    }
}
