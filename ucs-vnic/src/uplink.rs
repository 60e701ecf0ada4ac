// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Uplink selection and bond member addressing

use std::num::NonZeroU32;
use ucs_types::MacAddr;

/// Returns the uplink a vNIC in `slot` is pinned to.
///
/// Slots are spread round-robin across the uplinks.
pub fn next_uplink(slot: u32, uplinks: NonZeroU32) -> u32 {
    slot % uplinks.get()
}

/// Derive the address of member `member_index` of a new bond.
///
/// On a machine with `uplinks` uplinks, bond block `group_index` is the
/// `uplinks` addresses starting `1 + group_index * uplinks` above
/// `base_uplink_mac`.  Distinct blocks never overlap, so two bonds holding
/// different blocks never share a member address.  The result is always a
/// unicast, locally administered address.
///
/// Callers pick `group_index` under the lock that serializes portgroup
/// creation for the machine.
pub fn derive_bond_member_mac(
    base_uplink_mac: MacAddr,
    uplinks: NonZeroU32,
    group_index: u32,
    member_index: u32,
) -> MacAddr {
    let offset = 1
        + u64::from(group_index) * u64::from(uplinks.get())
        + u64::from(member_index);
    let value = (base_uplink_mac.to_u64() + offset) % MacAddr::SPACE;
    let mut octets = MacAddr::from_u64(value).0.into_array();
    // locally administered, unicast
    octets[0] = (octets[0] | 0x02) & !0x01;
    MacAddr(octets.into())
}
