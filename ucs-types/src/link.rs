// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Identity of the switch port a physical uplink is cabled to
///
/// Discovered from LLDP during inspection and attached to virtual port
/// binding profiles as `local_link_information`.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
pub struct LocalLinkConnection {
    pub switch_id: String,
    pub port_id: String,
    /// JSON-encoded switch metadata (system name, management address, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_info: Option<String>,
}

impl LocalLinkConnection {
    /// Decode a connection from a stored JSON value.
    ///
    /// Older records hold the whole object as a JSON-encoded string, so both
    /// forms are accepted.
    pub fn from_value(
        value: &serde_json::Value,
    ) -> Result<LocalLinkConnection, serde_json::Error> {
        match value {
            serde_json::Value::String(s) => serde_json::from_str(s),
            other => serde_json::from_value(other.clone()),
        }
    }
}
