// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application of port patches

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use slog::info;
use slog::o;
use slog::Logger;
use std::sync::Arc;
use ucs_common::api::Error;
use ucs_db::TopologyStore;
use ucs_types::MacAddr;

pub const LOCAL_LINK_PATH: &str = "/local_link_connection/";

/// One JSON-patch style operation on a port
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    pub value: Value,
}

impl PatchOp {
    pub fn add_local_link(key: &str, value: Value) -> PatchOp {
        PatchOp {
            op: "add".to_string(),
            path: format!("{}{}", LOCAL_LINK_PATH, key),
            value,
        }
    }
}

/// Applies patches to the port with a given address
#[async_trait]
pub trait PortPatcher: Send + Sync {
    async fn patch_port(
        &self,
        address: MacAddr,
        patches: &[PatchOp],
    ) -> Result<(), Error>;
}

/// Patches ports held in a [`TopologyStore`]
///
/// Only `add` and `replace` under `/local_link_connection/` are supported.
pub struct TopologyPortPatcher {
    log: Logger,
    store: Arc<dyn TopologyStore>,
}

impl TopologyPortPatcher {
    pub fn new(log: &Logger, store: Arc<dyn TopologyStore>) -> Self {
        TopologyPortPatcher {
            log: log.new(o!("component" => "TopologyPortPatcher")),
            store,
        }
    }
}

#[async_trait]
impl PortPatcher for TopologyPortPatcher {
    async fn patch_port(
        &self,
        address: MacAddr,
        patches: &[PatchOp],
    ) -> Result<(), Error> {
        let mut port = self.store.port_get_by_address(address).await?;
        for patch in patches {
            let key = patch
                .path
                .strip_prefix(LOCAL_LINK_PATH)
                .filter(|key| !key.is_empty() && !key.contains('/'))
                .ok_or_else(|| {
                    Error::internal_error(&format!(
                        "unsupported patch path {:?}",
                        patch.path
                    ))
                })?;
            match patch.op.as_str() {
                "add" | "replace" => {
                    port.local_link_connection
                        .insert(key.to_string(), patch.value.clone());
                }
                other => {
                    return Err(Error::internal_error(&format!(
                        "unsupported patch operation {:?}",
                        other
                    )))
                }
            }
        }
        self.store.port_save(&port).await?;
        info!(self.log, "patched port";
            "machine_id" => %port.machine_id,
            "port_id" => %port.id,
            "address" => %address,
        );
        Ok(())
    }
}
