// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::patcher::PatchOp;
use crate::patcher::PortPatcher;
use async_trait::async_trait;
use std::sync::Mutex;
use ucs_common::api::Error;
use ucs_types::MacAddr;

/// Records every patch instead of applying it
#[derive(Default)]
pub struct FakePortPatcher {
    calls: Mutex<Vec<(MacAddr, Vec<PatchOp>)>>,
}

impl FakePortPatcher {
    pub fn new() -> FakePortPatcher {
        FakePortPatcher::default()
    }

    pub fn calls(&self) -> Vec<(MacAddr, Vec<PatchOp>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortPatcher for FakePortPatcher {
    async fn patch_port(
        &self,
        address: MacAddr,
        patches: &[PatchOp],
    ) -> Result<(), Error> {
        self.calls.lock().unwrap().push((address, patches.to_vec()));
        Ok(())
    }
}
