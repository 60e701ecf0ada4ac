// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only implementation of the management controller interface.

use crate::controller::vnic_dn;
use crate::hardware::HardwareError;
use crate::hardware::HardwareHandle;
use crate::hardware::HardwareSession;
use crate::hardware::Uplink;
use crate::hardware::VnicConfig;
use crate::hardware::WriteOutcome;
use crate::hardware::DEFAULT_MTU;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use ucs_common::typed_uuid::MachineUuid;
use ucs_types::MacAddr;

pub const FAKE_ADAPTER_DN: &str = "sys/rack-unit-1/adaptor-1";

struct FakeHardwareInner {
    uplinks: Vec<Uplink>,
    /// Interfaces currently configured, keyed by DN.
    vnics: BTreeMap<String, VnicConfig>,
    writes: Vec<VnicConfig>,
    removals: Vec<String>,
    write_failures: BTreeMap<String, String>,
    mac_failures: BTreeMap<MacAddr, String>,
    session_failure: Option<String>,
    open_sessions: usize,
    next_auto_mac: u64,
}

/// A fake management controller shared by every machine.
///
/// Starts with one built-in interface (`eth<n>`) per uplink.  Every write
/// and removal is recorded for later inspection.
#[derive(Clone)]
pub struct FakeHardware {
    inner: Arc<Mutex<FakeHardwareInner>>,
}

impl FakeHardware {
    pub fn new(uplinks: u32) -> FakeHardware {
        let mut vnics = BTreeMap::new();
        for n in 0..uplinks {
            let name = format!("eth{}", n);
            let dn = vnic_dn(FAKE_ADAPTER_DN, &name);
            vnics.insert(
                dn.clone(),
                VnicConfig {
                    dn,
                    name,
                    mtu: DEFAULT_MTU,
                    pxe_boot: false,
                    mac: Some(Self::builtin_mac(n)),
                    uplink_port: n,
                    vlan: None,
                },
            );
        }
        FakeHardware {
            inner: Arc::new(Mutex::new(FakeHardwareInner {
                uplinks: (0..uplinks)
                    .map(|n| Uplink { port_id: n, mac: Self::uplink_mac(n) })
                    .collect(),
                vnics,
                writes: vec![],
                removals: vec![],
                write_failures: BTreeMap::new(),
                mac_failures: BTreeMap::new(),
                session_failure: None,
                open_sessions: 0,
                next_auto_mac: 0x0025_b5ff_0000,
            })),
        }
    }

    /// Address of physical uplink `n`.
    pub fn uplink_mac(n: u32) -> MacAddr {
        MacAddr::from_u64(0x0025_b510_0000 + u64::from(n))
    }

    /// Address of built-in interface `eth<n>`.
    pub fn builtin_mac(n: u32) -> MacAddr {
        MacAddr::from_u64(0x0025_b520_0000 + u64::from(n))
    }

    /// Every configuration written, in order.
    pub fn writes(&self) -> Vec<VnicConfig> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// Every DN removed, in order.
    pub fn removals(&self) -> Vec<String> {
        self.inner.lock().unwrap().removals.clone()
    }

    /// Current configuration of the interface at `dn`.
    pub fn vnic(&self, dn: &str) -> Option<VnicConfig> {
        self.inner.lock().unwrap().vnics.get(dn).cloned()
    }

    /// Current configuration of `eth<slot>`.
    pub fn slot(&self, slot: u32) -> Option<VnicConfig> {
        self.vnic(&vnic_dn(FAKE_ADAPTER_DN, &format!("eth{}", slot)))
    }

    /// Make writes to `dn` report error `code`.
    pub fn fail_write(&self, dn: &str, code: &str) {
        self.inner
            .lock()
            .unwrap()
            .write_failures
            .insert(dn.to_string(), code.to_string());
    }

    /// Make writes to `eth<slot>` report error `code`.
    pub fn fail_slot(&self, slot: u32, code: &str) {
        self.fail_write(&vnic_dn(FAKE_ADAPTER_DN, &format!("eth{}", slot)), code);
    }

    /// Make writes carrying address `mac` report error `code`.
    pub fn fail_mac(&self, mac: MacAddr, code: &str) {
        self.inner.lock().unwrap().mac_failures.insert(mac, code.to_string());
    }

    pub fn fail_sessions(&self, message: &str) {
        self.inner.lock().unwrap().session_failure = Some(message.to_string());
    }

    /// Number of sessions opened and not yet released.
    pub fn open_sessions(&self) -> usize {
        self.inner.lock().unwrap().open_sessions
    }
}

#[async_trait]
impl HardwareSession for FakeHardware {
    async fn open(
        &self,
        machine: MachineUuid,
    ) -> Result<Box<dyn HardwareHandle>, HardwareError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.session_failure {
            return Err(HardwareError::Session {
                machine,
                message: message.clone(),
            });
        }
        inner.open_sessions += 1;
        Ok(Box::new(FakeHandle { inner: self.inner.clone() }))
    }
}

struct FakeHandle {
    inner: Arc<Mutex<FakeHardwareInner>>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.inner.lock().unwrap().open_sessions -= 1;
    }
}

#[async_trait]
impl HardwareHandle for FakeHandle {
    fn adapter_dn(&self) -> &str {
        FAKE_ADAPTER_DN
    }

    async fn write_vnic_config(
        &mut self,
        config: &VnicConfig,
    ) -> Result<WriteOutcome, HardwareError> {
        let mut inner = self.inner.lock().unwrap();
        inner.writes.push(config.clone());
        let failure = inner.write_failures.get(&config.dn).or_else(|| {
            config.mac.and_then(|mac| inner.mac_failures.get(&mac))
        });
        if let Some(code) = failure {
            return Ok(WriteOutcome {
                error_code: Some(code.clone()),
                assigned_mac: None,
            });
        }

        let mut stored = config.clone();
        let assigned_mac = match config.mac {
            Some(_) => None,
            None => {
                // Built-in interfaces keep their burned-in address.
                let existing =
                    inner.vnics.get(&config.dn).and_then(|v| v.mac);
                let mac = match existing {
                    Some(mac) if inner.is_builtin(&config.dn) => mac,
                    _ => {
                        inner.next_auto_mac += 1;
                        MacAddr::from_u64(inner.next_auto_mac)
                    }
                };
                stored.mac = Some(mac);
                Some(mac)
            }
        };
        inner.vnics.insert(config.dn.clone(), stored);
        Ok(WriteOutcome { error_code: None, assigned_mac })
    }

    async fn remove_vnic(&mut self, dn: &str) -> Result<(), HardwareError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.vnics.remove(dn).is_none() {
            return Err(HardwareError::NotFound { dn: dn.to_string() });
        }
        inner.removals.push(dn.to_string());
        Ok(())
    }

    async fn list_uplinks(&mut self) -> Result<Vec<Uplink>, HardwareError> {
        Ok(self.inner.lock().unwrap().uplinks.clone())
    }

    async fn vnic_mac(&mut self, dn: &str) -> Result<MacAddr, HardwareError> {
        self.inner
            .lock()
            .unwrap()
            .vnics
            .get(dn)
            .and_then(|v| v.mac)
            .ok_or_else(|| HardwareError::NotFound { dn: dn.to_string() })
    }
}

impl FakeHardwareInner {
    fn is_builtin(&self, dn: &str) -> bool {
        (0..self.uplinks.len()).any(|n| {
            vnic_dn(FAKE_ADAPTER_DN, &format!("eth{}", n)) == dn
        })
    }
}
