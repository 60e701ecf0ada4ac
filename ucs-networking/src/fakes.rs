// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only implementation of the virtual network client.

use crate::client::FixedIp;
use crate::client::Network;
use crate::client::NetworkClient;
use crate::client::NetworkClientError;
use crate::client::PortBindingUpdate;
use crate::client::PortCreate;
use crate::client::VirtualPort;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use ucs_types::MacAddr;

#[derive(Default)]
struct FakeNetworkClientInner {
    networks: BTreeMap<String, Option<u32>>,
    ports: BTreeMap<String, VirtualPort>,
    next_port: u64,
    creates: Vec<PortCreate>,
    deletes: Vec<String>,
    updates: Vec<(String, PortBindingUpdate)>,
    create_failure: Option<String>,
    delete_failure: Option<String>,
    update_failure: Option<String>,
}

/// A fake control plane.
///
/// In lieu of any networked requests, keeps ports in memory and records
/// every request for later inspection.
#[derive(Default)]
pub struct FakeNetworkClient {
    inner: Mutex<FakeNetworkClientInner>,
}

impl FakeNetworkClient {
    pub fn new() -> FakeNetworkClient {
        FakeNetworkClient::default()
    }

    pub fn add_network(&self, id: &str, segmentation_id: Option<u32>) {
        self.inner
            .lock()
            .unwrap()
            .networks
            .insert(id.to_string(), segmentation_id);
    }

    /// Create a port directly, as some other agent would.
    pub fn add_port(&self, network_id: &str) -> VirtualPort {
        self.inner.lock().unwrap().new_port(network_id)
    }

    pub fn port_exists(&self, id: &str) -> bool {
        self.inner.lock().unwrap().ports.contains_key(id)
    }

    pub fn port_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().ports.keys().cloned().collect()
    }

    pub fn creates(&self) -> Vec<PortCreate> {
        self.inner.lock().unwrap().creates.clone()
    }

    /// Every delete attempted, including ones for absent ports.
    pub fn deletes(&self) -> Vec<String> {
        self.inner.lock().unwrap().deletes.clone()
    }

    pub fn updates(&self) -> Vec<(String, PortBindingUpdate)> {
        self.inner.lock().unwrap().updates.clone()
    }

    pub fn fail_creates(&self, message: &str) {
        self.inner.lock().unwrap().create_failure = Some(message.to_string());
    }

    pub fn fail_deletes(&self, message: &str) {
        self.inner.lock().unwrap().delete_failure = Some(message.to_string());
    }

    pub fn fail_updates(&self, message: &str) {
        self.inner.lock().unwrap().update_failure = Some(message.to_string());
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.create_failure = None;
        inner.delete_failure = None;
        inner.update_failure = None;
    }
}

impl FakeNetworkClientInner {
    fn new_port(&mut self, network_id: &str) -> VirtualPort {
        self.next_port += 1;
        let n = self.next_port;
        let port = VirtualPort {
            id: format!("port-{}", n),
            network_id: network_id.to_string(),
            mac_address: MacAddr::from_u64(0xfa16_3e00_0000 + n),
            fixed_ips: vec![FixedIp {
                subnet_id: format!("{}-subnet", network_id),
                ip_address: IpAddr::V4(Ipv4Addr::new(
                    10,
                    0,
                    (n / 250) as u8,
                    (n % 250) as u8 + 2,
                )),
            }],
        };
        self.ports.insert(port.id.clone(), port.clone());
        port
    }
}

#[async_trait]
impl NetworkClient for FakeNetworkClient {
    async fn create_port(
        &self,
        spec: &PortCreate,
    ) -> Result<VirtualPort, NetworkClientError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.create_failure {
            return Err(NetworkClientError::Request(message.clone()));
        }
        if !inner.networks.contains_key(&spec.network_id) {
            return Err(NetworkClientError::NotFound {
                resource: "network",
                id: spec.network_id.clone(),
            });
        }
        inner.creates.push(spec.clone());
        Ok(inner.new_port(&spec.network_id))
    }

    async fn delete_port(&self, id: &str) -> Result<(), NetworkClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.deletes.push(id.to_string());
        if let Some(message) = &inner.delete_failure {
            return Err(NetworkClientError::Request(message.clone()));
        }
        match inner.ports.remove(id) {
            Some(_) => Ok(()),
            None => Err(NetworkClientError::NotFound {
                resource: "port",
                id: id.to_string(),
            }),
        }
    }

    async fn update_port(
        &self,
        id: &str,
        spec: &PortBindingUpdate,
    ) -> Result<VirtualPort, NetworkClientError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.update_failure {
            return Err(NetworkClientError::Request(message.clone()));
        }
        let port = inner.ports.get(id).cloned().ok_or_else(|| {
            NetworkClientError::NotFound { resource: "port", id: id.to_string() }
        })?;
        inner.updates.push((id.to_string(), spec.clone()));
        Ok(port)
    }

    async fn show_network(
        &self,
        id: &str,
    ) -> Result<Network, NetworkClientError> {
        let inner = self.inner.lock().unwrap();
        match inner.networks.get(id) {
            Some(segmentation_id) => Ok(Network {
                id: id.to_string(),
                segmentation_id: *segmentation_id,
            }),
            None => Err(NetworkClientError::NotFound {
                resource: "network",
                id: id.to_string(),
            }),
        }
    }
}
