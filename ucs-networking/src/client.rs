// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the virtual network control plane
//!
//! Request and response bodies follow the Neutron port and network
//! resources, including the `binding:` extension attributes.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;
use thiserror::Error;
use ucs_types::LocalLinkConnection;
use ucs_types::MacAddr;

pub const VNIC_TYPE_BAREMETAL: &str = "baremetal";
pub const DEVICE_OWNER_BAREMETAL: &str = "baremetal:none";

/// One DHCP option handed out with a port's address
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DhcpOption {
    pub opt_name: String,
    pub opt_value: String,
}

/// Where a port is physically realized
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BindingProfile {
    pub local_link_information: Vec<LocalLinkConnection>,
}

/// Body of a port create request
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortCreate {
    pub network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_owner: Option<String>,
    #[serde(
        rename = "binding:host_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub binding_host_id: Option<String>,
    #[serde(
        rename = "binding:vnic_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub binding_vnic_type: Option<String>,
    #[serde(
        rename = "binding:profile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub binding_profile: Option<BindingProfile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_dhcp_opts: Vec<DhcpOption>,
}

/// Body of a port update that binds it to a bare-metal machine
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortBindingUpdate {
    pub admin_state_up: bool,
    pub device_owner: String,
    #[serde(rename = "binding:host_id")]
    pub binding_host_id: String,
    #[serde(rename = "binding:vnic_type")]
    pub binding_vnic_type: String,
    #[serde(rename = "binding:profile")]
    pub binding_profile: BindingProfile,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: IpAddr,
}

/// A port as returned by the control plane
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VirtualPort {
    pub id: String,
    pub network_id: String,
    pub mac_address: MacAddr,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

/// A network as returned by the control plane
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Network {
    pub id: String,
    #[serde(rename = "provider:segmentation_id", default)]
    pub segmentation_id: Option<u32>,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NetworkClientError {
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },
    #[error("request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn create_port(
        &self,
        spec: &PortCreate,
    ) -> Result<VirtualPort, NetworkClientError>;

    async fn delete_port(&self, id: &str) -> Result<(), NetworkClientError>;

    async fn update_port(
        &self,
        id: &str,
        spec: &PortBindingUpdate,
    ) -> Result<VirtualPort, NetworkClientError>;

    async fn show_network(
        &self,
        id: &str,
    ) -> Result<Network, NetworkClientError>;
}
