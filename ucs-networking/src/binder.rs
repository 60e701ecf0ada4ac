// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual port lifecycle for bare-metal attachments

use crate::client::BindingProfile;
use crate::client::DhcpOption;
use crate::client::NetworkClient;
use crate::client::NetworkClientError;
use crate::client::PortBindingUpdate;
use crate::client::PortCreate;
use crate::client::DEVICE_OWNER_BAREMETAL;
use crate::client::VNIC_TYPE_BAREMETAL;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use std::net::IpAddr;
use std::sync::Arc;
use ucs_common::api::Error;
use ucs_common::typed_uuid::MachineUuid;
use ucs_types::LocalLinkConnection;
use ucs_types::MacAddr;

/// Physical realization of a port on a machine
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindingContext {
    pub host_id: MachineUuid,
    /// One entry per switch port.  More than one only for bonds.
    pub local_links: Vec<LocalLinkConnection>,
}

/// Result of [`VirtualPortBinder::create_port`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedPort {
    pub port_id: String,
    pub mac: MacAddr,
    pub fixed_ip: Option<IpAddr>,
    pub segmentation_id: u32,
}

/// Creates, binds and removes virtual network ports
///
/// Holds no state.  Every failure is reported as
/// [`Error::NetworkBinding`], except that deleting a port that is already
/// gone succeeds.
pub struct VirtualPortBinder {
    log: Logger,
    client: Arc<dyn NetworkClient>,
}

impl VirtualPortBinder {
    pub fn new(log: &Logger, client: Arc<dyn NetworkClient>) -> Self {
        VirtualPortBinder {
            log: log.new(o!("component" => "VirtualPortBinder")),
            client,
        }
    }

    /// Allocate a port on `network_id`.
    ///
    /// The segmentation id is resolved first so that a network without one
    /// never leaves a port behind.
    pub async fn create_port(
        &self,
        network_id: &str,
        binding: Option<&BindingContext>,
        extra_dhcp_opts: Vec<DhcpOption>,
    ) -> Result<CreatedPort, Error> {
        let segmentation_id = self.segmentation_id(network_id).await?;

        let mut spec = PortCreate {
            network_id: network_id.to_string(),
            admin_state_up: None,
            device_owner: None,
            binding_host_id: None,
            binding_vnic_type: None,
            binding_profile: None,
            extra_dhcp_opts,
        };
        if let Some(binding) = binding {
            spec.admin_state_up = Some(true);
            spec.device_owner = Some(DEVICE_OWNER_BAREMETAL.to_string());
            spec.binding_host_id = Some(binding.host_id.to_string());
            spec.binding_vnic_type = Some(VNIC_TYPE_BAREMETAL.to_string());
            spec.binding_profile = Some(BindingProfile {
                local_link_information: binding.local_links.clone(),
            });
        }

        let port = self.client.create_port(&spec).await.map_err(|e| {
            binding_error(e)
                .internal_context(format!("creating port on {}", network_id))
        })?;
        info!(self.log, "created virtual port";
            "vif_port_id" => &port.id,
            "network_id" => network_id,
            "mac" => %port.mac_address,
            "bound" => binding.is_some(),
        );
        Ok(CreatedPort {
            fixed_ip: port.fixed_ips.first().map(|ip| ip.ip_address),
            port_id: port.id,
            mac: port.mac_address,
            segmentation_id,
        })
    }

    /// Remove a port.  Removing a port that does not exist succeeds.
    pub async fn delete_port(&self, port_id: &str) -> Result<(), Error> {
        match self.client.delete_port(port_id).await {
            Ok(()) => {
                info!(self.log, "deleted virtual port"; "vif_port_id" => port_id);
                Ok(())
            }
            Err(NetworkClientError::NotFound { .. }) => {
                debug!(self.log, "virtual port already gone";
                    "vif_port_id" => port_id,
                );
                Ok(())
            }
            Err(e) => Err(binding_error(e)
                .internal_context(format!("deleting port {}", port_id))),
        }
    }

    /// Bind a port to a bare-metal machine through `local_links`.
    pub async fn update_binding(
        &self,
        port_id: &str,
        host_id: MachineUuid,
        local_links: &[LocalLinkConnection],
    ) -> Result<(), Error> {
        let update = PortBindingUpdate {
            admin_state_up: true,
            device_owner: DEVICE_OWNER_BAREMETAL.to_string(),
            binding_host_id: host_id.to_string(),
            binding_vnic_type: VNIC_TYPE_BAREMETAL.to_string(),
            binding_profile: BindingProfile {
                local_link_information: local_links.to_vec(),
            },
        };
        self.client.update_port(port_id, &update).await.map_err(|e| {
            binding_error(e).internal_context(format!("binding port {}", port_id))
        })?;
        info!(self.log, "bound virtual port";
            "vif_port_id" => port_id,
            "machine_id" => %host_id,
            "links" => local_links.len(),
        );
        Ok(())
    }

    /// Look up the VLAN of `network_id`.
    pub async fn segmentation_id(&self, network_id: &str) -> Result<u32, Error> {
        let network =
            self.client.show_network(network_id).await.map_err(|e| {
                binding_error(e).internal_context(format!(
                    "looking up network {}",
                    network_id
                ))
            })?;
        network.segmentation_id.ok_or_else(|| {
            Error::network_binding(&format!(
                "network {} has no segmentation id",
                network_id
            ))
        })
    }
}

fn binding_error(error: NetworkClientError) -> Error {
    Error::network_binding(&error.to_string())
}
