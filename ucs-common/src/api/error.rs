// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the vNIC lifecycle components
//!
//! Each component has its own low-level error type (hardware session errors,
//! virtual-network client errors, record decoding errors).  Those are turned
//! into an [`Error`] at the component boundary so that callers only ever
//! match on one taxonomy.

use crate::typed_uuid::MachineUuid;
use parse_display::Display;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use uuid::Uuid;

/// An error that can be generated by any lifecycle operation
///
/// These may be generated while handling a passthrough request or as part of
/// a background task.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// The hardware rejected a vNIC configuration write.
    #[error("vNIC configuration failed on machine {machine}: error code {code}")]
    HardwareConfig { machine: MachineUuid, code: String },
    /// A call to the virtual network control plane failed.
    #[error("Network binding error: {internal_message}")]
    NetworkBinding { internal_message: String },
    /// A machine, port or remote object the operation refers to is gone.
    #[error("{type_name} not found ({lookup_type:?})")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// Required per-machine configuration is absent.
    #[error("Machine {machine} is missing required configuration: {}", params.join(", "))]
    MissingConfig { machine: MachineUuid, params: Vec<String> },
    /// The machine is locked by another lifecycle operation.
    #[error("Machine {machine} is locked by another operation")]
    LockConflict { machine: MachineUuid },
    /// Anything else: corrupt records, failed collaborators, bad state.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
}

/// Identifies a type of object (for an `ObjectNotFound` error)
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[display(style = "kebab-case")]
pub enum ResourceType {
    Machine,
    Port,
    Portgroup,
    VirtualPort,
    Network,
    Vnic,
}

/// The key a failed lookup used
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    ById(Uuid),
    ByVifPortId(String),
    ByMac(String),
    ByName(String),
}

impl LookupType {
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl From<Uuid> for LookupType {
    fn from(uuid: Uuid) -> Self {
        LookupType::ById(uuid)
    }
}

impl Error {
    /// Only lock conflicts clear up on their own.
    pub fn retryable(&self) -> bool {
        match self {
            Error::LockConflict { .. } => true,

            Error::HardwareConfig { .. }
            | Error::NetworkBinding { .. }
            | Error::ObjectNotFound { .. }
            | Error::MissingConfig { .. }
            | Error::InternalError { .. } => false,
        }
    }

    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        LookupType::ById(*id).into_not_found(type_name)
    }

    pub fn not_found_by_vif(type_name: ResourceType, vif_port_id: &str) -> Error {
        LookupType::ByVifPortId(vif_port_id.to_owned()).into_not_found(type_name)
    }

    /// For conditions nothing upstream can act on, like an attribute bag
    /// that no longer decodes.
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    pub fn network_binding(message: &str) -> Error {
        Error::NetworkBinding { internal_message: message.to_owned() }
    }

    /// Prefix the message of a message-carrying error with `context`
    ///
    /// Structured variants pass through untouched.
    pub fn internal_context<C>(self, context: C) -> Error
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Error::HardwareConfig { .. }
            | Error::ObjectNotFound { .. }
            | Error::MissingConfig { .. }
            | Error::LockConflict { .. } => self,
            Error::NetworkBinding { internal_message } => {
                Error::NetworkBinding {
                    internal_message: format!(
                        "{}: {}",
                        context, internal_message
                    ),
                }
            }
            Error::InternalError { internal_message } => Error::InternalError {
                internal_message: format!("{}: {}", context, internal_message),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal_error(&e.to_string())
    }
}
