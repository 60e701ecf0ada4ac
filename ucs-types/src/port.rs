// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ports: one network attachment of one vNIC
//!
//! The persisted form keeps lifecycle data in the `extra` attribute bag
//! under fixed keys:
//!
//! | key           | values                                   |
//! |---------------|------------------------------------------|
//! | `type`        | `deploy`, `clean`, `tenant`, `inspect`   |
//! | `state`       | `UP`, `DOWN`, `ERROR`, `ACTIVE` (legacy) |
//! | `vnic_id`     | integer or null                          |
//! | `vif_port_id` | string                                   |
//! | `seg_id`      | integer or null                          |
//! | `uplink`      | integer (inspect only)                   |
//!
//! Keys the lifecycle code does not own are carried through untouched.

use crate::LocalLinkConnection;
use crate::MacAddr;
use crate::VnicRef;
use parse_display::Display;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use ucs_common::api::Error;
use ucs_common::typed_uuid::MachineUuid;
use ucs_common::typed_uuid::PortUuid;
use ucs_common::typed_uuid::PortgroupUuid;
use uuid::Uuid;

pub const EXTRA_TYPE: &str = "type";
pub const EXTRA_STATE: &str = "state";
pub const EXTRA_VNIC_ID: &str = "vnic_id";
pub const EXTRA_VIF_PORT_ID: &str = "vif_port_id";
pub const EXTRA_SEG_ID: &str = "seg_id";
pub const EXTRA_UPLINK: &str = "uplink";
pub const EXTRA_MODE: &str = "mode";

const OWNED_PORT_KEYS: [&str; 6] = [
    EXTRA_TYPE,
    EXTRA_STATE,
    EXTRA_VNIC_ID,
    EXTRA_VIF_PORT_ID,
    EXTRA_SEG_ID,
    EXTRA_UPLINK,
];

/// A port as the topology store persists it
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PortRecord {
    pub id: PortUuid,
    pub machine_id: MachineUuid,
    #[serde(default)]
    pub portgroup_id: Option<PortgroupUuid>,
    pub address: MacAddr,
    #[serde(default)]
    pub pxe_enabled: bool,
    #[serde(default)]
    pub local_link_connection: Map<String, Value>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Lifecycle phase a port was created for
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[display(style = "lowercase")]
pub enum AttachmentKind {
    Deploy,
    Clean,
    Tenant,
    Inspect,
}

impl AttachmentKind {
    fn parse(value: &str) -> Option<AttachmentKind> {
        // Inspection ports were historically written in upper case.
        match value.to_ascii_lowercase().as_str() {
            "deploy" => Some(AttachmentKind::Deploy),
            "clean" => Some(AttachmentKind::Clean),
            "tenant" => Some(AttachmentKind::Tenant),
            "inspect" => Some(AttachmentKind::Inspect),
            _ => None,
        }
    }
}

/// State of a provisioning or cleaning port
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PhaseState {
    /// The vNIC exists on the hardware.
    Up(VnicRef),
    /// The hardware half has been torn down; the virtual port may remain.
    Down,
}

/// Attachment of a provisioning or cleaning port
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseAttachment {
    pub vif_port_id: String,
    pub seg_id: Option<u32>,
    pub state: PhaseState,
}

/// State of a tenant port
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TenantState {
    /// Attach requested (or detached); no vNIC on the hardware.
    Down,
    Up { vnic_id: u32 },
    /// The hardware refused the vNIC.
    Error,
}

/// Attachment of a tenant port
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TenantAttachment {
    /// Virtual port this vNIC realizes.  Bond members carry none; the
    /// portgroup holds it.
    pub vif_port_id: Option<String>,
    pub seg_id: Option<u32>,
    pub state: TenantState,
}

impl TenantAttachment {
    pub fn vnic_id(&self) -> Option<u32> {
        match self.state {
            TenantState::Up { vnic_id } => Some(vnic_id),
            TenantState::Down | TenantState::Error => None,
        }
    }
}

/// What a port is attached for
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PortAttachment {
    Deploy(PhaseAttachment),
    Clean(PhaseAttachment),
    Tenant(TenantAttachment),
    /// A temporary inspection vNIC on `uplink`.  Always up.
    Inspect { vnic_id: u32, uplink: u32 },
    /// Not managed by the lifecycle code.
    Unmanaged,
}

impl PortAttachment {
    pub fn kind(&self) -> Option<AttachmentKind> {
        match self {
            PortAttachment::Deploy(_) => Some(AttachmentKind::Deploy),
            PortAttachment::Clean(_) => Some(AttachmentKind::Clean),
            PortAttachment::Tenant(_) => Some(AttachmentKind::Tenant),
            PortAttachment::Inspect { .. } => Some(AttachmentKind::Inspect),
            PortAttachment::Unmanaged => None,
        }
    }

    /// Returns the provisioning or cleaning attachment, if this is one.
    pub fn phase(&self) -> Option<&PhaseAttachment> {
        match self {
            PortAttachment::Deploy(a) | PortAttachment::Clean(a) => Some(a),
            _ => None,
        }
    }

    pub fn tenant(&self) -> Option<&TenantAttachment> {
        match self {
            PortAttachment::Tenant(a) => Some(a),
            _ => None,
        }
    }
}

/// A port, with its attribute bag decoded
#[derive(Clone, Debug, PartialEq)]
pub struct Port {
    pub id: PortUuid,
    pub machine_id: MachineUuid,
    pub portgroup_id: Option<PortgroupUuid>,
    pub address: MacAddr,
    pub pxe_enabled: bool,
    pub local_link_connection: Map<String, Value>,
    pub attachment: PortAttachment,
    other_extra: Map<String, Value>,
}

impl Port {
    pub fn new(
        machine_id: MachineUuid,
        address: MacAddr,
        attachment: PortAttachment,
    ) -> Port {
        Port {
            id: PortUuid::new_v4(),
            machine_id,
            portgroup_id: None,
            address,
            pxe_enabled: false,
            local_link_connection: Map::new(),
            attachment,
            other_extra: Map::new(),
        }
    }

    /// Returns the switch connection recorded on this port, if complete.
    pub fn local_link(&self) -> Option<LocalLinkConnection> {
        LocalLinkConnection::from_value(&Value::Object(
            self.local_link_connection.clone(),
        ))
        .ok()
    }

    /// Returns the virtual port id this port is attached to.
    pub fn vif_port_id(&self) -> Option<&str> {
        match &self.attachment {
            PortAttachment::Deploy(a) | PortAttachment::Clean(a) => {
                Some(a.vif_port_id.as_str())
            }
            PortAttachment::Tenant(a) => a.vif_port_id.as_deref(),
            PortAttachment::Inspect { .. } | PortAttachment::Unmanaged => None,
        }
    }

    /// Decode a stored record.
    pub fn from_record(record: PortRecord) -> Result<Port, RecordError> {
        let PortRecord {
            id,
            machine_id,
            portgroup_id,
            address,
            pxe_enabled,
            local_link_connection,
            mut extra,
        } = record;
        let bag = Bag { id: *id.as_untyped_uuid(), extra: &extra };

        let kind = match bag.opt_str(EXTRA_TYPE)? {
            None => None,
            Some(t) => Some(AttachmentKind::parse(t).ok_or_else(|| {
                RecordError::UnknownType { id: bag.id, value: t.to_string() }
            })?),
        };
        let attachment = match kind {
            None => PortAttachment::Unmanaged,
            Some(kind) => {
                let attachment = bag.decode(kind)?;
                for key in OWNED_PORT_KEYS {
                    extra.remove(key);
                }
                attachment
            }
        };

        Ok(Port {
            id,
            machine_id,
            portgroup_id,
            address,
            pxe_enabled,
            local_link_connection,
            attachment,
            other_extra: extra,
        })
    }

    /// Encode this port for storage.
    pub fn to_record(&self) -> PortRecord {
        let mut extra = self.other_extra.clone();
        let mut put = |key: &str, value: Value| {
            extra.insert(key.to_string(), value);
        };
        if let Some(kind) = self.attachment.kind() {
            put(EXTRA_TYPE, Value::from(kind.to_string()));
        }
        match &self.attachment {
            PortAttachment::Deploy(a) | PortAttachment::Clean(a) => {
                let (state, vnic_id) = match &a.state {
                    PhaseState::Up(VnicRef::Slot(slot)) => {
                        ("UP", Value::from(*slot))
                    }
                    PhaseState::Up(VnicRef::Named(_)) => ("ACTIVE", Value::Null),
                    PhaseState::Down => ("DOWN", Value::Null),
                };
                put(EXTRA_STATE, Value::from(state));
                put(EXTRA_VNIC_ID, vnic_id);
                put(EXTRA_VIF_PORT_ID, Value::from(a.vif_port_id.clone()));
                put(EXTRA_SEG_ID, Value::from(a.seg_id));
            }
            PortAttachment::Tenant(a) => {
                let state = match a.state {
                    TenantState::Down => "DOWN",
                    TenantState::Up { .. } => "UP",
                    TenantState::Error => "ERROR",
                };
                put(EXTRA_STATE, Value::from(state));
                put(EXTRA_VNIC_ID, Value::from(a.vnic_id()));
                if let Some(vif) = &a.vif_port_id {
                    put(EXTRA_VIF_PORT_ID, Value::from(vif.clone()));
                }
                put(EXTRA_SEG_ID, Value::from(a.seg_id));
            }
            PortAttachment::Inspect { vnic_id, uplink } => {
                put(EXTRA_STATE, Value::from("UP"));
                put(EXTRA_VNIC_ID, Value::from(*vnic_id));
                put(EXTRA_UPLINK, Value::from(*uplink));
            }
            PortAttachment::Unmanaged => (),
        }

        PortRecord {
            id: self.id,
            machine_id: self.machine_id,
            portgroup_id: self.portgroup_id,
            address: self.address,
            pxe_enabled: self.pxe_enabled,
            local_link_connection: self.local_link_connection.clone(),
            extra,
        }
    }
}

impl TryFrom<PortRecord> for Port {
    type Error = RecordError;

    fn try_from(record: PortRecord) -> Result<Self, Self::Error> {
        Port::from_record(record)
    }
}

impl From<&Port> for PortRecord {
    fn from(port: &Port) -> Self {
        port.to_record()
    }
}

/// A stored attribute bag could not be decoded
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RecordError {
    #[error("record {id}: unknown attachment type {value:?}")]
    UnknownType { id: Uuid, value: String },
    #[error("record {id}: state {value:?} is not valid for a {kind} port")]
    InvalidState { id: Uuid, kind: AttachmentKind, value: String },
    #[error("record {id}: missing or malformed {key:?}")]
    BadKey { id: Uuid, key: &'static str },
    #[error("record {id}: state {state} requires vnic_id to be {expected}")]
    Inconsistent { id: Uuid, state: String, expected: &'static str },
    #[error("record {id}: unknown bond mode {value}")]
    UnknownMode { id: Uuid, value: Value },
}

impl From<RecordError> for Error {
    fn from(e: RecordError) -> Self {
        Error::internal_error(&e.to_string())
    }
}

/// Typed accessors over an attribute bag.
pub(crate) struct Bag<'a> {
    pub(crate) id: Uuid,
    pub(crate) extra: &'a Map<String, Value>,
}

impl<'a> Bag<'a> {
    pub(crate) fn opt_str(
        &self,
        key: &'static str,
    ) -> Result<Option<&'a str>, RecordError> {
        match self.extra.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(RecordError::BadKey { id: self.id, key }),
        }
    }

    pub(crate) fn opt_u32(
        &self,
        key: &'static str,
    ) -> Result<Option<u32>, RecordError> {
        let bad = || RecordError::BadKey { id: self.id, key };
        match self.extra.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(bad),
            // Operators sometimes write integers as strings.
            Some(Value::String(s)) => s.parse().map(Some).map_err(|_| bad()),
            Some(_) => Err(bad()),
        }
    }

    fn required<T>(
        &self,
        key: &'static str,
        value: Option<T>,
    ) -> Result<T, RecordError> {
        value.ok_or(RecordError::BadKey { id: self.id, key })
    }

    fn decode(&self, kind: AttachmentKind) -> Result<PortAttachment, RecordError> {
        let state = self.opt_str(EXTRA_STATE)?.map(str::to_ascii_uppercase);
        let vnic_id = self.opt_u32(EXTRA_VNIC_ID)?;
        let seg_id = self.opt_u32(EXTRA_SEG_ID)?;
        let vif_port_id = self.opt_str(EXTRA_VIF_PORT_ID)?.map(str::to_string);
        let invalid_state = |value: &str| RecordError::InvalidState {
            id: self.id,
            kind,
            value: value.to_string(),
        };
        let inconsistent = |state: &str, expected: &'static str| RecordError::Inconsistent {
            id: self.id,
            state: state.to_string(),
            expected,
        };

        match kind {
            AttachmentKind::Deploy | AttachmentKind::Clean => {
                let vif_port_id =
                    self.required(EXTRA_VIF_PORT_ID, vif_port_id)?;
                let state = match (state.as_deref(), vnic_id) {
                    (Some("UP"), Some(slot)) => {
                        PhaseState::Up(VnicRef::Slot(slot))
                    }
                    (Some("UP"), None) => return Err(inconsistent("UP", "set")),
                    (Some("ACTIVE"), Some(slot)) => {
                        PhaseState::Up(VnicRef::Slot(slot))
                    }
                    // Legacy ports name their vNIC after the virtual port.
                    (Some("ACTIVE"), None) => {
                        PhaseState::Up(VnicRef::Named(vif_port_id.clone()))
                    }
                    (Some("DOWN"), None) => PhaseState::Down,
                    (Some("DOWN"), Some(_)) => {
                        return Err(inconsistent("DOWN", "null"))
                    }
                    (other, _) => {
                        return Err(invalid_state(other.unwrap_or("")))
                    }
                };
                let attachment = PhaseAttachment { vif_port_id, seg_id, state };
                Ok(if kind == AttachmentKind::Deploy {
                    PortAttachment::Deploy(attachment)
                } else {
                    PortAttachment::Clean(attachment)
                })
            }
            AttachmentKind::Tenant => {
                let state = match (state.as_deref(), vnic_id) {
                    (Some("UP"), Some(vnic_id)) => TenantState::Up { vnic_id },
                    (Some("UP"), None) => return Err(inconsistent("UP", "set")),
                    (Some("DOWN"), None) => TenantState::Down,
                    (Some("ERROR"), None) => TenantState::Error,
                    (Some(s @ ("DOWN" | "ERROR")), Some(_)) => {
                        return Err(inconsistent(s, "null"))
                    }
                    (other, _) => {
                        return Err(invalid_state(other.unwrap_or("")))
                    }
                };
                Ok(PortAttachment::Tenant(TenantAttachment {
                    vif_port_id,
                    seg_id,
                    state,
                }))
            }
            AttachmentKind::Inspect => {
                match state.as_deref() {
                    None | Some("UP") => (),
                    Some(other) => return Err(invalid_state(other)),
                }
                Ok(PortAttachment::Inspect {
                    vnic_id: self.required(EXTRA_VNIC_ID, vnic_id)?,
                    uplink: self.required(
                        EXTRA_UPLINK,
                        self.opt_u32(EXTRA_UPLINK)?,
                    )?,
                })
            }
        }
    }
}
