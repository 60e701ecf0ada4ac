// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identifiers for machines, ports and portgroups
//!
//! All three are plain UUIDs on the wire.  The marker parameter keeps a port
//! id from being passed where a machine id is expected.

use derive_where::derive_where;
use parse_display::Display;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive_where(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypedUuid<K: IdKind> {
    uuid: Uuid,
    kind: PhantomData<K>,
}

impl<K: IdKind> TypedUuid<K> {
    pub fn new_v4() -> Self {
        TypedUuid { uuid: Uuid::new_v4(), kind: PhantomData }
    }

    pub fn as_untyped_uuid(&self) -> &Uuid {
        &self.uuid
    }
}

impl<K: IdKind> fmt::Debug for TypedUuid<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uuid, K::KIND)
    }
}

impl<K: IdKind> fmt::Display for TypedUuid<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.fmt(f)
    }
}

impl<K: IdKind> FromStr for TypedUuid<K> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s)
            .map(|uuid| TypedUuid { uuid, kind: PhantomData })
            .map_err(|error| IdParseError { kind: K::KIND, error })
    }
}

impl<K: IdKind> JsonSchema for TypedUuid<K> {
    fn schema_name() -> String {
        format!("{}Id", K::KIND.to_string().replace('_', ""))
    }

    fn json_schema(
        gen: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        Uuid::json_schema(gen)
    }
}

/// Marker for the kind of record a [`TypedUuid`] names.
pub trait IdKind: Send + Sync + 'static {
    const KIND: RecordKind;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
#[display(style = "snake_case")]
pub enum RecordKind {
    Machine,
    Port,
    Portgroup,
}

pub enum MachineKind {}
pub enum PortKind {}
pub enum PortgroupKind {}

impl IdKind for MachineKind {
    const KIND: RecordKind = RecordKind::Machine;
}
impl IdKind for PortKind {
    const KIND: RecordKind = RecordKind::Port;
}
impl IdKind for PortgroupKind {
    const KIND: RecordKind = RecordKind::Portgroup;
}

/// Identifies a bare-metal machine.
pub type MachineUuid = TypedUuid<MachineKind>;
pub type PortUuid = TypedUuid<PortKind>;
pub type PortgroupUuid = TypedUuid<PortgroupKind>;

#[derive(Debug, Error)]
#[error("invalid {kind} id")]
pub struct IdParseError {
    kind: RecordKind,
    #[source]
    error: uuid::Error,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let raw = "1f5a4c4e-2bd5-4b06-a1b0-6f8d0e4b7c11";
        let id: MachineUuid = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
        assert_eq!(format!("{:?}", id), format!("{} (machine)", raw));

        let error = "not-a-uuid".parse::<PortUuid>().unwrap_err();
        assert_eq!(error.to_string(), "invalid port id");
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let id = PortgroupUuid::new_v4();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_untyped_uuid()));
        let back: PortgroupUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
