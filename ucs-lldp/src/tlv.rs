// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of LLDP TLV values (IEEE 802.1AB)

use serde_json::Map;
use serde_json::Value;
use std::net::Ipv4Addr;
use thiserror::Error;
use ucs_types::MacAddr;

pub const TLV_TYPE_CHASSIS_ID: u8 = 1;
pub const TLV_TYPE_PORT_ID: u8 = 2;
pub const TLV_TYPE_PORT_DESC: u8 = 4;
pub const TLV_TYPE_SYSTEM_NAME: u8 = 5;
pub const TLV_TYPE_SYSTEM_DESC: u8 = 6;
pub const TLV_TYPE_MGMT_ADDR: u8 = 8;

pub const CHASSIS_ID_SUBTYPE_MAC: u8 = 4;
pub const PORT_ID_SUBTYPE_IFNAME: u8 = 5;
pub const MGMT_ADDR_SUBTYPE_IPV4: u8 = 1;

#[derive(Debug, Error)]
pub enum TlvError {
    #[error("TLV type {tlv_type}: invalid hex")]
    Hex {
        tlv_type: u8,
        #[source]
        err: hex::FromHexError,
    },
    #[error("TLV type {tlv_type}: value truncated")]
    Truncated { tlv_type: u8 },
    #[error("TLV type {tlv_type}: value is not UTF-8")]
    Utf8 { tlv_type: u8 },
}

/// What the TLVs of one interface say about its switch port
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchPortInfo {
    pub port_id: Option<String>,
    /// Always carries `is_native: true`.  A MAC chassis id lands here as
    /// `chassis_id`.
    pub switch_info: Map<String, Value>,
}

impl Default for SwitchPortInfo {
    fn default() -> Self {
        let mut switch_info = Map::new();
        switch_info.insert("is_native".to_string(), Value::Bool(true));
        SwitchPortInfo { port_id: None, switch_info }
    }
}

/// Decode `(type, hex value)` pairs.  Unknown types are ignored.
pub fn decode_tlvs(tlvs: &[(u8, String)]) -> Result<SwitchPortInfo, TlvError> {
    let mut info = SwitchPortInfo::default();
    for (tlv_type, hex_value) in tlvs {
        let tlv_type = *tlv_type;
        let value = hex::decode(hex_value)
            .map_err(|err| TlvError::Hex { tlv_type, err })?;
        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| TlvError::Utf8 { tlv_type })
        };

        match tlv_type {
            TLV_TYPE_CHASSIS_ID => {
                let (subtype, rest) = split_subtype(tlv_type, &value)?;
                if subtype == CHASSIS_ID_SUBTYPE_MAC {
                    let octets: [u8; 6] = rest
                        .try_into()
                        .map_err(|_| TlvError::Truncated { tlv_type })?;
                    info.switch_info.insert(
                        "chassis_id".to_string(),
                        Value::from(MacAddr(octets.into()).to_string()),
                    );
                }
            }
            TLV_TYPE_PORT_ID => {
                let (subtype, rest) = split_subtype(tlv_type, &value)?;
                if subtype == PORT_ID_SUBTYPE_IFNAME {
                    info.port_id = Some(text(rest)?);
                }
            }
            TLV_TYPE_PORT_DESC => {
                info.switch_info
                    .insert("port_desc".to_string(), Value::from(text(&value)?));
            }
            TLV_TYPE_SYSTEM_NAME => {
                info.switch_info.insert(
                    "system_name".to_string(),
                    Value::from(text(&value)?),
                );
            }
            TLV_TYPE_SYSTEM_DESC => {
                info.switch_info.insert(
                    "system_desc".to_string(),
                    Value::from(text(&value)?),
                );
            }
            TLV_TYPE_MGMT_ADDR => {
                // address string length (including the subtype), subtype,
                // address
                if value.len() < 2 {
                    return Err(TlvError::Truncated { tlv_type });
                }
                let len = usize::from(value[0]);
                if value[1] == MGMT_ADDR_SUBTYPE_IPV4 {
                    let addr = value
                        .get(2..1 + len)
                        .and_then(|b| <[u8; 4]>::try_from(b).ok())
                        .ok_or(TlvError::Truncated { tlv_type })?;
                    info.switch_info.insert(
                        "switch_ip".to_string(),
                        Value::from(Ipv4Addr::from(addr).to_string()),
                    );
                }
            }
            _ => (),
        }
    }
    Ok(info)
}

fn split_subtype(tlv_type: u8, value: &[u8]) -> Result<(u8, &[u8]), TlvError> {
    value
        .split_first()
        .map(|(subtype, rest)| (*subtype, rest))
        .ok_or(TlvError::Truncated { tlv_type })
}
