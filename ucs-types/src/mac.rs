// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::str::FromStr;

/// The `MacAddr` represents a Media Access Control (MAC) address, used to
/// uniquely identify a vNIC, an uplink or a bond.
// NOTE: We're using the `macaddr` crate for the internal representation, but
// it does not implement `JsonSchema` and formats in upper case.  Stored
// records and the virtual network both use the lower-case colon form.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub macaddr::MacAddr6);

impl MacAddr {
    /// Number of distinct 48-bit addresses.
    pub const SPACE: u64 = 1 << 48;

    /// Returns the address as a 48-bit integer.
    pub fn to_u64(&self) -> u64 {
        self.0
            .as_bytes()
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }

    /// Builds an address from the low 48 bits of `value`.
    pub fn from_u64(value: u64) -> MacAddr {
        let bytes = value.to_be_bytes();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[2..8]);
        MacAddr(macaddr::MacAddr6::from(octets))
    }
}

impl FromStr for MacAddr {
    type Err = macaddr::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(MacAddr)
    }
}

impl TryFrom<String> for MacAddr {
    type Error = macaddr::ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl std::ops::Deref for MacAddr {
    type Target = macaddr::MacAddr6;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let b = self.0.as_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl JsonSchema for MacAddr {
    fn schema_name() -> String {
        "MacAddr".to_string()
    }

    fn json_schema(
        _: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        schemars::schema::Schema::Object(schemars::schema::SchemaObject {
            metadata: Some(Box::new(schemars::schema::Metadata {
                title: Some("A MAC address".to_string()),
                description: Some(
                    "A Media Access Control address, in EUI-48 format"
                        .to_string(),
                ),
                examples: vec!["00:25:b5:00:00:1f".into()],
                ..Default::default()
            })),
            instance_type: Some(schemars::schema::SingleOrVec::Single(
                Box::new(schemars::schema::InstanceType::String),
            )),
            string: Some(Box::new(schemars::schema::StringValidation {
                max_length: Some(17), // 12 hex characters and 5 ":"-separators
                min_length: Some(17),
                pattern: Some(
                    r#"^([0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}$"#.to_string(),
                ),
            })),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod test {
    use super::MacAddr;

    #[test]
    fn test_mac_format_and_parse() {
        let mac: MacAddr = "00:25:B5:0A:FF:1e".parse().unwrap();
        assert_eq!(mac.to_string(), "00:25:b5:0a:ff:1e");
        assert_eq!(
            serde_json::to_value(mac).unwrap(),
            serde_json::json!("00:25:b5:0a:ff:1e")
        );
        let back: MacAddr =
            serde_json::from_value(serde_json::json!("00:25:b5:0a:ff:1e"))
                .unwrap();
        assert_eq!(back, mac);
        assert!("not-a-mac".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_integer_conversion() {
        let mac: MacAddr = "00:25:b5:00:00:ff".parse().unwrap();
        assert_eq!(mac.to_u64(), 0x0025_b500_00ff);
        assert_eq!(MacAddr::from_u64(mac.to_u64() + 1).to_string(), "00:25:b5:00:01:00");
        // Only the low 48 bits are used.
        assert_eq!(
            MacAddr::from_u64(MacAddr::SPACE + 5).to_string(),
            "00:00:00:00:00:05"
        );
    }
}
