// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files for the vNIC lifecycle
//! components
//!
//! Nothing reads configuration from a global.  The top-level [`Config`] is
//! loaded once and each component is handed only the section it needs.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use serde_with::DurationSeconds;
use std::time::Duration;
use thiserror::Error;

/// Configuration for the vNIC lifecycle service
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Networks used for the provisioning and cleaning phases.
    pub network: NetworkConfig,
    /// Inspection polling.
    pub inspection: InspectionConfig,
    /// PXE boot configuration templates.
    pub pxe: PxeConfig,
    /// Hypervisor-side VIF plugging.
    #[serde(default)]
    pub hypervisor: HypervisorConfig,
    /// Server-wide logging configuration.
    pub log: ConfigLogging,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }
}

/// Virtual networks attached to a machine outside of tenant use
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct NetworkConfig {
    /// Network the machine boots its deploy ramdisk on.
    pub provisioning_network_id: String,
    /// Network the machine is cleaned on.
    pub cleaning_network_id: String,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct InspectionConfig {
    /// period (in seconds) for periodic checks of the inspection service
    #[serde_as(as = "DurationSeconds<u64>")]
    pub status_check_period_secs: Duration,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct PxeConfig {
    pub pxe_config_template: Utf8PathBuf,
    pub uefi_pxe_config_template: Utf8PathBuf,
    #[serde(default)]
    pub ipxe_boot_script: Option<Utf8PathBuf>,
    #[serde(default)]
    pub http_root: Option<Utf8PathBuf>,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct HypervisorConfig {
    /// how often to re-read a port while waiting for its vNIC to come up
    #[serde_as(as = "DurationSeconds<u64>")]
    pub vnic_wait_interval_secs: Duration,
    /// how long to wait for a vNIC before giving up on the plug
    #[serde_as(as = "DurationSeconds<u64>")]
    pub vnic_wait_timeout_secs: Duration,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        HypervisorConfig {
            vnic_wait_interval_secs: Duration::from_secs(5),
            vnic_wait_timeout_secs: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}
