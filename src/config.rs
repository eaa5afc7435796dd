//! Installation options
//!
//! One explicit, typed options struct is constructed before a run starts and
//! passed by reference through every pipeline stage. Flags here are pure
//! inputs: component selection, chart values, and host paths all derive from
//! them with no I/O.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default admin console NodePort
pub const DEFAULT_ADMIN_CONSOLE_PORT: u16 = 30000;

/// Default data directory for the runtime and bundled artifacts
pub const DEFAULT_DATA_DIR: &str = "/var/lib/drydock";

/// Default pod CIDR handed to the runtime config
pub const DEFAULT_POD_CIDR: &str = "10.244.0.0/16";

/// Default service CIDR handed to the runtime config
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";

/// A user-declared auxiliary chart installed after the core add-ons.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionChart {
    /// Release name
    pub name: String,
    /// Chart reference: a local archive path or `repo/chart` reference
    pub chart: String,
    /// Target namespace, created if missing
    pub namespace: String,
    /// Optional values file passed to helm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_file: Option<PathBuf>,
}

/// Options for one installation or upgrade run.
///
/// Defaults are what a bare `drydock install` on a connected single node
/// gets; the CLI maps flags and env vars onto the named fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOptions {
    /// Version of the bundle being installed or upgraded to
    pub version: String,

    /// Airgap mode: no outbound internet access, artifacts are pre-staged
    /// under the data directory and served from the local registry
    pub airgap: bool,

    /// Disaster-recovery entitlement: include the backup/restore add-on
    pub disaster_recovery: bool,

    /// Multi-node (high-availability) mode
    pub multi_node: bool,

    /// NodePort for the admin console
    pub admin_console_port: u16,

    /// Data directory for the runtime, charts, and airgap artifacts
    pub data_dir: PathBuf,

    /// Path to the bundled runtime binary
    pub runtime_binary: PathBuf,

    /// Directory holding the bundled add-on chart archives
    pub charts_dir: PathBuf,

    /// Pod network CIDR
    pub pod_cidr: String,

    /// Service network CIDR
    pub service_cidr: String,

    /// Optional license identifier recorded in the installation object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,

    /// Proxy for outbound HTTP, forwarded to the runtime and add-ons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,

    /// Proxy for outbound HTTPS, forwarded to the runtime and add-ons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,

    /// User-declared auxiliary charts installed after the core add-ons
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionChart>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            airgap: false,
            disaster_recovery: false,
            multi_node: false,
            admin_console_port: DEFAULT_ADMIN_CONSOLE_PORT,
            runtime_binary: data_dir.join("bin/k0s"),
            charts_dir: data_dir.join("charts"),
            data_dir,
            pod_cidr: DEFAULT_POD_CIDR.to_string(),
            service_cidr: DEFAULT_SERVICE_CIDR.to_string(),
            license_id: None,
            http_proxy: None,
            https_proxy: None,
            extensions: Vec::new(),
        }
    }
}

impl InstallOptions {
    /// Validate option combinations that no stage can repair later.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.version.trim().is_empty() {
            return Err(crate::Error::config("version must not be empty"));
        }
        if self.admin_console_port < 1024 {
            return Err(crate::Error::config(
                "admin console port must be above 1023",
            ));
        }
        if self.pod_cidr == self.service_cidr {
            return Err(crate::Error::config(
                "pod CIDR and service CIDR must not overlap",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_node_online() {
        let opts = InstallOptions::default();
        assert!(!opts.airgap);
        assert!(!opts.multi_node);
        assert!(!opts.disaster_recovery);
        assert_eq!(opts.admin_console_port, DEFAULT_ADMIN_CONSOLE_PORT);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn rejects_privileged_console_port() {
        let opts = InstallOptions {
            admin_console_port: 443,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_identical_cidrs() {
        let opts = InstallOptions {
            pod_cidr: "10.0.0.0/16".into(),
            service_cidr: "10.0.0.0/16".into(),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }
}
