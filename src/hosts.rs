//! Host/OS integration
//!
//! Writes the OS-level artifacts the runtime needs: a systemd unit so the
//! runtime survives reboots, and containerd registry-mirror entries so
//! airgapped nodes pull images from the local registry. Only the runtime
//! bootstrap path calls into this module.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::Error;

/// Abstracts host filesystem mutations for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostAdapter: Send + Sync {
    /// Write a systemd service unit with the given contents
    async fn write_service_unit(&self, name: &str, contents: &str) -> Result<(), Error>;

    /// Point `registry_host` at a local mirror endpoint for containerd
    async fn add_registry_mirror(
        &self,
        registry_host: &str,
        mirror_endpoint: &str,
    ) -> Result<(), Error>;
}

/// Production adapter writing to the real host.
#[derive(Clone, Debug)]
pub struct SystemdHostAdapter {
    systemd_dir: PathBuf,
    containerd_certs_dir: PathBuf,
}

impl Default for SystemdHostAdapter {
    fn default() -> Self {
        Self {
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            containerd_certs_dir: PathBuf::from("/etc/containerd/certs.d"),
        }
    }
}

impl SystemdHostAdapter {
    /// Adapter rooted at non-default directories (tests, chroots)
    pub fn new(systemd_dir: PathBuf, containerd_certs_dir: PathBuf) -> Self {
        Self {
            systemd_dir,
            containerd_certs_dir,
        }
    }
}

#[async_trait]
impl HostAdapter for SystemdHostAdapter {
    async fn write_service_unit(&self, name: &str, contents: &str) -> Result<(), Error> {
        let path = self.systemd_dir.join(format!("{name}.service"));
        tokio::fs::create_dir_all(&self.systemd_dir).await?;
        tokio::fs::write(&path, contents).await?;
        info!(unit = %path.display(), "wrote service unit");
        Ok(())
    }

    async fn add_registry_mirror(
        &self,
        registry_host: &str,
        mirror_endpoint: &str,
    ) -> Result<(), Error> {
        let host_dir = self.containerd_certs_dir.join(registry_host);
        tokio::fs::create_dir_all(&host_dir).await?;

        let hosts_toml = format!(
            "server = \"https://{registry_host}\"\n\n\
             [host.\"{mirror_endpoint}\"]\n  capabilities = [\"pull\", \"resolve\"]\n  skip_verify = true\n"
        );
        tokio::fs::write(host_dir.join("hosts.toml"), hosts_toml).await?;
        info!(registry = %registry_host, mirror = %mirror_endpoint, "added registry mirror");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_adapter(label: &str) -> (SystemdHostAdapter, PathBuf) {
        let root =
            std::env::temp_dir().join(format!("drydock-hosts-{label}-{}", std::process::id()));
        let adapter =
            SystemdHostAdapter::new(root.join("systemd"), root.join("containerd/certs.d"));
        (adapter, root)
    }

    #[tokio::test]
    async fn writes_service_unit_file() {
        let (adapter, root) = temp_adapter("unit");
        adapter
            .write_service_unit("drydock-runtime", "[Unit]\nDescription=runtime\n")
            .await
            .unwrap();

        let written =
            std::fs::read_to_string(root.join("systemd/drydock-runtime.service")).unwrap();
        assert!(written.contains("Description=runtime"));
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn registry_mirror_points_at_local_endpoint() {
        let (adapter, root) = temp_adapter("mirror");
        adapter
            .add_registry_mirror("proxy.example.com", "http://127.0.0.1:5000")
            .await
            .unwrap();

        let written = std::fs::read_to_string(
            root.join("containerd/certs.d/proxy.example.com/hosts.toml"),
        )
        .unwrap();
        assert!(written.contains("server = \"https://proxy.example.com\""));
        assert!(written.contains("http://127.0.0.1:5000"));
        let _ = std::fs::remove_dir_all(root);
    }
}
