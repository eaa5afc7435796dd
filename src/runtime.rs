//! Cluster runtime client
//!
//! Drives the bundled single-binary Kubernetes runtime: write its config,
//! install it as an OS service, start it, wait for the local node to
//! register, and upgrade it in place. Readiness waits use bounded backoff —
//! retry policy for the bootstrap itself lives here, never in the
//! orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::config::InstallOptions;
use crate::exec::{run_command, run_command_ok};
use crate::hosts::HostAdapter;
use crate::metadata::Installation;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Component name under which runtime bootstrap/upgrade progress is tracked
pub const RUNTIME_COMPONENT: &str = "Runtime";

/// Registry host rewritten to the local mirror in airgap mode
const AIRGAP_MIRRORED_REGISTRY: &str = "proxy.replicated.com";

/// Local registry endpoint serving pre-staged airgap images
const LOCAL_REGISTRY_ENDPOINT: &str = "http://127.0.0.1:5000";

/// Result of rendering the runtime configuration to disk.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    /// Where the config file was written
    pub path: PathBuf,
    /// Node name the runtime will register as
    pub node_name: String,
}

/// Operations on the cluster runtime.
///
/// The orchestrator treats this as an opaque capability; only the shape
/// matters. Every operation is a genuine blocking wait on external state,
/// not a busy poll.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Whether the runtime is already present on this host
    async fn is_installed(&self) -> Result<bool, Error>;

    /// Render and write the runtime config file
    async fn write_config(&self, opts: &InstallOptions) -> Result<RuntimeConfig, Error>;

    /// Install the runtime as an OS service and start it
    async fn install(&self, config: &RuntimeConfig) -> Result<(), Error>;

    /// Block until the control plane answers and the local node is ready
    async fn wait_for_ready(&self) -> Result<(), Error>;

    /// Upgrade the runtime in place to the version the installation records
    async fn upgrade(&self, installation: &Installation) -> Result<(), Error>;

    /// Stage bundle artifacts (binary, charts, images) into the data
    /// directory so every node serves the same content
    async fn distribute_artifacts(&self, opts: &InstallOptions) -> Result<(), Error>;
}

/// Production client driving a bundled k0s-style runtime binary.
pub struct K0sRuntime {
    binary: PathBuf,
    config_path: PathBuf,
    data_dir: PathBuf,
    hosts: Arc<dyn HostAdapter>,
}

impl K0sRuntime {
    /// Build a client for the runtime binary and data directory named in the
    /// options.
    pub fn new(opts: &InstallOptions, hosts: Arc<dyn HostAdapter>) -> Self {
        Self {
            binary: opts.runtime_binary.clone(),
            config_path: opts.data_dir.join("k0s.yaml"),
            data_dir: opts.data_dir.clone(),
            hosts,
        }
    }

    fn render_config(opts: &InstallOptions, node_name: &str) -> String {
        // Single template, same shape for every topology. Multi-node only
        // changes what joins later, not what the first controller runs.
        format!(
            "apiVersion: k0s.k0sproject.io/v1beta1\n\
             kind: ClusterConfig\n\
             metadata:\n\
             \x20 name: {node_name}\n\
             spec:\n\
             \x20 api:\n\
             \x20   sans:\n\
             \x20     - {node_name}\n\
             \x20 network:\n\
             \x20   podCIDR: {pod_cidr}\n\
             \x20   serviceCIDR: {service_cidr}\n\
             \x20 storage:\n\
             \x20   type: etcd\n",
            node_name = node_name,
            pod_cidr = opts.pod_cidr,
            service_cidr = opts.service_cidr,
        )
    }

    fn service_unit(&self) -> String {
        format!(
            "[Unit]\nDescription=drydock embedded Kubernetes runtime\nAfter=network-online.target\n\n\
             [Service]\nExecStart={} controller --enable-worker --config {}\nRestart=always\nRestartSec=5\n\n\
             [Install]\nWantedBy=multi-user.target\n",
            self.binary.display(),
            self.config_path.display(),
        )
    }
}

#[async_trait]
impl RuntimeClient for K0sRuntime {
    async fn is_installed(&self) -> Result<bool, Error> {
        // The config file is written first and removed last by a reset, so
        // its presence is the installed marker.
        Ok(tokio::fs::try_exists(&self.config_path).await?)
    }

    async fn write_config(&self, opts: &InstallOptions) -> Result<RuntimeConfig, Error> {
        let node_name = hostname()?;
        let rendered = Self::render_config(opts, &node_name);

        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::write(&self.config_path, rendered).await?;
        info!(path = %self.config_path.display(), node = %node_name, "wrote runtime config");

        self.hosts
            .write_service_unit("drydock-runtime", &self.service_unit())
            .await?;

        if opts.airgap {
            self.hosts
                .add_registry_mirror(AIRGAP_MIRRORED_REGISTRY, LOCAL_REGISTRY_ENDPOINT)
                .await?;
        }

        Ok(RuntimeConfig {
            path: self.config_path.clone(),
            node_name,
        })
    }

    async fn install(&self, config: &RuntimeConfig) -> Result<(), Error> {
        let config_arg = config.path.display().to_string();
        run_command_ok(
            &self.binary,
            &[
                "install",
                "controller",
                "--enable-worker",
                "--config",
                &config_arg,
            ],
        )
        .await?;
        run_command_ok(&self.binary, &["start"]).await?;
        info!(node = %config.node_name, "runtime service started");
        Ok(())
    }

    async fn wait_for_ready(&self) -> Result<(), Error> {
        // First the control plane itself, then the node object it registers.
        retry_with_backoff(
            &RetryConfig::with_max_attempts(60),
            "runtime status",
            || async {
                run_command(&self.binary, &["status"]).await?;
                Ok::<(), Error>(())
            },
        )
        .await?;

        retry_with_backoff(
            &RetryConfig::with_max_attempts(60),
            "node ready",
            || async {
                run_command_ok(
                    &self.binary,
                    &[
                        "kubectl",
                        "wait",
                        "--for=condition=Ready",
                        "nodes",
                        "--all",
                        "--timeout=30s",
                    ],
                )
                .await
            },
        )
        .await?;

        info!("runtime is ready");
        Ok(())
    }

    async fn upgrade(&self, installation: &Installation) -> Result<(), Error> {
        info!(version = %installation.spec.version, "upgrading runtime in place");

        // Stop is best-effort: a crashed runtime should not block its own
        // repair by upgrade.
        if let Err(err) = run_command_ok(&self.binary, &["stop"]).await {
            debug!(error = %err, "runtime stop failed before upgrade, continuing");
        }

        let config_arg = self.config_path.display().to_string();
        run_command_ok(
            &self.binary,
            &[
                "install",
                "controller",
                "--enable-worker",
                "--force",
                "--config",
                &config_arg,
            ],
        )
        .await?;
        run_command_ok(&self.binary, &["start"]).await?;
        Ok(())
    }

    async fn distribute_artifacts(&self, opts: &InstallOptions) -> Result<(), Error> {
        let staged_bin = self.data_dir.join("bin");
        tokio::fs::create_dir_all(&staged_bin).await?;

        let target = staged_bin.join("k0s");
        if opts.runtime_binary != target {
            tokio::fs::copy(&opts.runtime_binary, &target).await?;
        }

        let staged_charts = self.data_dir.join("charts");
        if opts.charts_dir != staged_charts {
            copy_dir(&opts.charts_dir, &staged_charts).await?;
        }

        info!(version = %opts.version, data_dir = %self.data_dir.display(), "artifacts staged");
        Ok(())
    }
}

/// Copy the flat contents of `from` into `to`, creating `to` if needed.
async fn copy_dir(from: &PathBuf, to: &PathBuf) -> Result<(), Error> {
    tokio::fs::create_dir_all(to).await?;
    let mut entries = tokio::fs::read_dir(from).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), to.join(entry.file_name())).await?;
        }
    }
    Ok(())
}

fn hostname() -> Result<String, Error> {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::config(format!("cannot determine hostname: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_template_carries_cidrs() {
        let opts = InstallOptions {
            pod_cidr: "10.32.0.0/16".into(),
            service_cidr: "10.96.0.0/12".into(),
            ..Default::default()
        };
        let rendered = K0sRuntime::render_config(&opts, "node-a");
        assert!(rendered.contains("podCIDR: 10.32.0.0/16"));
        assert!(rendered.contains("serviceCIDR: 10.96.0.0/12"));
        assert!(rendered.contains("name: node-a"));
    }

    #[tokio::test]
    async fn fresh_host_reports_not_installed() {
        let opts = InstallOptions {
            data_dir: std::env::temp_dir().join(format!(
                "drydock-runtime-{}",
                std::process::id()
            )),
            ..Default::default()
        };
        let runtime = K0sRuntime::new(&opts, Arc::new(crate::hosts::MockHostAdapter::new()));
        assert!(!runtime.is_installed().await.unwrap());
    }
}
