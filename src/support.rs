//! Best-effort diagnostics capture
//!
//! After a run reaches its terminal stage, a support bundle is collected so
//! a failed or slow installation can be diagnosed offline. This is the one
//! stage that is never allowed to fail the run: errors and timeouts are
//! logged as warnings and dropped.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::exec::run_command_ok;
use crate::Error;

/// Collects a diagnostics bundle from the cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SupportBundleClient: Send + Sync {
    /// Collect a bundle into the configured output directory
    async fn create(&self) -> Result<(), Error>;
}

/// Production client shelling out to the support-bundle CLI.
pub struct CommandSupportBundle {
    binary: PathBuf,
    kubeconfig: PathBuf,
    output_dir: PathBuf,
}

impl CommandSupportBundle {
    /// Build a client for the given CLI binary, kubeconfig, and output dir
    pub fn new(binary: PathBuf, kubeconfig: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            binary,
            kubeconfig,
            output_dir,
        }
    }
}

#[async_trait]
impl SupportBundleClient for CommandSupportBundle {
    async fn create(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let kubeconfig = self.kubeconfig.display().to_string();
        let output = self.output_dir.join("support-bundle.tar.gz");
        let output = output.display().to_string();

        run_command_ok(
            &self.binary,
            &[
                "--interactive=false",
                "--kubeconfig",
                &kubeconfig,
                "--output",
                &output,
                "--load-cluster-specs",
            ],
        )
        .await?;

        info!(bundle = %output, "support bundle collected");
        Ok(())
    }
}
