//! User-declared extension charts
//!
//! Extensions are auxiliary Helm charts the end user lists in their config,
//! installed after the core add-ons. They are tracked as a single
//! "Additional Components" entry in the component registry rather than one
//! component each — membership of the registry is fixed before the run, and
//! extension lists are user data.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::config::{ExtensionChart, InstallOptions};
use crate::exec::run_command_ok;
use crate::Error;

/// Installs user-declared auxiliary charts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExtensionsInstaller: Send + Sync {
    /// Install every declared extension in order
    async fn install(&self, opts: &InstallOptions) -> Result<(), Error>;

    /// Upgrade every declared extension in order
    async fn upgrade(&self, opts: &InstallOptions) -> Result<(), Error>;
}

/// Production installer driving helm per declared chart.
pub struct HelmExtensionsInstaller {
    helm_binary: PathBuf,
    kubeconfig: PathBuf,
}

impl HelmExtensionsInstaller {
    /// Build an installer using the given helm binary and kubeconfig
    pub fn new(helm_binary: PathBuf, kubeconfig: PathBuf) -> Self {
        Self {
            helm_binary,
            kubeconfig,
        }
    }

    async fn apply(&self, extension: &ExtensionChart) -> Result<(), Error> {
        let kubeconfig = self.kubeconfig.display().to_string();
        let mut args = vec![
            "upgrade",
            "--install",
            &extension.name,
            &extension.chart,
            "--namespace",
            &extension.namespace,
            "--create-namespace",
            "--kubeconfig",
            &kubeconfig,
            "--wait",
        ];
        let values_file = extension
            .values_file
            .as_ref()
            .map(|p| p.display().to_string());
        if let Some(values) = &values_file {
            args.push("--values");
            args.push(values);
        }

        run_command_ok(&self.helm_binary, &args).await?;
        info!(extension = %extension.name, namespace = %extension.namespace, "extension applied");
        Ok(())
    }

    async fn run(&self, opts: &InstallOptions) -> Result<(), Error> {
        for extension in &opts.extensions {
            self.apply(extension)
                .await
                .map_err(|e| Error::stage(&extension.name, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ExtensionsInstaller for HelmExtensionsInstaller {
    async fn install(&self, opts: &InstallOptions) -> Result<(), Error> {
        self.run(opts).await
    }

    async fn upgrade(&self, opts: &InstallOptions) -> Result<(), Error> {
        // helm upgrade --install is idempotent across versions; the chart
        // reference in the target options decides what runs.
        self.run(opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_extensions_is_a_no_op() {
        let installer =
            HelmExtensionsInstaller::new(PathBuf::from("helm"), PathBuf::from("kubeconfig"));
        let opts = InstallOptions::default();
        assert!(installer.install(&opts).await.is_ok());
    }

    #[tokio::test]
    async fn failure_names_the_extension() {
        let installer = HelmExtensionsInstaller::new(
            PathBuf::from("/nonexistent/helm"),
            PathBuf::from("kubeconfig"),
        );
        let opts = InstallOptions {
            extensions: vec![ExtensionChart {
                name: "monitoring".to_string(),
                chart: "prometheus-27.0.0.tgz".to_string(),
                namespace: "monitoring".to_string(),
                values_file: None,
            }],
            ..Default::default()
        };

        let err = installer.install(&opts).await.unwrap_err();
        assert!(err.to_string().contains("monitoring"));
    }
}
