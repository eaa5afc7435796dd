//! The install pipeline
//!
//! Ordered, abort-on-first-error stages executed by the detached background
//! task. Each stage re-enters the status store only through its documented
//! methods, so a slow stage never blocks status polling.

use kube::ResourceExt;

use super::InfraManager;
use crate::components::ADDITIONAL_COMPONENTS;
use crate::config::InstallOptions;
use crate::metadata::{Installation, InstallationState};
use crate::runtime::RUNTIME_COMPONENT;
use crate::Error;

impl InfraManager {
    /// Run every install stage in order. The caller owns panic recovery and
    /// the terminal status write.
    pub(crate) async fn install_pipeline(&self, opts: &InstallOptions) -> Result<(), Error> {
        // (a) Bring up the cluster runtime. Config, host integration,
        // service start, and readiness all live behind the runtime client;
        // from here it is one component.
        self.run_stage(RUNTIME_COMPONENT, "Installing", "Installed", || async {
            let config = self.runtime.write_config(opts).await?;
            self.runtime.install(&config).await?;
            self.runtime.wait_for_ready().await
        })
        .await?;

        // (b) The cluster exists now; make sure the metadata client can
        // actually talk to it before recording anything.
        self.metadata
            .wait_ready()
            .await
            .map_err(|e| Error::stage("cluster clients", e))?;

        // (c) Record what this run is doing, idempotently: re-recording the
        // same version upserts the same object.
        let installation = Installation::from_options(opts, false);
        self.metadata
            .record_installation(&installation)
            .await
            .map_err(|e| Error::stage("installation record", e))?;
        self.metadata
            .record_version_metadata(&opts.version)
            .await
            .map_err(|e| Error::stage("version metadata", e))?;

        // (d) Add-ons, with the progress aggregator attached.
        self.run_addons(opts, false).await?;

        // (e) User extensions.
        self.run_stage(ADDITIONAL_COMPONENTS, "Installing", "Installed", || async {
            self.extensions.install(opts).await
        })
        .await?;

        // (f) Finalize the cluster-side record.
        self.metadata
            .set_installation_state(
                &installation.name_any(),
                InstallationState::Installed,
                "Installation complete",
            )
            .await
            .map_err(|e| Error::stage("finalize installation", e))?;

        // (g) Best-effort diagnostics; never fails the run.
        self.collect_diagnostics().await;

        Ok(())
    }
}
