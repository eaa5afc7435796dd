//! The upgrade pipeline
//!
//! Same shape as the install pipeline with three differences: the runtime is
//! upgraded in place after artifacts are redistributed, the component
//! registry was rebuilt from the *target* options by the caller, and a new
//! installation object is created — never upserted — so every upgrade leaves
//! its own record for rollback and disaster recovery.

use kube::ResourceExt;

use super::InfraManager;
use crate::components::ADDITIONAL_COMPONENTS;
use crate::config::InstallOptions;
use crate::metadata::{Installation, InstallationState};
use crate::runtime::RUNTIME_COMPONENT;
use crate::Error;

impl InfraManager {
    /// Run every upgrade stage in order. The caller owns panic recovery and
    /// the terminal status write.
    pub(crate) async fn upgrade_pipeline(&self, opts: &InstallOptions) -> Result<(), Error> {
        let installation = Installation::from_options(opts, true);

        // (a) Stage the new artifacts everywhere, then swap the runtime.
        self.run_stage(RUNTIME_COMPONENT, "Upgrading", "Upgraded", || async {
            self.runtime.distribute_artifacts(opts).await?;
            self.runtime.upgrade(&installation).await
        })
        .await?;

        // (b) The control plane restarted underneath us; wait it out.
        self.metadata
            .wait_ready()
            .await
            .map_err(|e| Error::stage("cluster clients", e))?;

        // (c) A new record every run: history is how rollback finds the
        // previous version.
        self.metadata
            .create_installation(&installation)
            .await
            .map_err(|e| Error::stage("installation record", e))?;
        self.metadata
            .record_version_metadata(&opts.version)
            .await
            .map_err(|e| Error::stage("version metadata", e))?;

        // (d) Add-ons, with the progress aggregator attached.
        self.run_addons(opts, true).await?;

        // (e) User extensions.
        self.run_stage(ADDITIONAL_COMPONENTS, "Upgrading", "Upgraded", || async {
            self.extensions.upgrade(opts).await
        })
        .await?;

        // (f) Finalize the cluster-side record.
        self.metadata
            .set_installation_state(
                &installation.name_any(),
                InstallationState::Installed,
                "Upgrade complete",
            )
            .await
            .map_err(|e| Error::stage("finalize installation", e))?;

        // (g) Best-effort diagnostics; never fails the run.
        self.collect_diagnostics().await;

        Ok(())
    }
}
